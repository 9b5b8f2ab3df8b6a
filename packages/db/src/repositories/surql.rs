//! Translation of the store-neutral query model into SurrealQL.

use job_core::{Condition, Direction, Field, FieldValue, Filter, SortOrder, Update};
use surrealdb::sql::{self, Thing};

use crate::schema::JOB_TABLE;

/// Numbered query parameters collected while rendering.
#[derive(Debug, Default)]
pub(crate) struct Bindings {
    params: Vec<(String, sql::Value)>,
}

impl Bindings {
    /// Register a value and return the placeholder that refers to it.
    fn param(&mut self, value: sql::Value) -> String {
        let name = format!("p{}", self.params.len());
        let placeholder = format!("${name}");
        self.params.push((name, value));
        placeholder
    }

    pub(crate) fn into_params(self) -> Vec<(String, sql::Value)> {
        self.params
    }
}

/// Record id of a job.
pub(crate) fn thing(id: &job_core::JobId) -> Thing {
    Thing::from((JOB_TABLE, id.to_string().as_str()))
}

fn to_sql(value: &FieldValue) -> sql::Value {
    match value {
        FieldValue::Id(id) => sql::Value::from(thing(id)),
        FieldValue::Int(v) => sql::Value::from(*v),
        FieldValue::Text(v) => sql::Value::from(v.clone()),
        FieldValue::Bool(v) => sql::Value::from(*v),
        FieldValue::Time(v) => sql::Value::from(sql::Datetime::from(*v)),
    }
}

fn condition(condition: &Condition, bindings: &mut Bindings) -> String {
    // Absent fields are NONE, and NONE orders before every value, so ordered
    // comparisons must exclude it explicitly.
    let ordered = |field: &Field, op: &str, value: &FieldValue, bindings: &mut Bindings| {
        let p = bindings.param(to_sql(value));
        format!("({field} != NONE AND {field} {op} {p})")
    };

    match condition {
        Condition::Eq(field, value) => format!("{field} = {}", bindings.param(to_sql(value))),
        Condition::Ne(field, value) => format!("{field} != {}", bindings.param(to_sql(value))),
        Condition::Lt(field, value) => ordered(field, "<", value, bindings),
        Condition::Lte(field, value) => ordered(field, "<=", value, bindings),
        Condition::Gt(field, value) => ordered(field, ">", value, bindings),
        Condition::Gte(field, value) => ordered(field, ">=", value, bindings),
        Condition::In(field, values) => {
            let values: Vec<sql::Value> = values.iter().map(to_sql).collect();
            format!("{field} INSIDE {}", bindings.param(sql::Value::from(values)))
        }
        Condition::Present(field) => format!("{field} != NONE"),
        Condition::Absent(field) => format!("{field} = NONE"),
    }
}

/// `WHERE ...` clause for `filter`, empty when the filter has no conditions.
pub(crate) fn where_clause(filter: &Filter, bindings: &mut Bindings) -> String {
    if filter.conditions().is_empty() {
        return String::new();
    }
    let conditions: Vec<String> = filter
        .conditions()
        .iter()
        .map(|c| condition(c, bindings))
        .collect();
    format!("WHERE {}", conditions.join(" AND "))
}

/// `SET ...` clause for `update`. Identity fields are never written.
pub(crate) fn set_clause(update: &Update, bindings: &mut Bindings) -> String {
    let assignments: Vec<String> = update
        .assignments()
        .iter()
        .filter(|a| !matches!(a.field, Field::Id | Field::CreatedAt))
        .map(|a| match &a.value {
            Some(value) => format!("{} = {}", a.field, bindings.param(to_sql(value))),
            None => format!("{} = NONE", a.field),
        })
        .collect();
    format!("SET {}", assignments.join(", "))
}

/// `ORDER BY ...` clause, empty for an unordered sort.
pub(crate) fn order_clause(sort: &SortOrder) -> String {
    if sort.keys().is_empty() {
        return String::new();
    }
    let keys: Vec<String> = sort
        .keys()
        .iter()
        .map(|(field, direction)| match direction {
            Direction::Asc => format!("{field} ASC"),
            Direction::Desc => format!("{field} DESC"),
        })
        .collect();
    format!("ORDER BY {}", keys.join(", "))
}

/// Fields a candidate selection must project so it can be ordered.
pub(crate) fn projection(sort: &SortOrder) -> String {
    let mut fields = vec![Field::Id];
    for (field, _) in sort.keys() {
        if !fields.contains(field) {
            fields.push(*field);
        }
    }
    let names: Vec<&str> = fields.iter().map(Field::name).collect();
    names.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use job_core::transitions::claim_update;

    #[test]
    fn renders_claim_filter() {
        let filter = Filter::new()
            .eq(Field::IsReady, true)
            .gte(Field::Priority, 1)
            .any_in(Field::Queue, ["mail", "sms"]);
        let mut bindings = Bindings::default();

        let clause = where_clause(&filter, &mut bindings);
        assert_eq!(
            clause,
            "WHERE is_ready = $p0 AND (priority != NONE AND priority >= $p1) AND queue INSIDE $p2"
        );
        assert_eq!(bindings.into_params().len(), 3);
    }

    #[test]
    fn renders_presence_checks_without_params() {
        let filter = Filter::new().present(Field::LockedBy).absent(Field::IsReady);
        let mut bindings = Bindings::default();
        assert_eq!(
            where_clause(&filter, &mut bindings),
            "WHERE locked_by != NONE AND is_ready = NONE"
        );
        assert!(bindings.into_params().is_empty());
        assert_eq!(where_clause(&Filter::new(), &mut Bindings::default()), "");
    }

    #[test]
    fn renders_claim_update_and_order() {
        let mut bindings = Bindings::default();
        let clause = set_clause(&claim_update("w1", Utc::now()), &mut bindings);
        assert_eq!(
            clause,
            "SET locked_at = $p0, locked_by = $p1, run_at = NONE, is_ready = NONE"
        );

        let order = SortOrder::claim_order();
        assert_eq!(order_clause(&order), "ORDER BY priority ASC, created_at ASC, id ASC");
        assert_eq!(projection(&order), "id, priority, created_at");
        assert_eq!(order_clause(&SortOrder::unordered()), "");
    }
}
