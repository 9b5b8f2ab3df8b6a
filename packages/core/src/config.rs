//! Configuration consumed by the reservation engine.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::query::{Field, Filter};

/// Default lease length: four hours.
pub const DEFAULT_MAX_RUN_TIME_SECS: u64 = 4 * 60 * 60;

/// Default odds of running the promotion sweep: one call in ten.
pub const DEFAULT_PROMOTION_ONE_IN: u32 = 10;

/// Invalid [`ReserveConfig`] values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("min_priority {min} is greater than max_priority {max}")]
    PriorityRange { min: i32, max: i32 },
    #[error("max_run_time must be greater than zero")]
    ZeroMaxRunTime,
    #[error("promotion_one_in must be greater than zero")]
    ZeroPromotionOdds,
}

/// Which jobs a worker may claim and how housekeeping is paced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReserveConfig {
    /// Only claim jobs with `priority >= min_priority`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_priority: Option<i32>,
    /// Only claim jobs with `priority <= max_priority`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_priority: Option<i32>,
    /// Only claim jobs on these queues. Empty means every queue.
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub queues: BTreeSet<String>,
    /// Lease length in seconds; older locks are reclaimed.
    pub max_run_time_secs: u64,
    /// Run every housekeeping sweep on every call.
    pub test_mode: bool,
    /// The promotion sweep runs on one reservation in this many.
    pub promotion_one_in: u32,
}

impl Default for ReserveConfig {
    fn default() -> Self {
        Self {
            min_priority: None,
            max_priority: None,
            queues: BTreeSet::new(),
            max_run_time_secs: DEFAULT_MAX_RUN_TIME_SECS,
            test_mode: false,
            promotion_one_in: DEFAULT_PROMOTION_ONE_IN,
        }
    }
}

impl ReserveConfig {
    /// Create a config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_priority(mut self, min_priority: i32) -> Self {
        self.min_priority = Some(min_priority);
        self
    }

    pub fn with_max_priority(mut self, max_priority: i32) -> Self {
        self.max_priority = Some(max_priority);
        self
    }

    /// Restrict claims to the given queues.
    pub fn with_queues<I, S>(mut self, queues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.queues = queues.into_iter().map(Into::into).collect();
        self
    }

    /// Set the lease length. Sub-second parts round up to a whole second.
    pub fn with_max_run_time(mut self, max_run_time: Duration) -> Self {
        let round_up = u64::from(max_run_time.subsec_nanos() > 0);
        self.max_run_time_secs = max_run_time.as_secs().saturating_add(round_up);
        self
    }

    /// Force housekeeping on every call, for deterministic tests.
    pub fn with_test_mode(mut self, test_mode: bool) -> Self {
        self.test_mode = test_mode;
        self
    }

    pub fn with_promotion_one_in(mut self, promotion_one_in: u32) -> Self {
        self.promotion_one_in = promotion_one_in;
        self
    }

    /// Lease length as a duration.
    pub fn max_run_time(&self) -> Duration {
        Duration::from_secs(self.max_run_time_secs)
    }

    /// Check the values are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let (Some(min), Some(max)) = (self.min_priority, self.max_priority)
            && min > max
        {
            return Err(ConfigError::PriorityRange { min, max });
        }
        if self.max_run_time_secs == 0 {
            return Err(ConfigError::ZeroMaxRunTime);
        }
        if self.promotion_one_in == 0 {
            return Err(ConfigError::ZeroPromotionOdds);
        }
        Ok(())
    }

    /// Filter matching the jobs this config allows a worker to claim.
    pub fn claimable(&self) -> Filter {
        let mut filter = Filter::new().eq(Field::IsReady, true);
        if let Some(min) = self.min_priority {
            filter = filter.gte(Field::Priority, min);
        }
        if let Some(max) = self.max_priority {
            filter = filter.lte(Field::Priority, max);
        }
        if !self.queues.is_empty() {
            filter = filter.any_in(Field::Queue, self.queues.iter().cloned());
        }
        filter
    }
}
