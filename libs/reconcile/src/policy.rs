//! Reaping deadlines.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::{DEFAULT_IDLE_TIMEOUT, DEFAULT_PROVISIONING_GRACE};

/// When instances become eligible for removal.
///
/// All comparisons are strict: an instance whose deadline equals `now` is
/// still within its allowance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReapPolicy {
    /// How long an instance may sit unused before it is reaped.
    pub idle_timeout: Duration,

    /// How long a created-but-unseen container is given to show up in the
    /// runtime listing before its record is pruned.
    pub provisioning_grace: Duration,
}

impl Default for ReapPolicy {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            provisioning_grace: DEFAULT_PROVISIONING_GRACE,
        }
    }
}

impl ReapPolicy {
    pub fn new(idle_timeout: Duration, provisioning_grace: Duration) -> Self {
        Self {
            idle_timeout,
            provisioning_grace,
        }
    }

    /// The instant after which an instance last active at `last_activity` is idle-expired.
    pub fn idle_deadline(&self, last_activity: DateTime<Utc>) -> DateTime<Utc> {
        saturating_add(last_activity, self.idle_timeout)
    }

    /// True once `now` is strictly past the idle deadline.
    pub fn is_idle_expired(&self, last_activity: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now > self.idle_deadline(last_activity)
    }

    /// True once a provisioning record created at `created_at` has outlived its grace period.
    pub fn is_provisioning_overdue(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now > saturating_add(created_at, self.provisioning_grace)
    }
}

fn saturating_add(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(by)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
