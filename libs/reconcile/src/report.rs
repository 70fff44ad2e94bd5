//! Summary of a single reconciliation sweep.

use serde::Serialize;

/// What one sweep changed in a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SweepReport {
    /// Live containers that had no record and were adopted.
    pub adopted: u32,

    /// Provisioning records confirmed running.
    pub promoted: u32,

    /// Records dropped because their container is gone or exited.
    pub pruned: u32,

    /// Ready records demoted to idle after sitting unused.
    pub idled: u32,

    /// Records whose termination was confirmed and removed.
    pub terminated: u32,

    /// Termination calls the runtime refused or could not complete.
    pub failed_terminations: u32,
}

impl SweepReport {
    /// True if the sweep left the registry exactly as it found it.
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }

    /// Fold another report into this one.
    pub fn merge(&mut self, other: &SweepReport) {
        self.adopted += other.adopted;
        self.promoted += other.promoted;
        self.pruned += other.pruned;
        self.idled += other.idled;
        self.terminated += other.terminated;
        self.failed_terminations += other.failed_terminations;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_noop() {
        assert!(SweepReport::default().is_noop());
    }

    #[test]
    fn test_merge() {
        let mut total = SweepReport {
            adopted: 1,
            ..Default::default()
        };
        total.merge(&SweepReport {
            adopted: 2,
            terminated: 1,
            ..Default::default()
        });
        assert_eq!(total.adopted, 3);
        assert_eq!(total.terminated, 1);
        assert!(!total.is_noop());
    }
}
