//! Periodic maintenance scheduling.
//!
//! Two repeating tasks share one logical timer: a short-interval worker pass
//! (orphan cleanup plus subscribed-object validation) and a long-interval
//! cleaner pass for directory-type objects. The cleaner is a one-shot after
//! boot and is re-armed by the driver. The scheduler only computes due times;
//! the service layer drives it, so tasks stay serialized with request
//! handling.

use serde::{Deserialize, Serialize};

/// Configuration for the maintenance passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    /// Worker pass interval in seconds. Default is 15.
    pub worker_interval_secs: u64,
    /// Cleaner pass delay in seconds. Default is 120.
    pub cleaner_interval_secs: u64,
    /// Age past which a still-empty directory object is removed. Default is
    /// 120, matching the cleaner delay.
    pub dir_type_stale_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            worker_interval_secs: 15,
            cleaner_interval_secs: 120,
            dir_type_stale_secs: 120,
        }
    }
}

/// Tasks a scheduler tick can report as due.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DueTasks {
    /// The short-interval worker pass is due.
    pub worker: bool,
    /// The long-interval cleaner pass is due.
    pub cleaner: bool,
}

/// Computes when the worker and cleaner passes are due.
#[derive(Debug)]
pub struct MaintenanceScheduler {
    config: MaintenanceConfig,
    next_worker_at: u64,
    next_cleaner_at: Option<u64>,
}

impl MaintenanceScheduler {
    /// Creates a scheduler with both tasks armed relative to `now`.
    pub fn new(config: MaintenanceConfig, now: u64) -> Self {
        let next_worker_at = now + config.worker_interval_secs;
        let next_cleaner_at = Some(now + config.cleaner_interval_secs);
        Self {
            config,
            next_worker_at,
            next_cleaner_at,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &MaintenanceConfig {
        &self.config
    }

    /// Reports which tasks are due at `now` and re-arms them. The worker
    /// repeats; the cleaner fires once until re-armed.
    pub fn due(&mut self, now: u64) -> DueTasks {
        let mut due = DueTasks::default();
        if now >= self.next_worker_at {
            due.worker = true;
            self.next_worker_at = now + self.config.worker_interval_secs;
        }
        if let Some(at) = self.next_cleaner_at {
            if now >= at {
                due.cleaner = true;
                self.next_cleaner_at = None;
            }
        }
        due
    }

    /// Re-arms the one-shot cleaner pass relative to `now`.
    pub fn restart_cleaner(&mut self, now: u64) {
        self.next_cleaner_at = Some(now + self.config.cleaner_interval_secs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_scheduler() -> MaintenanceScheduler {
        MaintenanceScheduler::new(MaintenanceConfig::default(), 1000)
    }

    #[test]
    fn test_default_intervals() {
        let config = MaintenanceConfig::default();
        assert_eq!(config.worker_interval_secs, 15);
        assert_eq!(config.cleaner_interval_secs, 120);
    }

    #[test]
    fn test_nothing_due_before_interval() {
        let mut sched = create_test_scheduler();
        assert_eq!(sched.due(1001), DueTasks::default());
    }

    #[test]
    fn test_worker_repeats() {
        let mut sched = create_test_scheduler();
        assert!(sched.due(1015).worker);
        assert!(!sched.due(1016).worker);
        assert!(sched.due(1030).worker);
    }

    #[test]
    fn test_cleaner_is_one_shot() {
        let mut sched = create_test_scheduler();
        let due = sched.due(1120);
        assert!(due.cleaner);
        assert!(!sched.due(1500).cleaner);
    }

    #[test]
    fn test_cleaner_restarts() {
        let mut sched = create_test_scheduler();
        assert!(sched.due(1120).cleaner);
        sched.restart_cleaner(1120);
        assert!(!sched.due(1200).cleaner);
        assert!(sched.due(1240).cleaner);
    }

    #[test]
    fn test_late_tick_fires_both() {
        let mut sched = create_test_scheduler();
        let due = sched.due(5000);
        assert!(due.worker);
        assert!(due.cleaner);
    }
}
