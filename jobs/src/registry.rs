//! Server-side mutual exclusion and cancellation of runs.
//!
//! One run per exclusion group at a time. Acquisition is atomic under a
//! mutex; the returned [`RunLease`] frees the group when dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::types::{ExclusionGroup, JobClass};
use crate::errors::RunConflict;

/// Public view of an active run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveRun {
    pub run_id: String,
    pub class: JobClass,
    pub group: ExclusionGroup,
}

#[derive(Debug)]
struct Slot {
    run_id: String,
    class: JobClass,
    cancel: CancellationToken,
}

type Slots = HashMap<ExclusionGroup, Slot>;

#[derive(Debug, Clone, Default)]
pub struct RunRegistry {
    slots: Arc<Mutex<Slots>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the class's exclusion group for `run_id`.
    pub fn try_acquire(&self, class: JobClass, run_id: &str) -> Result<RunLease, RunConflict> {
        let group = class.exclusion_group();
        let mut slots = self.lock();
        if let Some(holder) = slots.get(&group) {
            debug!(%group, holder = %holder.run_id, "exclusion group busy");
            return Err(RunConflict {
                requested: class,
                group,
                holder_class: holder.class,
                holder_run_id: holder.run_id.clone(),
            });
        }
        let cancel = CancellationToken::new();
        slots.insert(
            group,
            Slot {
                run_id: run_id.to_string(),
                class,
                cancel: cancel.clone(),
            },
        );
        debug!(%group, run_id, "exclusion group acquired");
        Ok(RunLease {
            slots: Arc::clone(&self.slots),
            group,
            run_id: run_id.to_string(),
            cancel,
        })
    }

    /// Trip the cancellation token of an active run. False if unknown.
    pub fn cancel(&self, run_id: &str) -> bool {
        let slots = self.lock();
        match slots.values().find(|slot| slot.run_id == run_id) {
            Some(slot) => {
                info!(run_id, "cancellation requested");
                slot.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every active run (CLI Ctrl-C, server shutdown).
    pub fn cancel_all(&self) -> usize {
        let slots = self.lock();
        for slot in slots.values() {
            slot.cancel.cancel();
        }
        slots.len()
    }

    /// Active runs ordered by run id.
    pub fn active(&self) -> Vec<ActiveRun> {
        let slots = self.lock();
        let mut runs: Vec<ActiveRun> = slots
            .iter()
            .map(|(group, slot)| ActiveRun {
                run_id: slot.run_id.clone(),
                class: slot.class,
                group: *group,
            })
            .collect();
        runs.sort_by(|a, b| a.run_id.cmp(&b.run_id));
        runs
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Exclusive hold on one exclusion group for the lifetime of a run.
#[derive(Debug)]
pub struct RunLease {
    slots: Arc<Mutex<Slots>>,
    group: ExclusionGroup,
    run_id: String,
    cancel: CancellationToken,
}

impl RunLease {
    /// Token tripped by [`RunRegistry::cancel`].
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for RunLease {
    fn drop(&mut self) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if slots
            .get(&self.group)
            .is_some_and(|slot| slot.run_id == self.run_id)
        {
            slots.remove(&self.group);
            debug!(group = %self.group, run_id = %self.run_id, "exclusion group released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicting_classes_exclude_each_other() {
        let registry = RunRegistry::new();
        let lease = registry
            .try_acquire(JobClass::ParameterSearch, "search_1")
            .expect("acquire");
        let err = registry
            .try_acquire(JobClass::Backtest, "backtest_1")
            .unwrap_err();
        assert_eq!(err.group, ExclusionGroup::StrategyWorkspace);
        assert_eq!(err.holder_run_id, "search_1");
        assert_eq!(err.holder_class, JobClass::ParameterSearch);

        // Other groups stay available.
        let _fetch = registry
            .try_acquire(JobClass::DataFetch, "fetch_1")
            .expect("fetch");
        let _publish = registry
            .try_acquire(JobClass::Publish, "publish_1")
            .expect("publish");

        drop(lease);
        registry
            .try_acquire(JobClass::BacktestFixedWindow, "fixed_1")
            .expect("released");
    }

    #[test]
    fn cancel_trips_only_the_named_run() {
        let registry = RunRegistry::new();
        let a = registry.try_acquire(JobClass::DataFetch, "a").unwrap();
        let b = registry.try_acquire(JobClass::Publish, "b").unwrap();
        assert!(registry.cancel("a"));
        assert!(!registry.cancel("missing"));
        assert!(a.cancel_token().is_cancelled());
        assert!(!b.cancel_token().is_cancelled());
    }

    #[test]
    fn active_lists_held_groups() {
        let registry = RunRegistry::new();
        let _a = registry.try_acquire(JobClass::Publish, "p").unwrap();
        let _b = registry.try_acquire(JobClass::ApplyParameters, "a").unwrap();
        let ids: Vec<String> = registry.active().into_iter().map(|r| r.run_id).collect();
        assert_eq!(ids, vec!["a", "p"]);
        assert_eq!(registry.cancel_all(), 2);
    }
}
