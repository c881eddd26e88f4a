//! Scheduled Jobs
//!
//! Each job owns a tokio timer task that feeds `TimerFire` tasks into the
//! Cell's queue, so handler invocations serialize with everything else.
//! The table only tracks bookkeeping; the handler closures live inside
//! the interpreter.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use super::task::Caller;

/// Recurring or one-shot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Interval,
    Delay,
}

#[derive(Debug)]
struct JobEntry {
    kind: JobKind,
    #[allow(dead_code)]
    period: Duration,
    cancelled: bool,
    caller: Caller,
    timer: Option<JoinHandle<()>>,
}

/// All scheduled jobs of one Cell.
#[derive(Debug, Default)]
pub struct JobTable {
    jobs: Mutex<HashMap<String, JobEntry>>,
    next_id: AtomicU64,
}

impl JobTable {
    /// Register a job, capturing the caller identity in effect at
    /// registration time. The timer task is attached separately.
    pub fn register(&self, kind: JobKind, period: Duration, caller: Caller) -> String {
        let id = format!("job-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.jobs.lock().insert(
            id.clone(),
            JobEntry {
                kind,
                period,
                cancelled: false,
                caller,
                timer: None,
            },
        );
        id
    }

    pub fn attach_timer(&self, id: &str, handle: JoinHandle<()>) {
        if let Some(entry) = self.jobs.lock().get_mut(id) {
            entry.timer = Some(handle);
        } else {
            // Cancelled between register and attach.
            handle.abort();
        }
    }

    /// Cancel a job: stop its timer and mark it so in-flight fires are
    /// dropped by the dispatch loop.
    pub fn cancel(&self, id: &str) -> bool {
        let mut jobs = self.jobs.lock();
        match jobs.get_mut(id) {
            Some(entry) => {
                entry.cancelled = true;
                if let Some(timer) = entry.timer.take() {
                    timer.abort();
                }
                true
            }
            None => false,
        }
    }

    /// Cancel everything (Cell stop).
    pub fn cancel_all(&self) {
        let mut jobs = self.jobs.lock();
        for entry in jobs.values_mut() {
            entry.cancelled = true;
            if let Some(timer) = entry.timer.take() {
                timer.abort();
            }
        }
    }

    /// Resolve a fire into its kind and caller, or `None` when the job
    /// was cancelled or removed.
    pub fn fire_target(&self, id: &str) -> Option<(JobKind, Caller)> {
        let jobs = self.jobs.lock();
        let entry = jobs.get(id)?;
        if entry.cancelled {
            return None;
        }
        Some((entry.kind, entry.caller.clone()))
    }

    /// Drop a finished one-shot job.
    pub fn remove(&self, id: &str) {
        if let Some(entry) = self.jobs.lock().remove(id) {
            if let Some(timer) = entry.timer {
                timer.abort();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_cancel() {
        let table = JobTable::default();
        let id = table.register(JobKind::Interval, Duration::from_secs(1), Caller::default());

        assert!(table.fire_target(&id).is_some());
        assert!(table.cancel(&id));
        assert!(table.fire_target(&id).is_none());
        assert!(!table.cancel("job-999"));
    }

    #[test]
    fn ids_are_unique() {
        let table = JobTable::default();
        let a = table.register(JobKind::Delay, Duration::from_millis(1), Caller::default());
        let b = table.register(JobKind::Delay, Duration::from_millis(1), Caller::default());
        assert_ne!(a, b);
    }

    #[test]
    fn fire_target_carries_registration_caller() {
        let table = JobTable::default();
        let caller = Caller::new(Some("u1".into()), Some("s1".into()));
        let id = table.register(JobKind::Delay, Duration::from_millis(1), caller);

        let (kind, caller) = table.fire_target(&id).unwrap();
        assert_eq!(kind, JobKind::Delay);
        assert_eq!(caller.session.as_deref(), Some("s1"));
    }

    #[test]
    fn cancel_all_marks_everything() {
        let table = JobTable::default();
        let a = table.register(JobKind::Interval, Duration::from_secs(1), Caller::default());
        let b = table.register(JobKind::Delay, Duration::from_secs(1), Caller::default());
        table.cancel_all();
        assert!(table.fire_target(&a).is_none());
        assert!(table.fire_target(&b).is_none());
    }
}
