//! Concurrent task supervision.
//!
//! Three pieces: `TaskScope` for cancellable background tasks with
//! parent/child cancellation, `KeyedLock` for the per-agent "at most one
//! challenge in flight" contract, and `filter_expected` for classifying
//! benign submission races. Aborting a task drops its lock guard, so
//! cancelling a scope also releases every exclusivity lock its tasks held.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;

use crate::errors::{RejectionKind, SubmitError};
use crate::logging::{json_log, obj, v_str, Domain};

#[derive(Default)]
struct ScopeInner {
    tasks: StdMutex<Vec<JoinHandle<()>>>,
    children: StdMutex<Vec<Arc<ScopeInner>>>,
    cancelled: AtomicBool,
}

impl ScopeInner {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        for handle in self.tasks.lock().expect("scope tasks lock").drain(..) {
            handle.abort();
        }
        for child in self.children.lock().expect("scope children lock").drain(..) {
            child.cancel();
        }
    }
}

/// A cancellation scope for background work. Cloning shares the scope.
#[derive(Clone, Default)]
pub struct TaskScope {
    inner: Arc<ScopeInner>,
}

impl TaskScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// A child scope: cancelled together with the parent, cancellable alone.
    pub fn child(&self) -> TaskScope {
        let child = TaskScope::new();
        self.inner.children.lock().expect("scope children lock").push(child.inner.clone());
        child
    }

    /// Launch an independently cancellable task in this scope. A task
    /// spawned into a cancelled scope never runs.
    pub fn spawn<F>(&self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        if self.is_cancelled() {
            json_log(Domain::Supervisor, "spawn_into_cancelled_scope", obj(&[]));
            return;
        }
        let mut tasks = self.inner.tasks.lock().expect("scope tasks lock");
        tasks.retain(|h| !h.is_finished());
        tasks.push(tokio::spawn(task));
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Cancel this scope and every descendant.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Await completion of all tasks spawned so far. Aborted tasks count as
    /// complete.
    pub async fn join(&self) {
        loop {
            let drained: Vec<JoinHandle<()>> =
                self.inner.tasks.lock().expect("scope tasks lock").drain(..).collect();
            if drained.is_empty() {
                return;
            }
            for handle in drained {
                let _ = handle.await;
            }
        }
    }
}

/// Cooperative, non-reentrant lock per string key. At most one holder per key
/// at any time; waiters queue on the key's async mutex and the guard releases
/// on drop, including when the owning task is aborted.
#[derive(Default)]
pub struct KeyedLock {
    locks: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.locks.lock().expect("keyed lock map");
            locks.entry(key.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
        };
        mutex.lock_owned().await
    }

    /// Non-blocking probe, for tests and diagnostics.
    pub fn is_held(&self, key: &str) -> bool {
        let locks = self.locks.lock().expect("keyed lock map");
        locks.get(key).map_or(false, |m| m.try_lock().is_err())
    }
}

/// Classify a dispute-submission outcome. Rejections in `expected` are benign
/// races with concurrent watchers: logged and converted to a clean exit.
/// Everything else propagates.
pub fn filter_expected(
    result: Result<(), SubmitError>,
    expected: &[RejectionKind],
    context: &str,
) -> Result<(), SubmitError> {
    match result {
        Err(SubmitError::Rejected(kind)) if expected.contains(&kind) => {
            json_log(
                Domain::Challenger,
                "expected_race",
                obj(&[("context", v_str(context)), ("rejection", v_str(kind.as_str()))]),
            );
            Ok(())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_scope_runs_tasks_to_completion() {
        let counter = Arc::new(AtomicU32::new(0));
        let scope = TaskScope::new();
        for _ in 0..3 {
            let counter = counter.clone();
            scope.spawn(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        scope.join().await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancel_aborts_tasks() {
        let counter = Arc::new(AtomicU32::new(0));
        let scope = TaskScope::new();
        let c = counter.clone();
        scope.spawn(async move {
            sleep(Duration::from_secs(60)).await;
            c.fetch_add(1, Ordering::SeqCst);
        });
        scope.cancel();
        scope.join().await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        // a task spawned after cancellation never runs
        let c = counter.clone();
        scope.spawn(async move {
            c.fetch_add(1, Ordering::SeqCst);
        });
        scope.join().await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_propagates_to_children() {
        let parent = TaskScope::new();
        let child = parent.child();
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        child.spawn(async move {
            sleep(Duration::from_secs(60)).await;
            c.fetch_add(1, Ordering::SeqCst);
        });
        parent.cancel();
        assert!(child.is_cancelled());
        child.join().await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_keyed_lock_mutual_exclusion() {
        let locks = Arc::new(KeyedLock::new());
        let active = Arc::new(AtomicU32::new(0));
        let max_seen = Arc::new(AtomicU32::new(0));
        let scope = TaskScope::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let active = active.clone();
            let max_seen = max_seen.clone();
            scope.spawn(async move {
                let _guard = locks.acquire("0xvault1").await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            });
        }
        scope.join().await;
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_keyed_lock_independent_keys() {
        let locks = KeyedLock::new();
        let g1 = locks.acquire("a").await;
        // a different key must not block
        let g2 = locks.acquire("b").await;
        assert!(locks.is_held("a"));
        assert!(locks.is_held("b"));
        drop(g1);
        assert!(!locks.is_held("a"));
        drop(g2);
    }

    #[tokio::test]
    async fn test_abort_releases_lock() {
        let locks = Arc::new(KeyedLock::new());
        let scope = TaskScope::new();
        let l = locks.clone();
        scope.spawn(async move {
            let _guard = l.acquire("0xvault1").await;
            sleep(Duration::from_secs(60)).await;
        });
        // give the task a chance to take the lock
        sleep(Duration::from_millis(20)).await;
        assert!(locks.is_held("0xvault1"));
        scope.cancel();
        scope.join().await;
        assert!(!locks.is_held("0xvault1"));
    }

    #[test]
    fn test_filter_expected_swallows_known_race() {
        let result: Result<(), SubmitError> = Err(SubmitError::Rejected(RejectionKind::AlreadyLiquidating));
        assert!(filter_expected(result, &[RejectionKind::AlreadyLiquidating], "test").is_ok());
    }

    #[test]
    fn test_filter_expected_rethrows_unknown() {
        let result: Result<(), SubmitError> = Err(SubmitError::Rejected(RejectionKind::EnoughBalance));
        assert!(filter_expected(result, &[RejectionKind::AlreadyLiquidating], "test").is_err());
        let result: Result<(), SubmitError> = Err(anyhow::anyhow!("nonce too low").into());
        assert!(filter_expected(result, &[RejectionKind::AlreadyLiquidating], "test").is_err());
    }
}
