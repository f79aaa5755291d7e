//! Mock collaborators for testing scheduling logic without NATS.
//!
//! Enabled with the `test-support` feature:
//!
//! ```toml
//! [dev-dependencies]
//! chime = { path = "...", features = ["test-support"] }
//! ```

use std::collections::HashMap;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicU32, Ordering},
};
use std::time::Duration;

use tokio::time::Instant;

use crate::task::JobDescriptor;
use crate::traits::{CommandRunner, JobQueue, LockStore, Notifier, TaskEvent};

#[derive(Debug)]
pub struct MockError(pub &'static str);

impl std::fmt::Display for MockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for MockError {}

// ── MockLockStore ─────────────────────────────────────────────────────────────

/// In-memory lease table with real deadline expiry (tokio time, so paused
/// clocks work). Controllable failure modes:
/// - `deny_acquire()`: every acquisition reports the lease as held
/// - `set_unreachable(true)`: every operation errors, as if the store died
#[derive(Clone, Default)]
pub struct MockLockStore {
    leases: Arc<Mutex<HashMap<String, Instant>>>,
    deny: Arc<AtomicBool>,
    unreachable: Arc<AtomicBool>,
    acquire_calls: Arc<AtomicU32>,
}

impl MockLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate another holder winning every acquisition.
    pub fn deny_acquire(&self) {
        self.deny.store(true, Ordering::SeqCst);
    }

    pub fn allow_acquire(&self) {
        self.deny.store(false, Ordering::SeqCst);
    }

    /// Simulate the lock store being unreachable.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Pre-seed a lease, as if another process had acquired `key`.
    pub fn hold(&self, key: &str, ttl: Duration) {
        self.leases.lock().unwrap().insert(key.to_string(), Instant::now() + ttl);
    }

    /// Keys with unexpired leases.
    pub fn held_keys(&self) -> Vec<String> {
        let now = Instant::now();
        self.leases
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, deadline)| **deadline > now)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Number of `acquire_if_absent` calls observed.
    pub fn acquire_calls(&self) -> u32 {
        self.acquire_calls.load(Ordering::SeqCst)
    }

    fn check_reachable(&self) -> Result<(), MockError> {
        if self.unreachable.load(Ordering::SeqCst) {
            Err(MockError("lock store unreachable"))
        } else {
            Ok(())
        }
    }

    fn prune(leases: &mut HashMap<String, Instant>) {
        let now = Instant::now();
        leases.retain(|_, deadline| *deadline > now);
    }
}

impl LockStore for MockLockStore {
    type Error = MockError;

    async fn acquire_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, MockError> {
        self.acquire_calls.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;
        if self.deny.load(Ordering::SeqCst) {
            return Ok(false);
        }
        let mut leases = self.leases.lock().unwrap();
        Self::prune(&mut leases);
        if leases.contains_key(key) {
            Ok(false)
        } else {
            leases.insert(key.to_string(), Instant::now() + ttl);
            Ok(true)
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, MockError> {
        self.check_reachable()?;
        let mut leases = self.leases.lock().unwrap();
        Self::prune(&mut leases);
        Ok(leases.contains_key(key))
    }

    async fn release(&self, key: &str) -> Result<(), MockError> {
        self.check_reachable()?;
        self.leases.lock().unwrap().remove(key);
        Ok(())
    }
}

// ── MockNotifier ──────────────────────────────────────────────────────────────

/// Records every lifecycle event published during a test run.
#[derive(Clone, Default)]
pub struct MockNotifier {
    records: Arc<Mutex<Vec<TaskEvent>>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TaskEvent> {
        self.records.lock().unwrap().clone()
    }

    pub fn event_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn clear(&self) {
        self.records.lock().unwrap().clear();
    }
}

impl Notifier for MockNotifier {
    type Error = std::convert::Infallible;

    async fn publish_event(&self, event: &TaskEvent) -> Result<(), Self::Error> {
        self.records.lock().unwrap().push(event.clone());
        Ok(())
    }
}

// ── MockQueue ─────────────────────────────────────────────────────────────────

/// Records every job descriptor handed to the queue.
#[derive(Clone, Default)]
pub struct MockQueue {
    records: Arc<Mutex<Vec<JobDescriptor>>>,
}

impl MockQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn jobs(&self) -> Vec<JobDescriptor> {
        self.records.lock().unwrap().clone()
    }
}

impl JobQueue for MockQueue {
    type Error = std::convert::Infallible;

    async fn enqueue(&self, job: &JobDescriptor) -> Result<(), Self::Error> {
        self.records.lock().unwrap().push(job.clone());
        Ok(())
    }
}

// ── MockCommandRunner ─────────────────────────────────────────────────────────

/// Records command invocations. By default every command succeeds;
/// `fail_first(n)` makes the first `n` invocations fail.
#[derive(Clone, Default)]
pub struct MockCommandRunner {
    records: Arc<Mutex<Vec<(String, Vec<String>)>>>,
    failures_left: Arc<AtomicU32>,
}

impl MockCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `n` invocations fail with a scripted error.
    pub fn fail_first(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn invocations(&self) -> Vec<(String, Vec<String>)> {
        self.records.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

impl CommandRunner for MockCommandRunner {
    type Error = MockError;

    async fn execute(&self, name: &str, args: &[String]) -> Result<(), MockError> {
        self.records.lock().unwrap().push((name.to_string(), args.to_vec()));
        if self.failures_left.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok()
        {
            Err(MockError("scripted command failure"))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn leases_expire_after_their_ttl() {
        let locks = MockLockStore::new();
        assert!(locks.acquire_if_absent("k", Duration::from_secs(10)).await.unwrap());
        assert!(!locks.acquire_if_absent("k", Duration::from_secs(10)).await.unwrap());
        assert!(locks.exists("k").await.unwrap());

        tokio::time::advance(Duration::from_secs(11)).await;

        assert!(!locks.exists("k").await.unwrap());
        assert!(locks.acquire_if_absent("k", Duration::from_secs(10)).await.unwrap());
    }

    #[tokio::test]
    async fn release_frees_the_key() {
        let locks = MockLockStore::new();
        assert!(locks.acquire_if_absent("k", Duration::from_secs(600)).await.unwrap());
        locks.release("k").await.unwrap();
        assert!(locks.acquire_if_absent("k", Duration::from_secs(600)).await.unwrap());
    }

    #[tokio::test]
    async fn scripted_command_failures_run_out() {
        let runner = MockCommandRunner::new();
        runner.fail_first(1);
        assert!(runner.execute("cmd", &[]).await.is_err());
        assert!(runner.execute("cmd", &[]).await.is_ok());
        assert_eq!(runner.call_count(), 2);
    }
}
