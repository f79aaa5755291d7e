//! Contracts for the external collaborators the scheduler consumes.
//!
//! Every surface is optional: the null implementations at the bottom stand in
//! when a collaborator is not configured, degrading the scheduler to
//! single-instance, notification-free operation instead of failing.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::JobDescriptor;

/// Key/value lease store used for overlap prevention and leader election.
///
/// `acquire_if_absent` must be atomic at the store layer ("set if not exists
/// with expiry"); the scheduler never read-modify-writes a lock value itself.
/// Under partition the lease is best-effort: callers treat store errors as
/// "lock absent" and proceed unsynchronized.
pub trait LockStore: Send + Sync + Clone + 'static {
    type Error: std::error::Error + Send + Sync;

    /// True means the caller now holds the lease for `ttl`.
    fn acquire_if_absent(
        &self,
        key: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send;

    /// True while an unexpired lease exists for `key`.
    fn exists(&self, key: &str) -> impl Future<Output = Result<bool, Self::Error>> + Send;

    /// Drop the lease early. Unreleased leases self-expire via their TTL.
    fn release(&self, key: &str) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Lifecycle event published for every task run. Fire-and-forget: a failing
/// or absent notifier never affects the run's outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    pub event: EventKind,
    pub task: String,
    pub expression: String,
    pub fired_at: DateTime<Utc>,
    /// Unique per run, so consumers can deduplicate redeliveries.
    pub execution_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TaskStarting,
    TaskFinished,
    TaskFailed,
}

impl EventKind {
    /// Subject suffix used by transport implementations.
    pub fn as_subject(&self) -> &'static str {
        match self {
            Self::TaskStarting => "starting",
            Self::TaskFinished => "finished",
            Self::TaskFailed => "failed",
        }
    }
}

pub trait Notifier: Send + Sync + Clone + 'static {
    type Error: std::error::Error + Send + Sync;

    fn publish_event(
        &self,
        event: &TaskEvent,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Hands a job descriptor to an external queue. Success is "accepted for
/// queuing", not "job completed".
pub trait JobQueue: Send + Sync + Clone + 'static {
    type Error: std::error::Error + Send + Sync;

    fn enqueue(&self, job: &JobDescriptor)
    -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Resolves and invokes a named command.
pub trait CommandRunner: Send + Sync + Clone + 'static {
    type Error: std::error::Error + Send + Sync;

    fn execute(
        &self,
        name: &str,
        args: &[String],
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// One of each collaborator, threaded through the orchestration layer.
/// Start from [`Services::unconfigured`] and swap in real implementations.
#[derive(Debug, Clone)]
pub struct Services<S, N, Q, R> {
    pub locks: S,
    pub notifier: N,
    pub queue: Q,
    pub runner: R,
}

impl Services<NullLockStore, NullNotifier, NullQueue, NullCommandRunner> {
    /// All collaborators absent: every instance runs every due task, events
    /// go nowhere, queue and command tasks fail with a configuration error.
    pub fn unconfigured() -> Self {
        Self {
            locks: NullLockStore,
            notifier: NullNotifier,
            queue: NullQueue,
            runner: NullCommandRunner,
        }
    }
}

impl<S, N, Q, R> Services<S, N, Q, R> {
    pub fn with_locks<S2>(self, locks: S2) -> Services<S2, N, Q, R> {
        Services { locks, notifier: self.notifier, queue: self.queue, runner: self.runner }
    }

    pub fn with_notifier<N2>(self, notifier: N2) -> Services<S, N2, Q, R> {
        Services { locks: self.locks, notifier, queue: self.queue, runner: self.runner }
    }

    pub fn with_queue<Q2>(self, queue: Q2) -> Services<S, N, Q2, R> {
        Services { locks: self.locks, notifier: self.notifier, queue, runner: self.runner }
    }

    pub fn with_runner<R2>(self, runner: R2) -> Services<S, N, Q, R2> {
        Services { locks: self.locks, notifier: self.notifier, queue: self.queue, runner }
    }
}

/// Error returned by the null queue and null command runner: the task asked
/// for a collaborator that was never configured.
#[derive(Debug)]
pub struct Unconfigured(pub &'static str);

impl std::fmt::Display for Unconfigured {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "no {} configured", self.0)
    }
}

impl std::error::Error for Unconfigured {}

/// Lock store stand-in for single-instance deployments: every lease is
/// granted, nothing is ever held.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullLockStore;

impl LockStore for NullLockStore {
    type Error = std::convert::Infallible;

    async fn acquire_if_absent(&self, _key: &str, _ttl: Duration) -> Result<bool, Self::Error> {
        Ok(true)
    }

    async fn exists(&self, _key: &str) -> Result<bool, Self::Error> {
        Ok(false)
    }

    async fn release(&self, _key: &str) -> Result<(), Self::Error> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    type Error = std::convert::Infallible;

    async fn publish_event(&self, _event: &TaskEvent) -> Result<(), Self::Error> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullQueue;

impl JobQueue for NullQueue {
    type Error = Unconfigured;

    async fn enqueue(&self, _job: &JobDescriptor) -> Result<(), Self::Error> {
        Err(Unconfigured("job queue"))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullCommandRunner;

impl CommandRunner for NullCommandRunner {
    type Error = Unconfigured;

    async fn execute(&self, _name: &str, _args: &[String]) -> Result<(), Self::Error> {
        Err(Unconfigured("command runner"))
    }
}
