//! Task definitions: what to run, when, and under which execution policy.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::SchedError;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for success/failure hooks. Hook errors are logged by the
/// executor and never change the outcome of the run that triggered them.
pub type HookResult = Result<(), BoxError>;

type TaskFuture = Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send>>;
pub type TaskFn = Arc<dyn Fn() -> TaskFuture + Send + Sync>;
pub type SuccessHook = Arc<dyn Fn() -> HookResult + Send + Sync>;
pub type FailureHook = Arc<dyn Fn(&SchedError) -> HookResult + Send + Sync>;

/// Reference to a job handed off to an external queue. The scheduler only
/// dispatches it; "accepted for queuing" counts as success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl JobDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), payload: None }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// What a task does when it fires. The variant is fixed at construction and
/// never re-inspected through runtime type checks.
pub enum Action {
    /// In-process async closure.
    Call(TaskFn),
    /// Named command resolved and invoked through a [`CommandRunner`].
    ///
    /// [`CommandRunner`]: crate::traits::CommandRunner
    Command { name: String, args: Vec<String> },
    /// Fire-and-forget dispatch to an external job queue.
    Queue(JobDescriptor),
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Call(_) => f.write_str("Call(..)"),
            Self::Command { name, args } => {
                f.debug_struct("Command").field("name", name).field("args", args).finish()
            }
            Self::Queue(job) => f.debug_tuple("Queue").field(job).finish(),
        }
    }
}

/// One schedulable unit: an action, its cron schedule, and its execution
/// policy. Immutable once registered; the tick loop only reads it.
pub struct Task {
    pub(crate) action: Action,
    pub(crate) expression: String,
    pub(crate) timezone: Option<Tz>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) retries: u32,
    pub(crate) retry_delay: Duration,
    pub(crate) prevent_overlap: bool,
    pub(crate) lock_lease: Duration,
    pub(crate) name: String,
    pub(crate) on_success: Vec<SuccessHook>,
    pub(crate) on_failure: Vec<FailureHook>,
}

impl Task {
    /// Start building a task around an in-process async closure.
    pub fn call<F, Fut>(f: F) -> TaskBuilder
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        TaskBuilder::new(Action::Call(Arc::new(move || Box::pin(f()) as TaskFuture)))
    }

    /// Start building a task around a named command.
    pub fn command<I, S>(name: impl Into<String>, args: I) -> TaskBuilder
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TaskBuilder::new(Action::Command {
            name: name.into(),
            args: args.into_iter().map(Into::into).collect(),
        })
    }

    /// Start building a task that dispatches a job to an external queue.
    pub fn queue(job: JobDescriptor) -> TaskBuilder {
        TaskBuilder::new(Action::Queue(job))
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn timezone(&self) -> Option<Tz> {
        self.timezone
    }

    pub fn display_name(&self) -> &str {
        &self.name
    }

    /// Overlap-lock key, derived deterministically from the display name and
    /// the cron expression so every process in a cluster computes the same
    /// key. Two tasks with identical name and schedule share a key; keeping
    /// names unique is the caller's responsibility.
    pub fn lock_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.name.as_bytes());
        hasher.update(b"|");
        hasher.update(self.expression.as_bytes());
        let digest = hex::encode(hasher.finalize());
        format!("overlap.{}", &digest[..24])
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("expression", &self.expression)
            .field("action", &self.action)
            .field("timezone", &self.timezone)
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .field("prevent_overlap", &self.prevent_overlap)
            .finish_non_exhaustive()
    }
}

/// Fluent configuration surface. Pure data assembly; nothing here runs.
///
/// Defaults: fire every minute, no timeout, no retries, overlap allowed.
pub struct TaskBuilder {
    action: Action,
    expression: String,
    timezone: Option<Tz>,
    timeout: Option<Duration>,
    retries: u32,
    retry_delay: Duration,
    prevent_overlap: bool,
    lock_lease: Duration,
    name: Option<String>,
    on_success: Vec<SuccessHook>,
    on_failure: Vec<FailureHook>,
}

/// Default overlap-lock lease, matching a full day of runway for long tasks.
pub const DEFAULT_LOCK_LEASE_MINUTES: u64 = 1440;

impl TaskBuilder {
    fn new(action: Action) -> Self {
        Self {
            action,
            expression: "* * * * *".to_string(),
            timezone: None,
            timeout: None,
            retries: 0,
            retry_delay: Duration::ZERO,
            prevent_overlap: false,
            lock_lease: Duration::from_secs(DEFAULT_LOCK_LEASE_MINUTES * 60),
            name: None,
            on_success: Vec::new(),
            on_failure: Vec::new(),
        }
    }

    /// Cron schedule, 5-field crontab or 6/7-field with seconds. A malformed
    /// expression does not fail the builder; the task is simply never due
    /// (logged at evaluation time).
    pub fn cron(mut self, expr: impl Into<String>) -> Self {
        self.expression = expr.into();
        self
    }

    /// Evaluate the schedule in this timezone instead of the scheduler-wide
    /// default.
    pub fn timezone(mut self, tz: Tz) -> Self {
        self.timezone = Some(tz);
        self
    }

    /// Fail any single attempt that runs longer than `secs`. `0` removes the
    /// bound. A timed-out attempt is abandoned, not forcibly interrupted: the
    /// attempt future is dropped, which cancels closures at their next await
    /// point and kills spawned command processes (`kill_on_drop`).
    pub fn timeout(mut self, secs: u64) -> Self {
        self.timeout = if secs == 0 { None } else { Some(Duration::from_secs(secs)) };
        self
    }

    /// Retry a failed attempt up to `count` more times, sleeping `delay_secs`
    /// between consecutive attempts.
    pub fn retry(mut self, count: u32, delay_secs: u64) -> Self {
        self.retries = count;
        self.retry_delay = Duration::from_secs(delay_secs);
        self
    }

    /// Skip a firing while a previous run of this task still holds its
    /// overlap lock, with the default lease of 24 hours.
    pub fn without_overlapping(self) -> Self {
        self.without_overlapping_for(DEFAULT_LOCK_LEASE_MINUTES)
    }

    /// Same as [`without_overlapping`](Self::without_overlapping) with an
    /// explicit lease in minutes, after which an unreleased lock self-expires.
    pub fn without_overlapping_for(mut self, lease_minutes: u64) -> Self {
        self.prevent_overlap = true;
        self.lock_lease = Duration::from_secs(lease_minutes * 60);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Run after the task resolves successfully. Hooks run in registration
    /// order; a failing hook is logged and never retried.
    pub fn on_success<F>(mut self, hook: F) -> Self
    where
        F: Fn() -> HookResult + Send + Sync + 'static,
    {
        self.on_success.push(Arc::new(hook));
        self
    }

    /// Run after the task fails terminally, receiving the terminal error.
    pub fn on_failure<F>(mut self, hook: F) -> Self
    where
        F: Fn(&SchedError) -> HookResult + Send + Sync + 'static,
    {
        self.on_failure.push(Arc::new(hook));
        self
    }

    pub fn build(self) -> Task {
        let name = self.name.unwrap_or_else(|| derive_name(&self.action));
        Task {
            action: self.action,
            expression: self.expression,
            timezone: self.timezone,
            timeout: self.timeout,
            retries: self.retries,
            retry_delay: self.retry_delay,
            prevent_overlap: self.prevent_overlap,
            lock_lease: self.lock_lease,
            name,
            on_success: self.on_success,
            on_failure: self.on_failure,
        }
    }
}

fn derive_name(action: &Action) -> String {
    match action {
        Action::Call(_) => "closure".to_string(),
        Action::Command { name, args } => {
            if args.is_empty() {
                name.clone()
            } else {
                format!("{} {}", name, args.join(" "))
            }
        }
        Action::Queue(job) => job.name.clone(),
    }
}
