//! # chime
//!
//! Minute-resolution recurring task scheduler for clustered services.
//!
//! ## Features
//!
//! - Tasks declared in code: async closures, named commands, or queue-job
//!   dispatches, each with a 5- or 6-field cron schedule and an optional
//!   per-task timezone.
//! - One tick per wall-clock minute; all due tasks run concurrently and the
//!   tick settles before the next one starts.
//! - Per-task timeout guard and bounded retry with a fixed delay.
//! - Overlap prevention: a firing is skipped while a previous run of the
//!   same task still holds its lease.
//! - Best-effort leader election over a shared lease, so only one instance
//!   of a multi-process deployment executes a given minute's tasks.
//! - Lifecycle notifications (`starting` / `finished` / `failed`) published
//!   per run, fire-and-forget.
//! - Every external surface is optional: without a lock store the scheduler
//!   degrades to single-instance behavior; without a notifier events are
//!   dropped.
//! - NATS JetStream implementations of the lock store, notifier, and queue
//!   included; mocks for all of them behind the `test-support` feature.
//! - Graceful shutdown: SIGINT / SIGTERM stop the loop after the in-flight
//!   tick has fully settled.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use chime::{ProcessCommandRunner, Registry, Scheduler, Services, Settings, Task};
//! use chime::nats_impls::NatsLockStore;
//!
//! #[tokio::main]
//! async fn main() {
//!     let nats = async_nats::connect("nats://localhost:4222").await.unwrap();
//!     let js = async_nats::jetstream::new(nats.clone());
//!
//!     let mut registry = Registry::new();
//!     registry
//!         .register(
//!             Task::call(|| async {
//!                 // prune expired sessions
//!                 Ok(())
//!             })
//!             .name("prune sessions")
//!             .cron("*/5 * * * *")
//!             .without_overlapping(),
//!         )
//!         .register(Task::command("backup", ["--db", "main"]).cron("0 3 * * *").retry(2, 30));
//!
//!     let services = Services::unconfigured()
//!         .with_locks(NatsLockStore::connect(&js).await.unwrap())
//!         .with_notifier(nats.clone())
//!         .with_queue(nats)
//!         .with_runner(ProcessCommandRunner::new());
//!
//!     Scheduler::new(registry, services, Settings::from_env()).run().await;
//! }
//! ```

pub mod command;
pub mod error;
pub mod executor;
pub mod matcher;
#[cfg(any(test, feature = "test-support"))]
pub mod mocks;
pub mod nats_impls;
pub mod registry;
pub mod scheduler;
pub mod settings;
pub mod task;
pub mod traits;

pub use command::ProcessCommandRunner;
pub use error::SchedError;
pub use executor::RunOutcome;
pub use registry::Registry;
pub use scheduler::{LEADER_LEASE, LEADER_LOCK_KEY, Scheduler, TickSummary};
pub use settings::Settings;
pub use task::{Action, JobDescriptor, Task, TaskBuilder};
pub use traits::{
    CommandRunner, EventKind, JobQueue, LockStore, Notifier, Services, TaskEvent,
};
