//! The minute-aligned tick loop and the per-tick orchestration.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;

use crate::executor::{self, RunOutcome};
use crate::matcher;
use crate::registry::Registry;
use crate::settings::Settings;
use crate::traits::{CommandRunner, JobQueue, LockStore, Notifier, Services};

/// Leader-election lease key, disjoint from the `overlap.*` namespace.
pub const LEADER_LOCK_KEY: &str = "scheduler-leader-lock";

/// Leader lease TTL: just under the 60s tick period, so a crashed leader
/// never blocks the next election for more than one tick.
pub const LEADER_LEASE: Duration = Duration::from_secs(55);

/// Counts for one completed tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    pub due: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Drives a [`Registry`] of tasks: evaluates due-ness once per minute,
/// elects a leader per tick, and fans the due tasks out to concurrent
/// executor runs.
pub struct Scheduler<S, N, Q, R> {
    registry: Registry,
    services: Services<S, N, Q, R>,
    settings: Settings,
}

impl<S, N, Q, R> Scheduler<S, N, Q, R>
where
    S: LockStore,
    N: Notifier,
    Q: JobQueue,
    R: CommandRunner,
{
    pub fn new(registry: Registry, services: Services<S, N, Q, R>, settings: Settings) -> Self {
        Self { registry, services, settings }
    }

    /// One evaluation cycle at `now`.
    ///
    /// Due tasks are computed from a single timestamp snapshot before any
    /// lock is touched; an idle minute never churns the leader lease. When
    /// another instance holds the lease this process defers for the whole
    /// tick. All launched runs settle before the summary is returned; a
    /// tick never carries unfinished work into the next one, and nothing
    /// that happens inside a run can escape past this method.
    pub async fn run_tick(&self, now: DateTime<Utc>) -> TickSummary {
        let now = matcher::minute_floor(now);
        let due = self.registry.due_at(now, self.settings.timezone);
        if due.is_empty() {
            tracing::trace!(at = %now, "No tasks due");
            return TickSummary::default();
        }

        let mut summary = TickSummary { due: due.len(), ..TickSummary::default() };
        match self.services.locks.acquire_if_absent(LEADER_LOCK_KEY, LEADER_LEASE).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(due = due.len(), "Another instance holds the leader lease, deferring this tick");
                return summary;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Lock store unreachable, running tick unsynchronized");
            }
        }

        // One spawned run per due task: failures (and panics) stay isolated
        // to their own run, and the join below settles the whole tick.
        let handles: Vec<_> = due
            .into_iter()
            .map(|task| {
                let services = self.services.clone();
                tokio::spawn(async move { executor::run(&task, &services, now).await })
            })
            .collect();
        for result in join_all(handles).await {
            match result {
                Ok(RunOutcome::Success) => summary.succeeded += 1,
                Ok(RunOutcome::Failure(_)) => summary.failed += 1,
                Ok(RunOutcome::Skipped) => summary.skipped += 1,
                Err(e) => {
                    tracing::error!(error = %e, "Task run panicked");
                    summary.failed += 1;
                }
            }
        }
        tracing::info!(
            at = %now,
            due = summary.due,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            "Tick complete"
        );
        summary
    }

    /// Run until SIGINT / SIGTERM, then return once the in-flight tick has
    /// fully settled.
    pub async fn run(self) {
        self.run_until(shutdown_signal()).await;
    }

    /// Run until `shutdown` resolves. The signal is level-triggered and
    /// checked only between ticks: an in-flight tick (including all its
    /// concurrent task runs) always settles before this returns.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tracing::info!(
            tasks = self.registry.len(),
            timezone = %self.settings.timezone,
            "Scheduler starting"
        );
        tokio::pin!(shutdown);

        loop {
            self.run_tick(Utc::now()).await;

            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    tracing::info!("Shutdown signal received, stopping");
                    break;
                }
                _ = tokio::time::sleep(until_next_minute(Utc::now())) => {}
            }
        }
    }
}

/// Time remaining until the next wall-clock minute boundary, in (0, 60s].
fn until_next_minute(now: DateTime<Utc>) -> Duration {
    let into_minute =
        now.timestamp().rem_euclid(60) as u64 * 1000 + u64::from(now.timestamp_subsec_millis());
    Duration::from_millis(60_000 - into_minute.min(59_999))
}

/// Resolves when the process receives a shutdown signal (SIGINT or SIGTERM).
///
/// On Unix both signals are handled so container orchestrators (`docker
/// stop`, Kubernetes pod termination) stop the loop cleanly. On non-Unix
/// only Ctrl-C (SIGINT) is available.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let sigterm = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c  => {}
        _ = sigterm => {}
    }
}
