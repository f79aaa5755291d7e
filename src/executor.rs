//! Runs one task through the overlap-lock / retry / timeout state machine.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::SchedError;
use crate::task::{Action, Task};
use crate::traits::{CommandRunner, EventKind, JobQueue, LockStore, Notifier, Services, TaskEvent};

/// Terminal state of one task run.
#[derive(Debug)]
pub enum RunOutcome {
    Success,
    Failure(SchedError),
    /// The overlap lock was held by a previous run; the action never started.
    /// Counts as neither success nor failure.
    Skipped,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Execute `task` once: acquire the overlap lock if requested, drive the
/// retry loop with the per-attempt timeout guard, invoke hooks, emit
/// lifecycle notifications, and release the lock in every outcome.
///
/// Failures never escape: whatever happens inside a run surfaces through the
/// returned [`RunOutcome`], logs, and the failure notification.
pub async fn run<S, N, Q, R>(
    task: &Task,
    services: &Services<S, N, Q, R>,
    fired_at: DateTime<Utc>,
) -> RunOutcome
where
    S: LockStore,
    N: Notifier,
    Q: JobQueue,
    R: CommandRunner,
{
    let name = task.display_name();
    let execution_id = Uuid::new_v4().to_string();

    emit(services, event(task, EventKind::TaskStarting, fired_at, &execution_id, None)).await;

    let lock_key = task.lock_key();
    let mut locked = false;
    if task.prevent_overlap {
        match services.locks.exists(&lock_key).await {
            Ok(true) => {
                tracing::info!(task = %name, "Skipping run — previous invocation still holds the overlap lock");
                return RunOutcome::Skipped;
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(task = %name, error = %e, "Lock store unreachable, proceeding without overlap protection");
            }
        }
        match services.locks.acquire_if_absent(&lock_key, task.lock_lease).await {
            Ok(true) => locked = true,
            Ok(false) => {
                tracing::info!(task = %name, "Skipping run — lost the overlap lock to a concurrent invocation");
                return RunOutcome::Skipped;
            }
            Err(e) => {
                tracing::warn!(task = %name, error = %e, "Lock store unreachable, proceeding without overlap protection");
            }
        }
    }

    let total_attempts = task.retries + 1;
    let mut terminal: Option<SchedError> = None;
    for attempt in 1..=total_attempts {
        match attempt_once(task, services).await {
            Ok(()) => {
                terminal = None;
                break;
            }
            Err(e) => {
                if attempt < total_attempts {
                    tracing::warn!(
                        task = %name,
                        attempt,
                        retries = task.retries,
                        error = %e,
                        "Run attempt failed, retrying"
                    );
                    if !task.retry_delay.is_zero() {
                        tokio::time::sleep(task.retry_delay).await;
                    }
                }
                terminal = Some(e);
            }
        }
    }

    let outcome = match terminal {
        None => {
            for (index, hook) in task.on_success.iter().enumerate() {
                if let Err(e) = hook() {
                    tracing::warn!(task = %name, hook = index, error = %e, "Success hook failed");
                }
            }
            tracing::debug!(task = %name, "Task finished");
            emit(services, event(task, EventKind::TaskFinished, fired_at, &execution_id, None))
                .await;
            RunOutcome::Success
        }
        Some(err) => {
            for (index, hook) in task.on_failure.iter().enumerate() {
                if let Err(e) = hook(&err) {
                    tracing::warn!(task = %name, hook = index, error = %e, "Failure hook failed");
                }
            }
            tracing::error!(
                task = %name,
                attempts = total_attempts,
                error = %err,
                "Task failed after all attempts"
            );
            emit(
                services,
                event(task, EventKind::TaskFailed, fired_at, &execution_id, Some(err.to_string())),
            )
            .await;
            RunOutcome::Failure(err)
        }
    };

    if locked {
        if let Err(e) = services.locks.release(&lock_key).await {
            tracing::warn!(task = %name, error = %e, "Failed to release overlap lock; lease will self-expire");
        }
    }

    outcome
}

/// One attempt: the action raced against the timeout guard. A timeout
/// abandons the wait by dropping the action future; it does not guarantee
/// the underlying work stops.
async fn attempt_once<S, N, Q, R>(
    task: &Task,
    services: &Services<S, N, Q, R>,
) -> Result<(), SchedError>
where
    S: LockStore,
    N: Notifier,
    Q: JobQueue,
    R: CommandRunner,
{
    let action = invoke(task, services);
    match task.timeout {
        Some(limit) => match tokio::time::timeout(limit, action).await {
            Ok(result) => result,
            Err(_) => Err(SchedError::Timeout { secs: limit.as_secs() }),
        },
        None => action.await,
    }
}

async fn invoke<S, N, Q, R>(task: &Task, services: &Services<S, N, Q, R>) -> Result<(), SchedError>
where
    S: LockStore,
    N: Notifier,
    Q: JobQueue,
    R: CommandRunner,
{
    match &task.action {
        Action::Call(f) => f().await.map_err(|e| SchedError::ActionFailed(e.to_string())),
        Action::Command { name, args } => services
            .runner
            .execute(name, args)
            .await
            .map_err(|e| SchedError::Command(e.to_string())),
        Action::Queue(job) => {
            services.queue.enqueue(job).await.map_err(|e| SchedError::Queue(e.to_string()))
        }
    }
}

fn event(
    task: &Task,
    kind: EventKind,
    fired_at: DateTime<Utc>,
    execution_id: &str,
    error: Option<String>,
) -> TaskEvent {
    TaskEvent {
        event: kind,
        task: task.display_name().to_string(),
        expression: task.expression().to_string(),
        fired_at,
        execution_id: execution_id.to_string(),
        error,
    }
}

async fn emit<S, N, Q, R>(services: &Services<S, N, Q, R>, event: TaskEvent)
where
    S: LockStore,
    N: Notifier,
    Q: JobQueue,
    R: CommandRunner,
{
    if let Err(e) = services.notifier.publish_event(&event).await {
        tracing::debug!(task = %event.task, error = %e, "Failed to publish lifecycle event");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::mocks::{MockCommandRunner, MockLockStore, MockNotifier, MockQueue};
    use crate::task::JobDescriptor;
    use crate::traits::{NullCommandRunner, NullLockStore, NullNotifier, NullQueue};

    type MockServices = Services<MockLockStore, MockNotifier, MockQueue, MockCommandRunner>;

    fn mock_services() -> MockServices {
        Services {
            locks: MockLockStore::new(),
            notifier: MockNotifier::new(),
            queue: MockQueue::new(),
            runner: MockCommandRunner::new(),
        }
    }

    fn counting_task(counter: &Arc<AtomicU32>) -> crate::task::TaskBuilder {
        let counter = Arc::clone(counter);
        Task::call(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    fn failing_task(counter: &Arc<AtomicU32>) -> crate::task::TaskBuilder {
        let counter = Arc::clone(counter);
        Task::call(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("boom".into())
            }
        })
    }

    #[tokio::test]
    async fn successful_run_emits_starting_and_finished() {
        let services = mock_services();
        let counter = Arc::new(AtomicU32::new(0));
        let task = counting_task(&counter).name("ok").build();

        let outcome = run(&task, &services, Utc::now()).await;

        assert!(outcome.is_success());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        let kinds: Vec<_> = services.notifier.events().iter().map(|e| e.event).collect();
        assert_eq!(kinds, [EventKind::TaskStarting, EventKind::TaskFinished]);
    }

    #[tokio::test]
    async fn exhausted_retries_attempt_exactly_count_plus_one_times() {
        let services = mock_services();
        let attempts = Arc::new(AtomicU32::new(0));
        let failures = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&failures);
        let task = failing_task(&attempts)
            .name("doomed")
            .retry(2, 0)
            .on_failure(move |err| {
                assert!(err.to_string().contains("boom"));
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .build();

        let outcome = run(&task, &services, Utc::now()).await;

        assert!(matches!(outcome, RunOutcome::Failure(SchedError::ActionFailed(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(failures.load(Ordering::SeqCst), 1);
        let last = services.notifier.events().pop().unwrap();
        assert_eq!(last.event, EventKind::TaskFailed);
        assert!(last.error.unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn succeeds_on_the_third_attempt_with_one_success_hook_call() {
        let services = mock_services();
        let attempts = Arc::new(AtomicU32::new(0));
        let successes = Arc::new(AtomicU32::new(0));
        let attempt_counter = Arc::clone(&attempts);
        let success_counter = Arc::clone(&successes);
        let task = Task::call(move || {
            let attempts = Arc::clone(&attempt_counter);
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("transient".into())
                } else {
                    Ok(())
                }
            }
        })
        .retry(2, 0)
        .on_success(move || {
            success_counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .build();

        let outcome = run(&task, &services, Utc::now()).await;

        assert!(outcome.is_success());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(successes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_delay_elapses_between_attempts() {
        let services = mock_services();
        let attempts = Arc::new(AtomicU32::new(0));
        let task = failing_task(&attempts).retry(2, 5).build();

        let started = tokio::time::Instant::now();
        let outcome = run(&task, &services, Utc::now()).await;

        assert!(matches!(outcome, RunOutcome::Failure(_)));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        // Two retry gaps of 5s each.
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_action_is_reported_as_timeout_failure() {
        let services = mock_services();
        let task = Task::call(|| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .timeout(2)
        .build();

        let outcome = run(&task, &services, Utc::now()).await;

        match outcome {
            RunOutcome::Failure(SchedError::Timeout { secs }) => assert_eq!(secs, 2),
            other => panic!("expected timeout failure, got {other:?}"),
        }
        let last = services.notifier.events().pop().unwrap();
        assert_eq!(last.event, EventKind::TaskFailed);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_action_is_abandoned() {
        // The attempt future is dropped on timeout, so the increment after
        // the sleep never happens: abandon-wait, not wait-to-completion.
        let services = mock_services();
        let counter = Arc::new(AtomicU32::new(0));
        let after_sleep = Arc::clone(&counter);
        let task = Task::call(move || {
            let counter = Arc::clone(&after_sleep);
            async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .timeout(1)
        .build();

        let outcome = run(&task, &services, Utc::now()).await;

        assert!(matches!(outcome, RunOutcome::Failure(SchedError::Timeout { .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn held_overlap_lock_skips_the_run_without_executing() {
        let services = mock_services();
        let counter = Arc::new(AtomicU32::new(0));
        let task = counting_task(&counter).name("guarded").without_overlapping().build();

        services.locks.hold(&task.lock_key(), Duration::from_secs(600));
        let outcome = run(&task, &services, Utc::now()).await;

        assert!(matches!(outcome, RunOutcome::Skipped));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        // Starting is emitted before the overlap check; nothing after it.
        let kinds: Vec<_> = services.notifier.events().iter().map(|e| e.event).collect();
        assert_eq!(kinds, [EventKind::TaskStarting]);
        // The pre-existing lease stays with its holder.
        assert!(services.locks.held_keys().contains(&task.lock_key()));
    }

    #[tokio::test]
    async fn overlap_lock_is_released_after_success_and_failure() {
        let services = mock_services();
        let counter = Arc::new(AtomicU32::new(0));

        let ok = counting_task(&counter).name("guarded").without_overlapping().build();
        run(&ok, &services, Utc::now()).await;
        assert!(services.locks.held_keys().is_empty());

        let bad = failing_task(&counter).name("guarded").without_overlapping().build();
        let outcome = run(&bad, &services, Utc::now()).await;
        assert!(matches!(outcome, RunOutcome::Failure(_)));
        assert!(services.locks.held_keys().is_empty());
    }

    #[tokio::test]
    async fn unreachable_lock_store_degrades_to_running_unprotected() {
        let services = mock_services();
        services.locks.set_unreachable(true);
        let counter = Arc::new(AtomicU32::new(0));
        let task = counting_task(&counter).without_overlapping().build();

        let outcome = run(&task, &services, Utc::now()).await;

        assert!(outcome.is_success());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_hooks_never_change_the_outcome() {
        let services = mock_services();
        let counter = Arc::new(AtomicU32::new(0));
        let task = counting_task(&counter).on_success(|| Err("hook broke".into())).build();

        let outcome = run(&task, &services, Utc::now()).await;

        assert!(outcome.is_success());
        assert_eq!(
            services.notifier.events().last().unwrap().event,
            EventKind::TaskFinished
        );
    }

    #[tokio::test]
    async fn queue_task_success_is_accepted_for_queuing() {
        let services = mock_services();
        let task = Task::queue(
            JobDescriptor::new("reports.nightly").with_payload(serde_json::json!({"day": 15})),
        )
        .build();

        let outcome = run(&task, &services, Utc::now()).await;

        assert!(outcome.is_success());
        let jobs = services.queue.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].name, "reports.nightly");
    }

    #[tokio::test]
    async fn command_task_invokes_the_runner_with_its_args() {
        let services = mock_services();
        let task = Task::command("backup", ["--db", "main"]).build();

        let outcome = run(&task, &services, Utc::now()).await;

        assert!(outcome.is_success());
        assert_eq!(
            services.runner.invocations(),
            vec![("backup".to_string(), vec!["--db".to_string(), "main".to_string()])]
        );
    }

    #[tokio::test]
    async fn unconfigured_collaborators_fail_their_tasks() {
        let services = Services {
            locks: NullLockStore,
            notifier: NullNotifier,
            queue: NullQueue,
            runner: NullCommandRunner,
        };

        let queue_task = Task::queue(JobDescriptor::new("job")).build();
        let outcome = run(&queue_task, &services, Utc::now()).await;
        assert!(matches!(outcome, RunOutcome::Failure(SchedError::Queue(_))));

        let cmd_task = Task::command("backup", Vec::<String>::new()).build();
        let outcome = run(&cmd_task, &services, Utc::now()).await;
        assert!(matches!(outcome, RunOutcome::Failure(SchedError::Command(_))));
    }
}
