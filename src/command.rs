//! Default command runner: spawns the named binary as a child process.

use chrono::Utc;

use crate::error::SchedError;
use crate::traits::CommandRunner;

/// Runs a named command as an OS process and maps its exit status to an
/// outcome. The command name is handed to the OS loader as-is, so it may be
/// an absolute path or anything resolvable via `PATH`.
///
/// Children are spawned with `kill_on_drop`: when the executor's timeout
/// guard abandons an attempt (dropping this future), the process is killed
/// rather than orphaned. The same applies if the scheduler itself dies.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessCommandRunner;

impl ProcessCommandRunner {
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for ProcessCommandRunner {
    type Error = SchedError;

    async fn execute(&self, name: &str, args: &[String]) -> Result<(), SchedError> {
        let mut cmd = tokio::process::Command::new(name);
        cmd.args(args)
            // Let the child know it was fired by the scheduler and when.
            .env("CHIME_COMMAND", name)
            .env("CHIME_FIRED_AT", Utc::now().to_rfc3339())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;
        let status = child.wait().await?;
        if status.success() {
            tracing::debug!(command = %name, %status, "Command completed");
            Ok(())
        } else {
            Err(SchedError::Command(format!("process exited with status: {status}")))
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zero_exit_status_is_success() {
        let runner = ProcessCommandRunner::new();
        assert!(runner.execute("/bin/true", &[]).await.is_ok());
    }

    #[tokio::test]
    async fn non_zero_exit_status_is_a_command_error() {
        let runner = ProcessCommandRunner::new();
        let err = runner.execute("/bin/false", &[]).await.unwrap_err();
        assert!(matches!(err, SchedError::Command(_)));
    }

    #[tokio::test]
    async fn missing_binary_is_an_io_error() {
        let runner = ProcessCommandRunner::new();
        let err = runner.execute("/nonexistent/definitely-not-here", &[]).await.unwrap_err();
        assert!(matches!(err, SchedError::Io(_)));
    }
}
