//! Remote command execution with structured result capture.

use std::time::Duration;

use tracing::debug;

use crate::sandbox::{SandboxError, SandboxHandle};

/// Default per-command timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of one remote command.
///
/// `exit_code` is `None` exactly when `transport_error` is set; stdout
/// and stderr are then best-effort (usually empty).
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub transport_error: Option<String>,
}

impl ExecutionResult {
    pub fn completed(stdout: String, stderr: String, exit_code: i32) -> Self {
        Self {
            stdout,
            stderr,
            exit_code: Some(exit_code),
            transport_error: None,
        }
    }

    pub fn transport_failure(cause: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            transport_error: Some(cause.into()),
        }
    }

    /// Stdout followed by stderr, trimmed.
    pub fn combined_output(&self) -> String {
        format!("{}{}", self.stdout, self.stderr).trim().to_string()
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs shell command strings inside a sandbox.
///
/// Stateless: one executor serves the whole run.
#[derive(Debug, Clone)]
pub struct RemoteExecutor {
    shell: String,
}

impl RemoteExecutor {
    pub fn new() -> Self {
        Self::with_shell("bash")
    }

    pub fn with_shell(shell: &str) -> Self {
        Self {
            shell: shell.to_string(),
        }
    }

    /// Runs `command` under `<shell> -c` and waits at most `timeout`.
    ///
    /// Never fails: timeouts and transport problems come back as a
    /// result with `transport_error` set.
    pub async fn execute(
        &self,
        sandbox: &SandboxHandle,
        command: &str,
        timeout: Duration,
    ) -> ExecutionResult {
        let argv = vec![self.shell.clone(), "-c".to_string(), command.to_string()];
        debug!("exec [{}] ({}s): {command}", sandbox.id(), timeout.as_secs());

        match tokio::time::timeout(timeout, sandbox.exec(&argv, timeout)).await {
            Ok(Ok(output)) => {
                ExecutionResult::completed(output.stdout, output.stderr, output.exit_code)
            }
            Ok(Err(SandboxError::Timeout(_))) | Err(_) => {
                ExecutionResult::transport_failure(format!(
                    "command timed out after {}s",
                    timeout.as_secs_f32()
                ))
            }
            Ok(Err(e)) => ExecutionResult::transport_failure(e.to_string()),
        }
    }
}

/// Quotes `value` for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    if value.is_empty() {
        return "''".to_string();
    }
    format!("'{}'", value.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::scripted::{Reply, ScriptedProvider, ScriptedSandbox};
    use crate::sandbox::{SandboxLifecycle, SandboxSpec};

    fn spec() -> SandboxSpec {
        SandboxSpec {
            image: "img".to_string(),
            name_prefix: "t".to_string(),
            lifetime: Duration::from_secs(60),
            network: true,
        }
    }

    async fn run_one(sandbox: ScriptedSandbox, command: &str, timeout: Duration) -> ExecutionResult {
        let mut lifecycle = SandboxLifecycle::new(Box::new(ScriptedProvider::new(sandbox)));
        let command = command.to_string();
        lifecycle
            .scoped(&spec(), |sb| async move {
                RemoteExecutor::new().execute(&sb, &command, timeout).await
            })
            .await
            .unwrap()
    }

    // ── execute() ───────────────────────────────────────

    #[tokio::test]
    async fn test_execute_captures_output_and_exit_code() {
        let sandbox = ScriptedSandbox::new().rule("echo ok", Reply::ok("ok\n"));
        let result = run_one(sandbox.clone(), "echo ok", DEFAULT_TIMEOUT).await;

        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.stdout, "ok\n");
        assert!(result.transport_error.is_none());
        assert_eq!(sandbox.executed(), vec!["bash -c echo ok"]);
    }

    #[tokio::test]
    async fn test_execute_nonzero_exit_is_not_a_transport_error() {
        let sandbox = ScriptedSandbox::new().rule("curl", Reply::exit(7, "", ""));
        let result = run_one(sandbox, "curl http://169.254.169.254/", DEFAULT_TIMEOUT).await;

        assert_eq!(result.exit_code, Some(7));
        assert!(result.transport_error.is_none());
    }

    #[tokio::test]
    async fn test_execute_timeout_becomes_transport_error() {
        let sandbox = ScriptedSandbox::new().rule("sleep", Reply::Hang);
        let result = run_one(sandbox, "sleep 100", Duration::from_millis(20)).await;

        assert_eq!(result.exit_code, None);
        assert!(result.transport_error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_execute_transport_failure() {
        let sandbox = ScriptedSandbox::new().rule("ls", Reply::Transport("container gone".into()));
        let result = run_one(sandbox, "ls", DEFAULT_TIMEOUT).await;

        assert_eq!(result.exit_code, None);
        assert!(result.transport_error.unwrap().contains("container gone"));
    }

    // ── ExecutionResult ─────────────────────────────────

    #[test]
    fn test_combined_output_joins_and_trims() {
        let r = ExecutionResult::completed("out\n".into(), "err\n".into(), 1);
        assert_eq!(r.combined_output(), "out\nerr");
    }

    #[test]
    fn test_succeeded() {
        assert!(ExecutionResult::completed(String::new(), String::new(), 0).succeeded());
        assert!(!ExecutionResult::completed(String::new(), String::new(), 2).succeeded());
        assert!(!ExecutionResult::transport_failure("x").succeeded());
    }

    // ── shell_quote ─────────────────────────────────────

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/root"), "'/root'");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }
}
