//! Daemon session creation through its CLI.

use std::fmt;

use tracing::{info, warn};

use crate::classify::ExpectedOutcome;
use crate::config::SessionConfig;
use crate::exec::{shell_quote, RemoteExecutor, DEFAULT_TIMEOUT};
use crate::sandbox::SandboxHandle;
use crate::suite::{expand_placeholders, TestCase, TestCategory, SESSION_PLACEHOLDER};
use crate::tolerant;

/// Session token issued by the daemon. Empty means "no session".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Substitutes the (shell-quoted) id into a probe command.
    pub fn fill(&self, command: &str) -> String {
        command.replace(SESSION_PLACEHOLDER, &shell_quote(&self.0))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("(none)")
        } else {
            f.write_str(&self.0)
        }
    }
}

pub struct SessionClient<'a> {
    executor: &'a RemoteExecutor,
    config: &'a SessionConfig,
    binary: &'a str,
}

impl<'a> SessionClient<'a> {
    pub fn new(executor: &'a RemoteExecutor, config: &'a SessionConfig, binary: &'a str) -> Self {
        Self {
            executor,
            config,
            binary,
        }
    }

    fn create_command(&self) -> String {
        expand_placeholders(
            &self.config.create_command,
            &[
                ("binary", self.binary),
                ("workspace", &shell_quote(&self.config.workspace)),
            ],
        )
    }

    /// Creates a session and returns its id, or an empty id on any failure.
    pub async fn create(&self, sandbox: &SandboxHandle) -> SessionId {
        let command = self.create_command();
        let result = self.executor.execute(sandbox, &command, DEFAULT_TIMEOUT).await;

        if let Some(cause) = &result.transport_error {
            warn!("Session creation failed: {cause}");
            return SessionId::none();
        }

        let output = result.combined_output();
        match tolerant::extract_string_field(&output, "id") {
            Some(id) if !id.is_empty() => {
                info!("Session ID: {id}");
                SessionId::new(id)
            }
            _ => {
                let preview: String = output.chars().take(120).collect();
                warn!(
                    "Could not parse session id (exit code {:?}): {preview}",
                    result.exit_code
                );
                SessionId::none()
            }
        }
    }

    /// Session probes: creation succeeded, and the session can be queried.
    pub fn probe_category(&self) -> TestCategory {
        let info = expand_placeholders(&self.config.info_command, &[("binary", self.binary)]);
        TestCategory {
            key: "session".to_string(),
            title: "Session Management".to_string(),
            description: "Session lifecycle through the daemon CLI".to_string(),
            cases: vec![
                TestCase {
                    name: "Session created".to_string(),
                    command: format!("test -n {SESSION_PLACEHOLDER}"),
                    expect: ExpectedOutcome::Success,
                    description: "Daemon issued a session id".to_string(),
                    requires_session: true,
                    require_output: false,
                    timeout_secs: None,
                },
                TestCase {
                    name: "Session info".to_string(),
                    command: info,
                    expect: ExpectedOutcome::Success,
                    description: "Session can be looked up by id".to_string(),
                    requires_session: true,
                    require_output: false,
                    timeout_secs: None,
                },
            ],
        }
    }
}
