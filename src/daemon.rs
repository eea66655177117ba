//! Daemon configuration, launch and readiness polling inside the sandbox.
//!
//! The poller never relaunches the daemon. When it gives up, it looks up
//! the daemon process and fetches the tail of its log so the operator can
//! see why; the run then continues in degraded mode.

use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::DaemonConfig;
use crate::exec::{shell_quote, RemoteExecutor};
use crate::poll::PollSchedule;
use crate::sandbox::SandboxHandle;

/// Terminator of the quoted heredoc used to transfer files.
const HEREDOC_MARKER: &str = "SANDBOX_PROBE_EOF";

/// Timeout of each health/liveness/log probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout of each config file write.
const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout of the shell-shim install.
const SHIM_TIMEOUT: Duration = Duration::from_secs(60);

/// How hard the poller insists before declaring the daemon ready.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadinessMode {
    /// 10 attempts; exit code 0 is enough.
    #[default]
    Standard,
    /// 20 attempts; the health body must also be non-empty.
    Strict,
}

impl ReadinessMode {
    pub fn max_attempts(&self) -> u32 {
        match self {
            ReadinessMode::Standard => 10,
            ReadinessMode::Strict => 20,
        }
    }

    fn requires_body(&self) -> bool {
        matches!(self, ReadinessMode::Strict)
    }

    fn log_tail_lines(&self) -> u32 {
        match self {
            ReadinessMode::Standard => 20,
            ReadinessMode::Strict => 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Readiness {
    Ready {
        attempts: u32,
        /// Health response body
        health: String,
    },
    NotReady {
        attempts: u32,
        /// `None` when the liveness probe itself could not run
        alive: Option<bool>,
        log_tail: Option<String>,
    },
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready { .. })
    }
}

/// Configuration documents copied verbatim into the sandbox.
pub struct DaemonArtifacts {
    pub server_config: String,
    pub policy: String,
}

impl DaemonArtifacts {
    pub fn read(config: &DaemonConfig) -> Result<Self> {
        Ok(Self {
            server_config: read_local(&config.config_file)?,
            policy: read_local(&config.policy_file)?,
        })
    }
}

fn read_local(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| anyhow!("cannot read {}: {e}", path.display()))
}

pub struct DaemonSetup<'a> {
    executor: &'a RemoteExecutor,
    config: &'a DaemonConfig,
}

impl<'a> DaemonSetup<'a> {
    pub fn new(executor: &'a RemoteExecutor, config: &'a DaemonConfig) -> Self {
        Self { executor, config }
    }

    /// Writes the config files, starts the daemon and waits for it.
    ///
    /// Errors only when a config file cannot be written; a daemon that
    /// never becomes healthy is reported as [`Readiness::NotReady`].
    pub async fn start_and_wait_ready(
        &self,
        sandbox: &SandboxHandle,
        artifacts: &DaemonArtifacts,
    ) -> Result<Readiness> {
        info!("Writing configuration files...");
        write_file(
            self.executor,
            sandbox,
            &self.config.remote_config_path,
            &artifacts.server_config,
        )
        .await?;
        write_file(
            self.executor,
            sandbox,
            &self.config.remote_policy_path,
            &artifacts.policy,
        )
        .await?;

        match &self.config.shim_command {
            Some(command) => self.install_shim(sandbox, command).await,
            None => info!("Skipping shell shim, running in proxy-only mode"),
        }

        self.launch(sandbox).await;
        Ok(self.wait_ready(sandbox).await)
    }

    async fn install_shim(&self, sandbox: &SandboxHandle, command: &str) {
        info!("Installing shell shim...");
        let result = self.executor.execute(sandbox, command, SHIM_TIMEOUT).await;
        if let Some(cause) = &result.transport_error {
            warn!("Shell shim installation failed: {cause}");
            return;
        }
        match result.exit_code {
            Some(0) => info!("Shell shim installed"),
            code => warn!(
                "Shell shim installation returned exit code {code:?}: {}",
                result.combined_output()
            ),
        }
    }

    fn launch_command(&self) -> String {
        format!(
            "nohup {} server --config {} > {} 2>&1 &",
            self.config.binary,
            shell_quote(&self.config.remote_config_path),
            shell_quote(&self.config.log_path),
        )
    }

    /// Fire-and-forget start of the daemon.
    async fn launch(&self, sandbox: &SandboxHandle) {
        info!("Starting {} daemon...", self.config.binary);
        let argv = vec!["sh".to_string(), "-c".to_string(), self.launch_command()];
        if let Err(e) = sandbox.spawn_detached(&argv).await {
            warn!("Daemon launch failed: {e}");
        }
    }

    fn health_command(&self) -> String {
        let url = self
            .config
            .endpoint("health")
            .map(|u| u.to_string())
            .unwrap_or_else(|_| format!("{}/health", self.config.base_url));
        format!("curl -s {} 2>&1", shell_quote(&url))
    }

    /// Polls the health endpoint at a fixed interval, at most
    /// `readiness.max_attempts()` times.
    pub async fn wait_ready(&self, sandbox: &SandboxHandle) -> Readiness {
        let mode = self.config.readiness;
        let mut schedule = PollSchedule::new(self.config.poll_interval(), mode.max_attempts());
        let health = self.health_command();
        info!(
            "Waiting for daemon health (up to {} attempts, {}s)...",
            schedule.max_attempts(),
            schedule.budget().as_secs()
        );
        let mut last_output = String::new();

        while let Some(delay) = schedule.next_delay() {
            tokio::time::sleep(delay).await;
            let result = self.executor.execute(sandbox, &health, PROBE_TIMEOUT).await;
            let output = result.combined_output();

            if result.succeeded() && (!mode.requires_body() || !output.is_empty()) {
                let preview: String = output.chars().take(50).collect();
                info!(
                    "Daemon healthy: {preview} (took {} attempt{})",
                    schedule.attempt,
                    if schedule.attempt == 1 { "" } else { "s" }
                );
                return Readiness::Ready {
                    attempts: schedule.attempt,
                    health: output,
                };
            }

            debug!(
                "Health attempt {}/{} failed: {}",
                schedule.attempt,
                schedule.max_attempts(),
                result.transport_error.as_deref().unwrap_or(&output)
            );
            last_output = output;
        }

        warn!(
            "Daemon not ready after {} attempts (health check: {})",
            schedule.attempt,
            if last_output.is_empty() {
                "no response"
            } else {
                last_output.as_str()
            }
        );
        self.diagnose(sandbox, schedule.attempt).await
    }

    /// Best-effort diagnosis after polling gave up.
    async fn diagnose(&self, sandbox: &SandboxHandle, attempts: u32) -> Readiness {
        let mode = self.config.readiness;
        let alive = self.is_alive(sandbox).await;

        let log_tail = if alive != Some(true) || mode == ReadinessMode::Strict {
            self.log_tail(sandbox, mode.log_tail_lines()).await
        } else {
            None
        };

        match (&alive, &log_tail) {
            (Some(false), Some(log)) => warn!("Daemon not running. Log:\n{log}"),
            (_, Some(log)) => warn!("Daemon log tail:\n{log}"),
            (Some(true), None) => warn!("Daemon process is alive but not healthy"),
            _ => warn!("Daemon state unknown"),
        }

        Readiness::NotReady {
            attempts,
            alive,
            log_tail,
        }
    }

    async fn is_alive(&self, sandbox: &SandboxHandle) -> Option<bool> {
        let command = format!(
            "pgrep -f {} || echo 'not running'",
            shell_quote(&self_excluding_pattern(&format!("{} server", self.config.binary)))
        );
        let result = self.executor.execute(sandbox, &command, PROBE_TIMEOUT).await;
        if result.transport_error.is_some() {
            return None;
        }
        Some(!result.stdout.contains("not running"))
    }

    async fn log_tail(&self, sandbox: &SandboxHandle, lines: u32) -> Option<String> {
        let command = format!("tail -n {lines} {} 2>&1", shell_quote(&self.config.log_path));
        let result = self.executor.execute(sandbox, &command, PROBE_TIMEOUT).await;
        let output = result.combined_output();
        if result.transport_error.is_some() || output.is_empty() {
            None
        } else {
            Some(output)
        }
    }
}

/// Bracket-wraps the first character of `pattern`: the regex still
/// matches the daemon but no longer its own text, so `pgrep -f` skips
/// the shell running the lookup. `agentsh server` → `[a]gentsh server`.
fn self_excluding_pattern(pattern: &str) -> String {
    let mut chars = pattern.chars();
    match chars.next() {
        Some(first) => format!("[{first}]{}", chars.as_str()),
        None => String::new(),
    }
}

/// Copies `content` to `path` inside the sandbox with a quoted heredoc.
///
/// Blocks until the remote write finished; nonzero exit and transport
/// errors are both reported as errors.
pub async fn write_file(
    executor: &RemoteExecutor,
    sandbox: &SandboxHandle,
    path: &str,
    content: &str,
) -> Result<()> {
    if content.lines().any(|line| line == HEREDOC_MARKER) {
        return Err(anyhow!(
            "{path}: content contains the heredoc terminator {HEREDOC_MARKER}"
        ));
    }

    let script = heredoc_script(path, content);
    let result = executor.execute(sandbox, &script, WRITE_TIMEOUT).await;

    if let Some(cause) = result.transport_error {
        return Err(anyhow!("writing {path} failed: {cause}"));
    }
    if !result.succeeded() {
        return Err(anyhow!(
            "writing {path} failed (exit code {:?}): {}",
            result.exit_code,
            result.combined_output()
        ));
    }
    debug!("Wrote {} bytes to {path}", content.len());
    Ok(())
}

fn heredoc_script(path: &str, content: &str) -> String {
    let quoted = shell_quote(path);
    let dir = Path::new(path)
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| ".".to_string());
    format!(
        "mkdir -p {} && cat > {quoted} << '{HEREDOC_MARKER}'\n{content}\n{HEREDOC_MARKER}",
        shell_quote(&dir)
    )
}
