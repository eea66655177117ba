use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::classify::BlockedSignals;
use crate::daemon::ReadinessMode;
use crate::sandbox::SandboxSpec;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub sandbox: SandboxConfig,
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub probes: ProbeConfig,
    #[serde(default)]
    pub suite: SuiteConfig,
    #[serde(default)]
    pub detect: DetectConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SandboxConfig {
    /// Only "docker" is supported for now
    #[serde(default = "default_provider")]
    pub provider: String,
    pub image: String,
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,
    /// Hard cap on the sandbox lifetime
    #[serde(default = "default_lifetime_secs")]
    pub lifetime_secs: u64,
    #[serde(default = "default_true")]
    pub network: bool,
    /// Bound on sandbox creation, image pull included
    #[serde(default = "default_create_timeout_secs")]
    pub create_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DaemonConfig {
    #[serde(default = "default_daemon_binary")]
    pub binary: String,
    /// Local server config, copied verbatim into the sandbox
    pub config_file: PathBuf,
    /// Local policy document, copied verbatim into the sandbox
    pub policy_file: PathBuf,
    #[serde(default = "default_remote_config_path")]
    pub remote_config_path: String,
    #[serde(default = "default_remote_policy_path")]
    pub remote_policy_path: String,
    /// Base URL of the daemon as seen from inside the sandbox
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_log_path")]
    pub log_path: String,
    #[serde(default)]
    pub readiness: ReadinessMode,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Shell-shim install command, run before the daemon starts.
    /// Omit to run in proxy-only mode.
    #[serde(default)]
    pub shim_command: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_workspace")]
    pub workspace: String,
    /// Supports {binary} and {workspace} placeholders
    #[serde(default = "default_create_command")]
    pub create_command: String,
    /// Supports {binary} and {session_id} placeholders
    #[serde(default = "default_info_command")]
    pub info_command: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProbeConfig {
    #[serde(default = "default_probe_timeout_secs")]
    pub timeout_secs: u64,
    /// Output longer than this is cut in the report
    #[serde(default = "default_max_output_chars")]
    pub max_output_chars: usize,
    #[serde(default = "default_blocked_signals")]
    pub blocked_signals: Vec<String>,
    #[serde(default)]
    pub empty_output_is_blocked: bool,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SuiteConfig {
    /// TOML suite file; the built-in suite is used when absent
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DetectConfig {
    /// Supports the {binary} placeholder
    #[serde(default = "default_detect_commands")]
    pub commands: Vec<String>,
}

fn default_provider() -> String {
    "docker".to_string()
}

fn default_name_prefix() -> String {
    "sandbox-probe".to_string()
}

fn default_lifetime_secs() -> u64 {
    30 * 60
}

fn default_create_timeout_secs() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

fn default_daemon_binary() -> String {
    "agentsh".to_string()
}

fn default_remote_config_path() -> String {
    "/etc/agentsh/config.yaml".to_string()
}

fn default_remote_policy_path() -> String {
    "/etc/agentsh/policies/default.yaml".to_string()
}

fn default_base_url() -> String {
    "http://127.0.0.1:18080".to_string()
}

fn default_log_path() -> String {
    "/var/log/agentsh/agentsh.log".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_workspace() -> String {
    "/root".to_string()
}

fn default_create_command() -> String {
    "{binary} session create --workspace {workspace} --json 2>&1".to_string()
}

fn default_info_command() -> String {
    "{binary} session info {session_id} --json 2>&1 | head -c 200".to_string()
}

fn default_probe_timeout_secs() -> u64 {
    30
}

fn default_max_output_chars() -> usize {
    200
}

fn default_blocked_signals() -> Vec<String> {
    BlockedSignals::default().substrings
}

fn default_detect_commands() -> Vec<String> {
    vec![
        "{binary} --version".to_string(),
        "{binary} detect".to_string(),
        "{binary} detect config".to_string(),
    ]
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            workspace: default_workspace(),
            create_command: default_create_command(),
            info_command: default_info_command(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_probe_timeout_secs(),
            max_output_chars: default_max_output_chars(),
            blocked_signals: default_blocked_signals(),
            empty_output_is_blocked: false,
        }
    }
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            commands: default_detect_commands(),
        }
    }
}

impl SandboxConfig {
    pub fn create_timeout(&self) -> Duration {
        Duration::from_secs(self.create_timeout_secs)
    }

    pub fn spec(&self) -> SandboxSpec {
        SandboxSpec {
            image: self.image.clone(),
            name_prefix: self.name_prefix.clone(),
            lifetime: Duration::from_secs(self.lifetime_secs),
            network: self.network,
        }
    }
}

impl DaemonConfig {
    /// Full URL of a daemon endpoint, e.g. `endpoint("health")`.
    pub fn endpoint(&self, path: &str) -> anyhow::Result<url::Url> {
        let mut base = url::Url::parse(&self.base_url)?;
        // Url::join drops the last segment unless the base ends with '/'
        if !base.path().ends_with('/') {
            let with_slash = format!("{}/", base.path());
            base.set_path(&with_slash);
        }
        Ok(base.join(path.trim_start_matches('/'))?)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn blocked_signals(&self) -> BlockedSignals {
        BlockedSignals {
            substrings: self.blocked_signals.clone(),
            empty_output_is_blocked: self.empty_output_is_blocked,
        }
    }
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        // Expand environment variables like ${PROBE_IMAGE}
        let expanded = shellexpand::env(&content)?;
        let config: Config = toml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.sandbox.provider != "docker" {
            anyhow::bail!(
                "Unsupported sandbox provider: '{}'. Supported: 'docker'.",
                self.sandbox.provider
            );
        }
        if self.sandbox.create_timeout_secs == 0 {
            anyhow::bail!("sandbox.create_timeout_secs must be greater than zero");
        }
        if self.probes.timeout_secs == 0 {
            anyhow::bail!("probes.timeout_secs must be greater than zero");
        }
        self.daemon.endpoint("health")?;
        Ok(())
    }
}
