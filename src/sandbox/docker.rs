//! Docker-backed sandbox driven through the `docker` CLI.
//!
//! The container runs `sleep <lifetime>` with `--rm`, so a sandbox that
//! somehow escapes termination still disappears once its lifetime ends.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{ExecOutput, Sandbox, SandboxError, SandboxProvider, SandboxSpec};

/// Default bound on `docker run` (which may pull the image).
pub const DEFAULT_CREATE_TIMEOUT: Duration = Duration::from_secs(300);

/// Bound on `docker rm -f`.
const REMOVE_TIMEOUT: Duration = Duration::from_secs(60);

/// Creates containers with `docker run -d`.
pub struct DockerProvider {
    docker_bin: String,
    create_timeout: Duration,
}

impl DockerProvider {
    pub fn new() -> Self {
        Self {
            docker_bin: "docker".to_string(),
            create_timeout: DEFAULT_CREATE_TIMEOUT,
        }
    }

    pub fn with_create_timeout(mut self, timeout: Duration) -> Self {
        self.create_timeout = timeout;
        self
    }

    fn run_args(spec: &SandboxSpec, name: &str) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            name.to_string(),
        ];
        if !spec.network {
            args.push("--network=none".to_string());
        }
        args.push(spec.image.clone());
        args.extend(["sleep".to_string(), spec.lifetime.as_secs().max(1).to_string()]);
        args
    }
}

#[async_trait]
impl SandboxProvider for DockerProvider {
    async fn create(&self, spec: &SandboxSpec) -> Result<Arc<dyn Sandbox>, SandboxError> {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let name = format!("{}-{}", spec.name_prefix, &suffix[..12]);

        let mut run = Command::new(&self.docker_bin);
        run.args(Self::run_args(spec, &name))
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let failure = match tokio::time::timeout(self.create_timeout, run.output()).await {
            Ok(Ok(output)) if output.status.success() => {
                debug!(
                    "Container {name} started ({})",
                    String::from_utf8_lossy(&output.stdout).trim()
                );
                None
            }
            Ok(Ok(output)) => Some(format!(
                "docker run failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )),
            Ok(Err(e)) => {
                return Err(SandboxError::Provisioning(format!(
                    "cannot run {}: {e}",
                    self.docker_bin
                )))
            }
            Err(_) => Some(format!(
                "docker run did not finish within {}s",
                self.create_timeout.as_secs()
            )),
        };

        if let Some(reason) = failure {
            // A failed or abandoned `run` can still leave a container behind.
            if let Err(e) = remove_container(&self.docker_bin, &name).await {
                warn!("Cleanup of {name} failed: {e}");
            }
            return Err(SandboxError::Provisioning(reason));
        }

        Ok(Arc::new(DockerSandbox {
            docker_bin: self.docker_bin.clone(),
            name,
        }))
    }

    fn name(&self) -> &'static str {
        "docker"
    }
}

/// A running container.
pub struct DockerSandbox {
    docker_bin: String,
    name: String,
}

impl DockerSandbox {
    fn exec_args(&self, detach: bool, argv: &[String]) -> Vec<String> {
        let mut args = vec!["exec".to_string()];
        if detach {
            args.push("-d".to_string());
        }
        args.push(self.name.clone());
        args.extend(argv.iter().cloned());
        args
    }

    /// `exec` args for a bounded command. Killing the local `docker exec`
    /// client does not stop the process in the container, so the command
    /// runs under coreutils `timeout` there as well.
    fn bounded_exec_args(&self, argv: &[String], timeout: Duration) -> Vec<String> {
        let secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
        let mut bounded = vec![
            "timeout".to_string(),
            "-s".to_string(),
            "KILL".to_string(),
            secs.max(1).to_string(),
        ];
        bounded.extend(argv.iter().cloned());
        self.exec_args(false, &bounded)
    }
}

#[async_trait]
impl Sandbox for DockerSandbox {
    fn id(&self) -> &str {
        &self.name
    }

    async fn exec(&self, argv: &[String], timeout: Duration) -> Result<ExecOutput, SandboxError> {
        let child = Command::new(&self.docker_bin)
            .args(self.bounded_exec_args(argv, timeout))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(ExecOutput {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                // Killed by a signal: no exit code to report
                exit_code: output.status.code().unwrap_or(-1),
            }),
            Ok(Err(e)) => Err(SandboxError::Transport(format!("docker exec failed: {e}"))),
            Err(_) => Err(SandboxError::Timeout(timeout)),
        }
    }

    async fn spawn_detached(&self, argv: &[String]) -> Result<(), SandboxError> {
        // `exec -d` returns as soon as the process is started; the child
        // handle is dropped and reaped by tokio in the background.
        Command::new(&self.docker_bin)
            .args(self.exec_args(true, argv))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        Ok(())
    }

    async fn terminate(&self) -> Result<(), SandboxError> {
        remove_container(&self.docker_bin, &self.name).await
    }
}

/// `docker rm -f`, bounded by [`REMOVE_TIMEOUT`].
async fn remove_container(docker_bin: &str, name: &str) -> Result<(), SandboxError> {
    let mut rm = Command::new(docker_bin);
    rm.args(["rm", "-f", name])
        .stdin(Stdio::null())
        .kill_on_drop(true);

    match tokio::time::timeout(REMOVE_TIMEOUT, rm.output()).await {
        Ok(Ok(output)) if output.status.success() => Ok(()),
        Ok(Ok(output)) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("docker rm -f {name} failed: {}", stderr.trim());
            Err(SandboxError::Termination(stderr.trim().to_string()))
        }
        Ok(Err(e)) => Err(SandboxError::Io(e)),
        Err(_) => Err(SandboxError::Termination(format!(
            "docker rm -f {name} did not finish within {}s",
            REMOVE_TIMEOUT.as_secs()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(network: bool) -> SandboxSpec {
        SandboxSpec {
            image: "debian:bookworm-slim".to_string(),
            name_prefix: "probe".to_string(),
            lifetime: Duration::from_secs(1800),
            network,
        }
    }

    #[test]
    fn test_run_args_with_network() {
        let args = DockerProvider::run_args(&spec(true), "probe-abc");
        assert_eq!(
            args,
            vec!["run", "-d", "--rm", "--name", "probe-abc", "debian:bookworm-slim", "sleep", "1800"]
        );
    }

    #[test]
    fn test_run_args_without_network() {
        let args = DockerProvider::run_args(&spec(false), "probe-abc");
        assert!(args.contains(&"--network=none".to_string()));
        // The image must come before the command
        let image_pos = args.iter().position(|a| a == "debian:bookworm-slim").unwrap();
        let sleep_pos = args.iter().position(|a| a == "sleep").unwrap();
        assert!(image_pos < sleep_pos);
    }

    #[test]
    fn test_run_args_zero_lifetime_clamped() {
        let mut s = spec(true);
        s.lifetime = Duration::from_millis(10);
        let args = DockerProvider::run_args(&s, "x");
        assert_eq!(args.last().unwrap(), "1");
    }

    #[test]
    fn test_bounded_exec_args_kill_inside_container() {
        let sandbox = DockerSandbox {
            docker_bin: "docker".to_string(),
            name: "probe-abc".to_string(),
        };
        let argv = vec!["bash".to_string(), "-c".to_string(), "sleep 600".to_string()];
        assert_eq!(
            sandbox.bounded_exec_args(&argv, Duration::from_secs(30)),
            vec!["exec", "probe-abc", "timeout", "-s", "KILL", "30", "bash", "-c", "sleep 600"]
        );
    }

    #[test]
    fn test_bounded_exec_args_rounds_up() {
        let sandbox = DockerSandbox {
            docker_bin: "docker".to_string(),
            name: "probe-abc".to_string(),
        };
        let argv = vec!["true".to_string()];
        assert_eq!(sandbox.bounded_exec_args(&argv, Duration::from_millis(1500))[5], "2");
        assert_eq!(sandbox.bounded_exec_args(&argv, Duration::from_millis(10))[5], "1");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_create_times_out_as_provisioning_error() {
        // A docker binary that hangs like a stalled image pull
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("docker");
        std::fs::write(&fake, "#!/bin/sh\n[ \"$1\" = run ] && sleep 30\nexit 0\n").unwrap();
        std::fs::set_permissions(&fake, std::os::unix::fs::PermissionsExt::from_mode(0o755))
            .unwrap();

        let provider = DockerProvider {
            docker_bin: fake.to_string_lossy().into_owned(),
            create_timeout: Duration::from_millis(200),
        };
        let started = std::time::Instant::now();
        let err = match provider.create(&spec(true)).await {
            Ok(_) => panic!("create should time out"),
            Err(e) => e,
        };

        assert!(matches!(err, SandboxError::Provisioning(ref m) if m.contains("did not finish")));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_exec_args_detached() {
        let sandbox = DockerSandbox {
            docker_bin: "docker".to_string(),
            name: "probe-abc".to_string(),
        };
        let argv = vec!["sh".to_string(), "-c".to_string(), "true".to_string()];
        assert_eq!(
            sandbox.exec_args(true, &argv),
            vec!["exec", "-d", "probe-abc", "sh", "-c", "true"]
        );
        assert_eq!(
            sandbox.exec_args(false, &argv),
            vec!["exec", "probe-abc", "sh", "-c", "true"]
        );
    }
}
