//! Ephemeral sandbox environments and their lifecycle.
//!
//! A [`SandboxProvider`] creates one isolated environment per run. The
//! environment is owned by [`SandboxLifecycle`], which hands the rest of
//! the harness a [`SandboxHandle`] that can execute commands but never
//! terminate the sandbox. Termination happens exactly once, when the
//! scoped work returns, errors or panics.
//!
//! States: `Uninitialized → Provisioning → Ready → Terminating → Terminated`.

mod docker;
mod error;
#[cfg(test)]
pub(crate) mod scripted;

pub use docker::DockerProvider;
pub use error::SandboxError;

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{error, info, warn};

/// Raw output of a command that ran to completion inside a sandbox.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// What to provision.
#[derive(Debug, Clone)]
pub struct SandboxSpec {
    /// Image reference the environment is built from.
    pub image: String,
    /// Prefix for the environment name (a random suffix is appended).
    pub name_prefix: String,
    /// Hard upper bound on the environment's lifetime.
    pub lifetime: Duration,
    /// When false, the environment gets no network at all.
    pub network: bool,
}

/// A live isolated environment.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Provider-assigned identifier (container name, object id…).
    fn id(&self) -> &str;

    /// Runs `argv` inside the sandbox and waits for it to finish.
    ///
    /// Backends must stop waiting after `timeout` and return
    /// [`SandboxError::Timeout`].
    async fn exec(&self, argv: &[String], timeout: Duration) -> Result<ExecOutput, SandboxError>;

    /// Starts `argv` inside the sandbox without waiting for it.
    async fn spawn_detached(&self, argv: &[String]) -> Result<(), SandboxError>;

    /// Destroys the environment.
    async fn terminate(&self) -> Result<(), SandboxError>;
}

/// Creates sandboxes. One implementation per backend.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    async fn create(&self, spec: &SandboxSpec) -> Result<Arc<dyn Sandbox>, SandboxError>;

    /// Backend name, e.g. `"docker"`.
    fn name(&self) -> &'static str;
}

/// Execution-only view of a sandbox, handed to every component except
/// the lifecycle manager.
#[derive(Clone)]
pub struct SandboxHandle {
    inner: Arc<dyn Sandbox>,
}

impl SandboxHandle {
    pub fn id(&self) -> &str {
        self.inner.id()
    }

    pub async fn exec(&self, argv: &[String], timeout: Duration) -> Result<ExecOutput, SandboxError> {
        self.inner.exec(argv, timeout).await
    }

    pub async fn spawn_detached(&self, argv: &[String]) -> Result<(), SandboxError> {
        self.inner.spawn_detached(argv).await
    }
}

impl std::fmt::Debug for SandboxHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxHandle").field("id", &self.id()).finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Provisioning,
    Ready,
    Terminating,
    Terminated,
}

/// Sole owner of the run's sandbox.
pub struct SandboxLifecycle {
    provider: Box<dyn SandboxProvider>,
    state: LifecycleState,
}

impl SandboxLifecycle {
    pub fn new(provider: Box<dyn SandboxProvider>) -> Self {
        Self {
            provider,
            state: LifecycleState::Uninitialized,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Provisions a sandbox, runs `work` against it, then terminates it.
    ///
    /// The only error returned is a provisioning failure. Termination
    /// runs whether `work` completes or panics; a panic is re-raised
    /// after the sandbox is gone. A failed termination is logged, not
    /// returned, since the work result is already final at that point.
    pub async fn scoped<T, F, Fut>(&mut self, spec: &SandboxSpec, work: F) -> Result<T, SandboxError>
    where
        F: FnOnce(SandboxHandle) -> Fut,
        Fut: Future<Output = T>,
    {
        self.state = LifecycleState::Provisioning;
        info!(
            "Creating {} sandbox from image {}...",
            self.provider.name(),
            spec.image
        );

        let sandbox = match self.provider.create(spec).await {
            Ok(sandbox) => sandbox,
            Err(e) => {
                error!("Provisioning failed: {e}");
                self.state = LifecycleState::Terminated;
                return Err(e);
            }
        };

        self.state = LifecycleState::Ready;
        info!("Sandbox ready: {}", sandbox.id());

        let handle = SandboxHandle {
            inner: Arc::clone(&sandbox),
        };
        let outcome = AssertUnwindSafe(work(handle)).catch_unwind().await;

        self.state = LifecycleState::Terminating;
        info!("Terminating sandbox {}...", sandbox.id());
        match sandbox.terminate().await {
            Ok(()) => info!("Sandbox {} terminated", sandbox.id()),
            Err(e) => warn!("Sandbox {} may have leaked: {e}", sandbox.id()),
        }
        self.state = LifecycleState::Terminated;

        match outcome {
            Ok(value) => Ok(value),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}
