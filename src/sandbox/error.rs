use std::time::Duration;

use thiserror::Error;

/// Errors raised by a sandbox backend.
///
/// Only `Provisioning` is fatal to a run; the other variants are
/// per-call failures that the executor turns into transport errors.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("sandbox provisioning failed: {0}")]
    Provisioning(String),

    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    #[error("sandbox transport error: {0}")]
    Transport(String),

    #[error("sandbox termination failed: {0}")]
    Termination(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
