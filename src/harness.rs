//! One full run: provision, start the daemon, open a session, probe,
//! report, terminate.

use std::io::Write;

use anyhow::{Context, Result};
use chrono::Local;
use tracing::{debug, error, info, warn};

use crate::classify::Classifier;
use crate::config::Config;
use crate::daemon::{DaemonArtifacts, DaemonSetup, Readiness};
use crate::exec::RemoteExecutor;
use crate::report::{Reporter, RunCounters};
use crate::runner::TestRunner;
use crate::sandbox::{SandboxHandle, SandboxLifecycle, SandboxProvider};
use crate::session::{SessionClient, SessionId};
use crate::suite::{expand_placeholders, Suite};

const DEFAULT_TITLE: &str = "Sandbox security validation";

/// Session probes are reported right after the daemon category.
const SESSION_CATEGORY_AFTER: &str = "daemon";

pub struct ProbeHarness<'a> {
    config: &'a Config,
    artifacts: &'a DaemonArtifacts,
    executor: RemoteExecutor,
}

impl<'a> ProbeHarness<'a> {
    pub fn new(config: &'a Config, artifacts: &'a DaemonArtifacts) -> Self {
        Self {
            config,
            artifacts,
            executor: RemoteExecutor::new(),
        }
    }

    /// Runs the whole suite in a fresh sandbox and writes the report to
    /// `out`.
    ///
    /// Only a provisioning failure is an error. Daemon and session
    /// problems degrade the run; the sandbox is terminated in every case.
    pub async fn run<W: Write>(
        &self,
        provider: Box<dyn SandboxProvider>,
        mut suite: Suite,
        out: W,
    ) -> Result<(RunCounters, W)> {
        let mut lifecycle = SandboxLifecycle::new(provider);
        let spec = self.config.sandbox.spec();

        let outcome = lifecycle
            .scoped(&spec, |sandbox| async move {
                let mut reporter = Reporter::new(out, self.config.probes.max_output_chars);
                let title = suite.title.clone().unwrap_or_else(|| DEFAULT_TITLE.to_string());
                reporter.run_header(&title, sandbox.id(), Local::now());

                match self.prepare_daemon(&sandbox).await {
                    Ok(readiness) => reporter.readiness(&readiness),
                    Err(e) => reporter.daemon_setup_failed(&format!("{e:#}")),
                }
                let session = self.open_session(&sandbox, &mut suite).await;

                let classifier = Classifier::new(self.config.probes.blocked_signals());
                let runner = TestRunner::new(
                    &self.executor,
                    &classifier,
                    self.config.probes.timeout(),
                    &session,
                );
                let counters = runner.run(&sandbox, &suite.categories, &mut reporter).await;

                reporter.summary(&counters, Local::now(), suite.notes.as_deref());
                (counters, reporter.into_inner())
            })
            .await;
        debug!("Sandbox lifecycle finished in state {:?}", lifecycle.state());
        outcome.context("Sandbox provisioning failed")
    }

    /// Errors only when the daemon could not even be configured.
    async fn prepare_daemon(&self, sandbox: &SandboxHandle) -> Result<Readiness> {
        let setup = DaemonSetup::new(&self.executor, &self.config.daemon);
        match setup.start_and_wait_ready(sandbox, self.artifacts).await {
            Ok(readiness) => {
                if readiness.is_ready() {
                    info!("Daemon is ready");
                } else {
                    warn!("Daemon did not become ready, continuing in degraded mode");
                }
                Ok(readiness)
            }
            Err(e) => {
                error!("Daemon setup failed: {e:#}");
                Err(e)
            }
        }
    }

    async fn open_session(&self, sandbox: &SandboxHandle, suite: &mut Suite) -> SessionId {
        if !self.config.session.enabled {
            info!("Sessions disabled");
            return SessionId::none();
        }

        let client = SessionClient::new(
            &self.executor,
            &self.config.session,
            &self.config.daemon.binary,
        );
        let session = client.create(sandbox).await;
        info!("Session: {session}");

        let category = client.probe_category();
        if suite.has_category(&category.key) {
            warn!(
                "Suite already defines a '{}' category, built-in session cases not added",
                category.key
            );
        } else {
            suite.insert_after(SESSION_CATEGORY_AFTER, category);
        }
        session
    }

    /// Capability discovery: runs the configured detect commands and
    /// prints what each one said.
    pub async fn detect<W: Write>(&self, provider: Box<dyn SandboxProvider>, out: W) -> Result<W> {
        let mut lifecycle = SandboxLifecycle::new(provider);
        let spec = self.config.sandbox.spec();

        lifecycle
            .scoped(&spec, |sandbox| async move {
                let mut reporter = Reporter::new(out, self.config.probes.max_output_chars);
                for template in &self.config.detect.commands {
                    let command =
                        expand_placeholders(template, &[("binary", &self.config.daemon.binary)]);
                    info!("Detect: {command}");
                    let result = self
                        .executor
                        .execute(&sandbox, &command, self.config.probes.timeout())
                        .await;
                    match &result.transport_error {
                        Some(cause) => reporter.detect_error(&command, cause),
                        None => reporter.detect_output(&command, &result.stdout, &result.stderr),
                    }
                }
                reporter.into_inner()
            })
            .await
            .context("Sandbox provisioning failed")
    }
}
