use std::io::Write;
use std::time::Duration;

use tracing::{debug, info};

use crate::classify::{Classifier, Observed, Verdict};
use crate::exec::RemoteExecutor;
use crate::report::{CaseOutcome, Reporter, RunCounters};
use crate::sandbox::SandboxHandle;
use crate::session::SessionId;
use crate::suite::{TestCase, TestCategory};

/// Drives the probe suite: one remote execution and one counter
/// increment per declared case, in declaration order.
pub struct TestRunner<'a> {
    executor: &'a RemoteExecutor,
    classifier: &'a Classifier,
    default_timeout: Duration,
    session: &'a SessionId,
}

impl<'a> TestRunner<'a> {
    pub fn new(
        executor: &'a RemoteExecutor,
        classifier: &'a Classifier,
        default_timeout: Duration,
        session: &'a SessionId,
    ) -> Self {
        Self {
            executor,
            classifier,
            default_timeout,
            session,
        }
    }

    /// Runs every case of every category. A failing or erroring case
    /// never stops the run.
    pub async fn run<W: Write>(
        &self,
        sandbox: &SandboxHandle,
        categories: &[TestCategory],
        reporter: &mut Reporter<W>,
    ) -> RunCounters {
        let mut counters = RunCounters::default();

        for category in categories {
            info!("Category: {} ({} cases)", category.title, category.cases.len());
            reporter.category(category);

            for case in &category.cases {
                let outcome = self.run_case(sandbox, case).await;
                debug!("{} → {}", case.name, outcome.verdict.label());
                counters.record(outcome.verdict);
                reporter.case(&outcome);
            }
        }

        info!(
            "Run complete: {} passed, {} failed, {} errors",
            counters.passed, counters.failed, counters.errors
        );
        counters
    }

    async fn run_case(&self, sandbox: &SandboxHandle, case: &TestCase) -> CaseOutcome {
        let mut outcome = CaseOutcome {
            name: case.name.clone(),
            description: case.description.clone(),
            command: case.command.clone(),
            verdict: Verdict::Fail,
            exit_code: None,
            output: String::new(),
            reason: String::new(),
        };

        if case.requires_session {
            if self.session.is_empty() {
                outcome.reason = "skipped: no session".to_string();
                return outcome;
            }
            outcome.command = self.session.fill(&case.command);
        }

        let timeout = case
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);
        let result = self.executor.execute(sandbox, &outcome.command, timeout).await;

        let exit_code = match (result.exit_code, &result.transport_error) {
            (Some(code), None) => code,
            (_, cause) => {
                outcome.verdict = Verdict::Error;
                outcome.reason = cause
                    .clone()
                    .unwrap_or_else(|| "no exit code reported".to_string());
                return outcome;
            }
        };

        let output = result.combined_output();
        let classification = self.classifier.classify(
            case.expect,
            case.require_output,
            Observed {
                exit_code,
                output: &output,
            },
        );

        outcome.verdict = classification.verdict;
        outcome.reason = classification.reason;
        outcome.exit_code = Some(exit_code);
        outcome.output = output;
        outcome
    }
}
