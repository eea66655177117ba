//! Run counters and the human-readable report.

use std::io::Write;

use chrono::{DateTime, Local};

use crate::classify::{truncate_output, Verdict};
use crate::daemon::Readiness;
use crate::suite::TestCategory;

/// Commands longer than this are shortened in case headers.
const COMMAND_PREVIEW_CHARS: usize = 60;

const RULE_WIDTH: usize = 70;

/// Pass/fail/error tally of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounters {
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
}

impl RunCounters {
    pub fn record(&mut self, verdict: Verdict) {
        match verdict {
            Verdict::Pass => self.passed += 1,
            Verdict::Fail => self.failed += 1,
            Verdict::Error => self.errors += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.passed + self.failed + self.errors
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0 && self.errors == 0
    }
}

/// Everything the report shows about one probe.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseOutcome {
    pub name: String,
    pub description: String,
    pub command: String,
    pub verdict: Verdict,
    pub exit_code: Option<i32>,
    /// Untruncated combined output
    pub output: String,
    pub reason: String,
}

/// Renders the report to any writer (stdout in production).
///
/// Write errors are ignored: the report is best-effort output and must
/// never abort a run.
pub struct Reporter<W: Write> {
    out: W,
    max_output_chars: usize,
}

impl<W: Write> Reporter<W> {
    pub fn new(out: W, max_output_chars: usize) -> Self {
        Self {
            out,
            max_output_chars,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn rule(&mut self) {
        let _ = writeln!(self.out, "{}", "=".repeat(RULE_WIDTH));
    }

    fn banner(&mut self, title: &str, subtitle: Option<&str>) {
        let _ = writeln!(self.out);
        self.rule();
        let _ = writeln!(self.out, "  {title}");
        if let Some(sub) = subtitle.filter(|s| !s.is_empty()) {
            let _ = writeln!(self.out, "  {sub}");
        }
        self.rule();
    }

    pub fn run_header(&mut self, title: &str, sandbox_id: &str, started: DateTime<Local>) {
        self.banner(
            title,
            Some(&format!(
                "sandbox {sandbox_id}, started {}",
                started.format("%Y-%m-%d %H:%M:%S")
            )),
        );
    }

    /// Daemon startup outcome, with diagnostics when it never came up.
    pub fn readiness(&mut self, readiness: &Readiness) {
        match readiness {
            Readiness::Ready { attempts, health } => {
                let _ = writeln!(
                    self.out,
                    "\nDaemon ready after {attempts} attempt(s): {}",
                    truncate_output(health, self.max_output_chars)
                );
            }
            Readiness::NotReady {
                attempts,
                alive,
                log_tail,
            } => {
                let process = match alive {
                    Some(true) => "running",
                    Some(false) => "not running",
                    None => "unknown",
                };
                let _ = writeln!(
                    self.out,
                    "\nDaemon NOT ready after {attempts} attempt(s), process {process}"
                );
                if let Some(tail) = log_tail {
                    let _ = writeln!(self.out, "Daemon log tail:");
                    for line in tail.lines() {
                        let _ = writeln!(self.out, "  | {line}");
                    }
                }
            }
        }
    }

    pub fn category(&mut self, category: &TestCategory) {
        self.banner(&category.title, Some(&category.description));
    }

    pub fn case(&mut self, outcome: &CaseOutcome) {
        let _ = writeln!(self.out, "\n[TEST] {}", outcome.name);
        if !outcome.description.is_empty() {
            let _ = writeln!(self.out, "       {}", outcome.description);
        }
        let _ = writeln!(
            self.out,
            "       Command: {}",
            truncate_output(&outcome.command, COMMAND_PREVIEW_CHARS)
        );

        match outcome.verdict {
            Verdict::Error => {
                let _ = writeln!(self.out, "       Error: {}", outcome.reason);
            }
            _ => {
                let output = truncate_output(&outcome.output, self.max_output_chars);
                let _ = writeln!(
                    self.out,
                    "       Output: {}",
                    if output.is_empty() { "(no output)" } else { output.as_str() }
                );
                if let Some(code) = outcome.exit_code {
                    let _ = writeln!(self.out, "       Exit code: {code}");
                }
                let _ = writeln!(self.out, "       Reason: {}", outcome.reason);
            }
        }
        let _ = writeln!(self.out, "       Result: [{}]", outcome.verdict.label());
    }

    /// Final summary. Always printed, even after a degraded run.
    pub fn summary(&mut self, counters: &RunCounters, finished: DateTime<Local>, notes: Option<&str>) {
        self.banner("SUMMARY", None);
        let _ = writeln!(self.out);
        let _ = writeln!(self.out, "    Tests passed: {}", counters.passed);
        let _ = writeln!(self.out, "    Tests failed: {}", counters.failed);
        let _ = writeln!(self.out, "    Errors:       {}", counters.errors);
        let _ = writeln!(self.out, "    Total:        {}", counters.total());
        let _ = writeln!(
            self.out,
            "    Finished:     {}",
            finished.format("%Y-%m-%d %H:%M:%S")
        );
        if let Some(notes) = notes.filter(|n| !n.trim().is_empty()) {
            let _ = writeln!(self.out);
            for line in notes.lines() {
                let _ = writeln!(self.out, "    {line}");
            }
        }
        let _ = writeln!(self.out);
        let _ = self.out.flush();
    }

    pub fn detect_output(&mut self, command: &str, stdout: &str, stderr: &str) {
        let _ = writeln!(self.out, "\n=== {command} ===");
        let _ = writeln!(self.out, "{}", stdout.trim_end());
        if !stderr.trim().is_empty() {
            let _ = writeln!(self.out, "stderr: {}", stderr.trim_end());
        }
    }

    /// A detect command that never produced output.
    pub fn detect_error(&mut self, command: &str, cause: &str) {
        let _ = writeln!(self.out, "\n=== {command} ===");
        let _ = writeln!(self.out, "error: {cause}");
    }

    /// Daemon could not even be configured.
    pub fn daemon_setup_failed(&mut self, cause: &str) {
        let _ = writeln!(self.out, "\nDaemon setup failed: {cause}");
        let _ = writeln!(self.out, "Continuing without a daemon; daemon probes will fail.");
    }
}
