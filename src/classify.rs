//! Pass/fail judgment of a completed probe against its declared expectation.
//!
//! The `Blocked` rule is a deliberate union: a nonzero exit or any
//! configured signal in the output counts as blocked. It covers network
//! refusal, policy denial and missing files with one rule, at the cost
//! of occasional false positives.

use serde::Deserialize;

/// What the probe author expects to observe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpectedOutcome {
    Success,
    Blocked,
    /// Informational probe, always passes.
    #[default]
    #[serde(alias = "info")]
    Unconstrained,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail,
    /// Execution itself did not complete. Never produced by [`Classifier`].
    Error,
}

impl Verdict {
    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Pass => "PASS",
            Verdict::Fail => "FAIL",
            Verdict::Error => "ERROR",
        }
    }
}

/// Output substrings that indicate a blocked operation.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockedSignals {
    /// Matched case-insensitively.
    pub substrings: Vec<String>,
    /// Treat a probe that printed nothing as blocked.
    pub empty_output_is_blocked: bool,
}

impl Default for BlockedSignals {
    fn default() -> Self {
        Self {
            substrings: ["blocked", "denied", "permission", "400", "not found"]
                .into_iter()
                .map(String::from)
                .collect(),
            empty_output_is_blocked: false,
        }
    }
}

impl BlockedSignals {
    /// Returns the first signal found in `output`.
    pub fn find(&self, output: &str) -> Option<&str> {
        let lower = output.to_lowercase();
        self.substrings
            .iter()
            .find(|s| !s.is_empty() && lower.contains(&s.to_lowercase()))
            .map(String::as_str)
    }
}

/// A probe that ran to completion.
#[derive(Debug, Clone, Copy)]
pub struct Observed<'a> {
    pub exit_code: i32,
    /// Full, untruncated stdout + stderr.
    pub output: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub verdict: Verdict,
    pub reason: String,
}

impl Classification {
    fn pass(reason: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Pass,
            reason: reason.into(),
        }
    }

    fn fail(reason: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Fail,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Classifier {
    signals: BlockedSignals,
}

impl Classifier {
    pub fn new(signals: BlockedSignals) -> Self {
        Self { signals }
    }

    /// Judges a completed probe. Yields only `Pass` or `Fail`.
    ///
    /// `require_output` additionally fails a `Success` probe that
    /// exited 0 without printing anything.
    pub fn classify(
        &self,
        expected: ExpectedOutcome,
        require_output: bool,
        observed: Observed<'_>,
    ) -> Classification {
        match expected {
            ExpectedOutcome::Success => {
                if observed.exit_code != 0 {
                    Classification::fail(format!(
                        "expected success, got exit code {}",
                        observed.exit_code
                    ))
                } else if require_output && observed.output.trim().is_empty() {
                    Classification::fail("exit code 0 but no output")
                } else {
                    Classification::pass("exit code 0")
                }
            }
            ExpectedOutcome::Blocked => {
                if observed.exit_code != 0 {
                    Classification::pass(format!("blocked (exit code {})", observed.exit_code))
                } else if let Some(signal) = self.signals.find(observed.output) {
                    Classification::pass(format!("blocked ('{signal}' in output)"))
                } else if self.signals.empty_output_is_blocked && observed.output.trim().is_empty() {
                    Classification::pass("blocked (no output)")
                } else {
                    Classification::fail("expected blocked, but command succeeded")
                }
            }
            ExpectedOutcome::Unconstrained => Classification::pass("informational"),
        }
    }
}

/// Cuts `text` to `max` characters, marking the cut with `...`.
pub fn truncate_output(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let mut cut: String = text.chars().take(max).collect();
        cut.push_str("...");
        cut
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observed(exit_code: i32, output: &str) -> Observed<'_> {
        Observed { exit_code, output }
    }

    fn verdict(expected: ExpectedOutcome, exit_code: i32, output: &str) -> Verdict {
        Classifier::default()
            .classify(expected, false, observed(exit_code, output))
            .verdict
    }

    // ── Success ─────────────────────────────────────────

    #[test]
    fn test_success_passes_on_exit_zero() {
        assert_eq!(verdict(ExpectedOutcome::Success, 0, "ok"), Verdict::Pass);
    }

    #[test]
    fn test_success_fails_on_nonzero_exit() {
        for code in [1, 2, 7, 127, -1] {
            assert_eq!(verdict(ExpectedOutcome::Success, code, "ok"), Verdict::Fail);
        }
    }

    #[test]
    fn test_success_ignores_blocked_words() {
        // Exit code alone decides
        assert_eq!(
            verdict(ExpectedOutcome::Success, 0, "permission denied"),
            Verdict::Pass
        );
    }

    #[test]
    fn test_success_require_output() {
        let c = Classifier::default();
        let empty = c.classify(ExpectedOutcome::Success, true, observed(0, "  \n"));
        assert_eq!(empty.verdict, Verdict::Fail);
        assert!(empty.reason.contains("no output"));

        let full = c.classify(ExpectedOutcome::Success, true, observed(0, "{\"status\":\"ok\"}"));
        assert_eq!(full.verdict, Verdict::Pass);
    }

    // ── Blocked ─────────────────────────────────────────

    #[test]
    fn test_blocked_passes_on_nonzero_exit() {
        // curl to the metadata endpoint: connection refused
        assert_eq!(verdict(ExpectedOutcome::Blocked, 7, ""), Verdict::Pass);
    }

    #[test]
    fn test_blocked_passes_on_each_signal() {
        for output in [
            "request BLOCKED by policy",
            "Permission denied",
            "operation not permitted: permission",
            "HTTP/1.1 400 Bad Request",
            "ls: /host: Not Found",
        ] {
            assert_eq!(
                verdict(ExpectedOutcome::Blocked, 0, output),
                Verdict::Pass,
                "output: {output}"
            );
        }
    }

    #[test]
    fn test_blocked_fails_when_command_succeeds_cleanly() {
        let c = Classifier::default().classify(
            ExpectedOutcome::Blocked,
            false,
            observed(0, "ami-id\nhostname"),
        );
        assert_eq!(c.verdict, Verdict::Fail);
        assert!(c.reason.contains("expected blocked"));
    }

    #[test]
    fn test_blocked_empty_output_rule() {
        assert_eq!(verdict(ExpectedOutcome::Blocked, 0, ""), Verdict::Fail);

        let strict = Classifier::new(BlockedSignals {
            empty_output_is_blocked: true,
            ..BlockedSignals::default()
        });
        assert_eq!(
            strict
                .classify(ExpectedOutcome::Blocked, false, observed(0, ""))
                .verdict,
            Verdict::Pass
        );
    }

    #[test]
    fn test_blocked_custom_signals() {
        let c = Classifier::new(BlockedSignals {
            substrings: vec!["Connection refused".to_string()],
            empty_output_is_blocked: false,
        });
        let r = c.classify(
            ExpectedOutcome::Blocked,
            false,
            observed(0, "curl: connection REFUSED"),
        );
        assert_eq!(r.verdict, Verdict::Pass);
        assert!(r.reason.contains("Connection refused"));
        // Default signals no longer apply
        assert_eq!(
            c.classify(ExpectedOutcome::Blocked, false, observed(0, "denied"))
                .verdict,
            Verdict::Fail
        );
    }

    // ── Unconstrained ───────────────────────────────────

    #[test]
    fn test_unconstrained_always_passes() {
        for code in [0, 1, 255] {
            assert_eq!(verdict(ExpectedOutcome::Unconstrained, code, "x"), Verdict::Pass);
        }
    }

    #[test]
    fn test_expected_outcome_deserialize() {
        #[derive(Deserialize)]
        struct Wrap {
            expect: ExpectedOutcome,
        }
        let parse = |s: &str| toml::from_str::<Wrap>(&format!("expect = \"{s}\"")).unwrap().expect;
        assert_eq!(parse("success"), ExpectedOutcome::Success);
        assert_eq!(parse("blocked"), ExpectedOutcome::Blocked);
        assert_eq!(parse("unconstrained"), ExpectedOutcome::Unconstrained);
        assert_eq!(parse("info"), ExpectedOutcome::Unconstrained);
        assert!(toml::from_str::<Wrap>("expect = \"maybe\"").is_err());
    }

    // ── truncate_output ─────────────────────────────────

    #[test]
    fn test_truncate_output() {
        assert_eq!(truncate_output("short", 200), "short");
        let exact = "a".repeat(200);
        assert_eq!(truncate_output(&exact, 200), exact);
        let long = "b".repeat(201);
        let cut = truncate_output(&long, 200);
        assert_eq!(cut.len(), 203);
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn test_truncate_output_multibyte() {
        let text = "é".repeat(250);
        let cut = truncate_output(&text, 200);
        assert_eq!(cut.chars().count(), 203);
    }

    #[test]
    fn test_classification_uses_untruncated_output() {
        // The signal sits past the display cut-off
        let output = format!("{}permission denied", "x".repeat(300));
        assert!(truncate_output(&output, 200).find("permission").is_none());
        assert_eq!(verdict(ExpectedOutcome::Blocked, 0, &output), Verdict::Pass);
    }
}
