//! In-memory sandbox double for tests.
//!
//! Commands are matched against rules by substring of the joined argv;
//! the first matching rule answers. A rule holding several replies hands
//! them out in order and repeats the last one.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{ExecOutput, Sandbox, SandboxError, SandboxProvider, SandboxSpec};

#[derive(Debug, Clone)]
pub enum Reply {
    Exit { code: i32, stdout: String, stderr: String },
    /// Never answers within the caller's timeout.
    Hang,
    Transport(String),
}

impl Reply {
    pub fn ok(stdout: &str) -> Self {
        Reply::Exit {
            code: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    pub fn exit(code: i32, stdout: &str, stderr: &str) -> Self {
        Reply::Exit {
            code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }
}

struct Rule {
    pattern: String,
    replies: VecDeque<Reply>,
}

#[derive(Default)]
struct State {
    rules: Vec<Rule>,
    executed: Vec<String>,
    spawned: Vec<String>,
}

#[derive(Clone, Default)]
pub struct ScriptedSandbox {
    state: Arc<Mutex<State>>,
    terminations: Arc<AtomicUsize>,
    fail_terminate: bool,
}

impl ScriptedSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rule(self, pattern: &str, reply: Reply) -> Self {
        self.rule_seq(pattern, vec![reply])
    }

    pub fn rule_seq(self, pattern: &str, replies: Vec<Reply>) -> Self {
        self.state.lock().unwrap().rules.push(Rule {
            pattern: pattern.to_string(),
            replies: replies.into(),
        });
        self
    }

    pub fn with_failing_terminate(mut self) -> Self {
        self.fail_terminate = true;
        self
    }

    pub fn terminations(&self) -> usize {
        self.terminations.load(Ordering::SeqCst)
    }

    /// Every command passed to `exec`, argv joined with spaces.
    pub fn executed(&self) -> Vec<String> {
        self.state.lock().unwrap().executed.clone()
    }

    pub fn spawned(&self) -> Vec<String> {
        self.state.lock().unwrap().spawned.clone()
    }

    pub fn count_matching(&self, needle: &str) -> usize {
        self.executed().iter().filter(|c| c.contains(needle)).count()
    }

    fn next_reply(&self, command: &str) -> Reply {
        let mut state = self.state.lock().unwrap();
        state.executed.push(command.to_string());
        for rule in state.rules.iter_mut() {
            if command.contains(&rule.pattern) {
                return if rule.replies.len() > 1 {
                    rule.replies.pop_front().unwrap()
                } else {
                    rule.replies.front().cloned().unwrap_or_else(|| Reply::ok(""))
                };
            }
        }
        Reply::ok("")
    }
}

#[async_trait]
impl Sandbox for ScriptedSandbox {
    fn id(&self) -> &str {
        "scripted-0001"
    }

    async fn exec(&self, argv: &[String], timeout: Duration) -> Result<ExecOutput, SandboxError> {
        match self.next_reply(&argv.join(" ")) {
            Reply::Exit { code, stdout, stderr } => Ok(ExecOutput {
                stdout,
                stderr,
                exit_code: code,
            }),
            Reply::Hang => {
                tokio::time::sleep(timeout + Duration::from_secs(5)).await;
                Err(SandboxError::Timeout(timeout))
            }
            Reply::Transport(msg) => Err(SandboxError::Transport(msg)),
        }
    }

    async fn spawn_detached(&self, argv: &[String]) -> Result<(), SandboxError> {
        self.state.lock().unwrap().spawned.push(argv.join(" "));
        Ok(())
    }

    async fn terminate(&self) -> Result<(), SandboxError> {
        self.terminations.fetch_add(1, Ordering::SeqCst);
        if self.fail_terminate {
            return Err(SandboxError::Termination("container already gone".into()));
        }
        Ok(())
    }
}

pub struct ScriptedProvider {
    sandbox: ScriptedSandbox,
    failure: Option<String>,
}

impl ScriptedProvider {
    pub fn new(sandbox: ScriptedSandbox) -> Self {
        Self {
            sandbox,
            failure: None,
        }
    }

    pub fn failing(sandbox: ScriptedSandbox, reason: &str) -> Self {
        Self {
            sandbox,
            failure: Some(reason.to_string()),
        }
    }
}

#[async_trait]
impl SandboxProvider for ScriptedProvider {
    async fn create(&self, _spec: &SandboxSpec) -> Result<Arc<dyn Sandbox>, SandboxError> {
        match &self.failure {
            Some(reason) => Err(SandboxError::Provisioning(reason.clone())),
            None => Ok(Arc::new(self.sandbox.clone())),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
