//! Scripted runner that records requests instead of spawning processes
//!
//! Responses are matched against the rendered command line by substring, in
//! registration order. Unmatched requests succeed with no output.

use super::{CommandRunner, ExecutionRequest};
use crate::error::{ClusterError, Result};
use parking_lot::Mutex;

#[derive(Debug, Clone)]
enum Outcome {
    Output(String),
    Exit(i32),
    SpawnFailure,
}

#[derive(Debug)]
struct Rule {
    needle: String,
    outcome: Outcome,
    remaining: Option<usize>,
}

#[derive(Debug, Default)]
pub struct RecordingRunner {
    requests: Mutex<Vec<ExecutionRequest>>,
    launched: Mutex<Vec<ExecutionRequest>>,
    rules: Mutex<Vec<Rule>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&self, needle: &str, outcome: Outcome, remaining: Option<usize>) -> &Self {
        self.rules.lock().push(Rule { needle: needle.to_string(), outcome, remaining });
        self
    }

    /// Answer every matching request with `output`
    pub fn reply(&self, needle: &str, output: &str) -> &Self {
        self.add(needle, Outcome::Output(output.to_string()), None)
    }

    /// Answer the next matching request with `output`, then stop matching
    pub fn reply_once(&self, needle: &str, output: &str) -> &Self {
        self.add(needle, Outcome::Output(output.to_string()), Some(1))
    }

    /// Fail every matching request with a non-zero exit
    pub fn fail(&self, needle: &str, exit_code: i32) -> &Self {
        self.add(needle, Outcome::Exit(exit_code), None)
    }

    /// Fail every matching request as if the program did not exist
    pub fn fail_spawn(&self, needle: &str) -> &Self {
        self.add(needle, Outcome::SpawnFailure, None)
    }

    /// Requests run to completion, in call order
    pub fn requests(&self) -> Vec<ExecutionRequest> {
        self.requests.lock().clone()
    }

    /// Requests started detached, in call order
    pub fn launched(&self) -> Vec<ExecutionRequest> {
        self.launched.lock().clone()
    }

    /// Rendered command lines of completed requests
    pub fn command_lines(&self) -> Vec<String> {
        self.requests.lock().iter().map(ExecutionRequest::command_line).collect()
    }

    fn outcome_for(&self, request: &ExecutionRequest) -> Option<Outcome> {
        let line = request.command_line();
        let mut rules = self.rules.lock();
        let rule = rules
            .iter_mut()
            .find(|r| r.remaining != Some(0) && line.contains(&r.needle))?;
        if let Some(remaining) = rule.remaining.as_mut() {
            *remaining -= 1;
        }
        Some(rule.outcome.clone())
    }

    fn resolve(&self, request: &ExecutionRequest) -> Result<Option<String>> {
        match self.outcome_for(request) {
            None => Ok(None),
            Some(Outcome::Output(output)) if output.is_empty() => Ok(None),
            Some(Outcome::Output(output)) => Ok(Some(output)),
            Some(Outcome::Exit(code)) => Err(ClusterError::CommandExecution {
                program: request.program.clone(),
                exit_code: Some(code),
            }),
            Some(Outcome::SpawnFailure) => Err(ClusterError::Spawn {
                program: request.program.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "program not found"),
            }),
        }
    }
}

impl CommandRunner for RecordingRunner {
    async fn run(&self, request: &ExecutionRequest) -> Result<Option<String>> {
        self.requests.lock().push(request.clone());
        self.resolve(request)
    }

    fn launch(&self, request: &ExecutionRequest) -> Result<()> {
        self.launched.lock().push(request.clone());
        self.resolve(request).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ExecutionMode;

    fn req(program: &str, args: &[&str]) -> ExecutionRequest {
        ExecutionRequest::new(
            program,
            args.iter().map(|s| s.to_string()).collect(),
            ExecutionMode::Captured,
        )
    }

    #[tokio::test]
    async fn test_reply_once_then_default() {
        let runner = RecordingRunner::new();
        runner.reply_once("ps aux", "first");

        assert_eq!(runner.run(&req("ps", &["aux"])).await.unwrap().as_deref(), Some("first"));
        assert!(runner.run(&req("ps", &["aux"])).await.unwrap().is_none());
        assert_eq!(runner.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_first_registered_rule_wins() {
        let runner = RecordingRunner::new();
        runner.fail("scp", 1).reply("scp", "never");

        let err = runner.run(&req("scp", &["a", "b"])).await.unwrap_err();
        assert!(matches!(err, ClusterError::CommandExecution { exit_code: Some(1), .. }));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let runner = RecordingRunner::new();
        runner.fail_spawn("landscape-sysinfo");
        let err = runner.run(&req("landscape-sysinfo", &[])).await.unwrap_err();
        assert!(matches!(err, ClusterError::Spawn { .. }));
    }
}
