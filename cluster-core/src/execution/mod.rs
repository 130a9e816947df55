//! Command execution for local and remote hosts
//!
//! Handles:
//! - Captured execution (stdout + stderr buffered, nothing printed)
//! - Interactive execution (terminal attached, used for shells, tails, sudo prompts)
//! - Detached launches that are never awaited
//! - `ssh` / `scp` invocations composed through [`SshArgs`]
//!
//! The runner is a trait so orchestration code can be driven by
//! [`process::ProcessRunner`] in production and [`mock::RecordingRunner`] in tests.

pub mod mock;
pub mod process;

use crate::error::Result;
use crate::ssh::{Arg, SshArgs};
use std::fmt;
use std::future::Future;
use tracing::debug;

pub use mock::RecordingRunner;
pub use process::ProcessRunner;

/// How the spawned process is attached to the operator's terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Interactive,
    Captured,
    Detached,
}

/// One external process invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub program: String,
    pub args: Vec<String>,
    pub mode: ExecutionMode,
}

impl ExecutionRequest {
    pub fn new(program: impl Into<String>, args: Vec<String>, mode: ExecutionMode) -> Self {
        Self { program: program.into(), args, mode }
    }

    /// Shell-quoted rendering, for logs and test assertions
    pub fn command_line(&self) -> String {
        let mut words = Vec::with_capacity(self.args.len() + 1);
        words.push(self.program.as_str());
        words.extend(self.args.iter().map(String::as_str));
        shell_words::join(words)
    }
}

impl fmt::Display for ExecutionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

/// Spawns external processes
#[allow(async_fn_in_trait)]
pub trait CommandRunner {
    /// Run to completion. Captured mode resolves with the accumulated output,
    /// `None` when the process printed nothing.
    async fn run(&self, request: &ExecutionRequest) -> Result<Option<String>>;

    /// Start the process and return without waiting for it
    fn launch(&self, request: &ExecutionRequest) -> Result<()>;
}

/// Executes commands locally or through the ssh transport
#[derive(Debug)]
pub struct Executor<R> {
    runner: R,
    ssh: SshArgs,
}

impl<R: CommandRunner> Executor<R> {
    pub fn new(runner: R, ssh: SshArgs) -> Self {
        Self { runner, ssh }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn ssh_args(&self) -> &SshArgs {
        &self.ssh
    }

    /// Run `program` with `args`; detached mode returns as soon as it started
    pub async fn execute(
        &self,
        program: &str,
        args: Vec<String>,
        mode: ExecutionMode,
    ) -> Result<Option<String>> {
        let request = ExecutionRequest::new(program, args, mode);
        debug!("Executing ({:?}): {}", mode, request);
        match mode {
            ExecutionMode::Detached => {
                self.runner.launch(&request)?;
                Ok(None)
            }
            ExecutionMode::Interactive | ExecutionMode::Captured => self.runner.run(&request).await,
        }
    }

    pub async fn ssh(&self, partial: Vec<Arg>, mode: ExecutionMode) -> Result<Option<String>> {
        self.execute("ssh", self.ssh.build(partial), mode).await
    }

    pub async fn scp(&self, partial: Vec<Arg>, mode: ExecutionMode) -> Result<Option<String>> {
        self.execute("scp", self.ssh.build(partial), mode).await
    }

    /// Fire-and-forget ssh invocation. Lifetime of the remote work is
    /// decoupled from this call; observe it with a separate tail.
    pub fn launch_detached(&self, partial: Vec<Arg>) -> Result<()> {
        let request = ExecutionRequest::new("ssh", self.ssh.build(partial), ExecutionMode::Detached);
        debug!("Launching detached: {}", request);
        self.runner.launch(&request)
    }
}

/// Await a step whose failure is acceptable, e.g. removing a directory that
/// may not exist. The error is logged and discarded.
pub async fn best_effort<T, F>(step: &str, operation: F) -> Option<T>
where
    F: Future<Output = Result<T>>,
{
    match operation.await {
        Ok(value) => Some(value),
        Err(e) => {
            debug!("Best-effort step '{}' failed, ignoring: {}", step, e);
            None
        }
    }
}
