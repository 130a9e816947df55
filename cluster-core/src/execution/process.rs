//! Process spawning with `tokio::process`

use super::{CommandRunner, ExecutionMode, ExecutionRequest};
use crate::error::{ClusterError, Result};
use std::process::{ExitStatus, Stdio};
use tokio::process::Command as AsyncCommand;
use tracing::{debug, warn};

/// Production runner, one OS process per call
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }

    fn command(request: &ExecutionRequest) -> AsyncCommand {
        let mut cmd = AsyncCommand::new(&request.program);
        cmd.args(&request.args);
        cmd
    }

    fn spawn_error(request: &ExecutionRequest, source: std::io::Error) -> ClusterError {
        ClusterError::Spawn { program: request.program.clone(), source }
    }

    fn check_status(request: &ExecutionRequest, status: ExitStatus) -> Result<()> {
        if status.success() {
            Ok(())
        } else {
            Err(ClusterError::CommandExecution {
                program: request.program.clone(),
                exit_code: status.code(),
            })
        }
    }

    async fn run_captured(request: &ExecutionRequest) -> Result<Option<String>> {
        let output = Self::command(request)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| Self::spawn_error(request, e))?;

        Self::check_status(request, output.status)?;

        let mut buffer = String::from_utf8_lossy(&output.stdout).into_owned();
        buffer.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(if buffer.is_empty() { None } else { Some(buffer) })
    }

    async fn run_interactive(request: &ExecutionRequest) -> Result<Option<String>> {
        let status = Self::command(request)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| Self::spawn_error(request, e))?;

        Self::check_status(request, status)?;
        Ok(None)
    }
}

impl CommandRunner for ProcessRunner {
    async fn run(&self, request: &ExecutionRequest) -> Result<Option<String>> {
        match request.mode {
            ExecutionMode::Captured => Self::run_captured(request).await,
            ExecutionMode::Interactive => Self::run_interactive(request).await,
            ExecutionMode::Detached => {
                self.launch(request)?;
                Ok(None)
            }
        }
    }

    fn launch(&self, request: &ExecutionRequest) -> Result<()> {
        let mut child = Self::command(request)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Self::spawn_error(request, e))?;

        // Reap the launcher without ever blocking the caller on it
        let program = request.program.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => debug!("Detached {} launcher exited", program),
                Ok(status) => warn!("Detached {} launcher exited with {}", program, status),
                Err(e) => warn!("Failed to wait for detached {}: {}", program, e),
            }
        });
        Ok(())
    }
}
