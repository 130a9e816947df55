//! Push / pull synchronization between the workstation and remote hosts
//!
//! Every protocol is a fixed sequence of executor calls:
//! - push: best-effort remove of the destination, then `scp -r`
//! - push file: best-effort `rm`, then `scp`
//! - pull: `scp -r` from the host, then the requested cleanup. Cleanup never
//!   runs when the copy failed.

use crate::args;
use crate::error::{ClusterError, Result};
use crate::execution::{best_effort, CommandRunner, ExecutionMode, Executor};
use crate::servers::{Server, ServerKind};
use crate::ssh::SshArgs;
use std::sync::Arc;
use tracing::{debug, info};

/// What happens to the remote source once a pull copied it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cleanup {
    Keep,
    Remove,
    /// Remove, then create it again empty so the next job can write into it
    Recreate,
}

#[derive(Debug)]
pub struct SyncOrchestrator<R> {
    executor: Arc<Executor<R>>,
}

impl<R> Clone for SyncOrchestrator<R> {
    fn clone(&self) -> Self {
        Self { executor: Arc::clone(&self.executor) }
    }
}

fn ensure_remote(server: &Server) -> Result<()> {
    match server.kind {
        ServerKind::Remote => Ok(()),
        ServerKind::Local | ServerKind::All => Err(ClusterError::Unsupported(format!(
            "synchronization requires a remote host, got {}",
            server.name
        ))),
    }
}

impl<R: CommandRunner> SyncOrchestrator<R> {
    pub fn new(executor: Arc<Executor<R>>) -> Self {
        Self { executor }
    }

    pub async fn remove_dir(&self, server: &Server, path: &str) -> Result<()> {
        self.executor.ssh(args![server, "rm", "-r", path], ExecutionMode::Captured).await?;
        Ok(())
    }

    pub async fn remove_file(&self, server: &Server, path: &str) -> Result<()> {
        self.executor.ssh(args![server, "rm", path], ExecutionMode::Captured).await?;
        Ok(())
    }

    pub async fn make_dir(&self, server: &Server, path: &str) -> Result<()> {
        self.executor.ssh(args![server, "mkdir", path], ExecutionMode::Captured).await?;
        Ok(())
    }

    /// Remove a remote directory and recreate it empty
    pub async fn clean_dir(&self, server: &Server, path: &str) -> Result<()> {
        self.remove_dir(server, path).await?;
        self.make_dir(server, path).await
    }

    /// Best-effort `mkdir` of each path in order; existing directories are fine
    pub async fn init_dirs(&self, server: &Server, paths: &[String]) -> Result<()> {
        ensure_remote(server)?;
        for path in paths {
            best_effort("mkdir", self.make_dir(server, path)).await;
        }
        Ok(())
    }

    /// Replace `destination_dir` on the host with the local `origin` directory.
    /// `destination_parent` is the directory scp copies into.
    pub async fn push_dir(
        &self,
        server: &Server,
        origin: &str,
        destination_parent: &str,
        destination_dir: &str,
    ) -> Result<()> {
        ensure_remote(server)?;

        println!("\n1/2) Removing {}:{}...", SshArgs::addr(server), destination_dir);
        best_effort("remove destination", self.remove_dir(server, destination_dir)).await;

        println!("2/2) Pushing {}...", origin);
        let target = SshArgs::remote_target(server, destination_parent);
        self.executor
            .scp(args!["-r", origin, target], ExecutionMode::Interactive)
            .await?;

        info!("Pushed {} to {}", origin, server.name);
        Ok(())
    }

    /// Replace a single remote file with the local `origin`
    pub async fn push_file(&self, server: &Server, origin: &str, destination: &str) -> Result<()> {
        ensure_remote(server)?;

        println!("\n1/2) Removing {}:{}...", SshArgs::addr(server), destination);
        best_effort("remove destination", self.remove_file(server, destination)).await;

        println!("2/2) Pushing {}...", origin);
        let target = SshArgs::remote_target(server, destination);
        self.executor.scp(args![origin, target], ExecutionMode::Interactive).await?;

        info!("Pushed {} to {}", origin, server.name);
        Ok(())
    }

    /// Copy the remote `origin` directory into the local `destination`
    pub async fn pull_dir(
        &self,
        server: &Server,
        origin: &str,
        destination: &str,
        cleanup: Cleanup,
    ) -> Result<()> {
        ensure_remote(server)?;

        println!("\n1/2) Pulling {}:{}...", SshArgs::addr(server), origin);
        let source = SshArgs::remote_target(server, origin);
        self.executor
            .scp(args!["-r", source, destination], ExecutionMode::Interactive)
            .await?;

        match cleanup {
            Cleanup::Keep => println!("2/2) Cleaning origin: Skipped"),
            Cleanup::Remove => {
                println!("2/2) Removing origin...");
                self.remove_dir(server, origin).await?;
            }
            Cleanup::Recreate => {
                println!("2/2) Cleaning origin...");
                self.clean_dir(server, origin).await?;
            }
        }

        debug!("Pulled {} from {} ({:?})", origin, server.name, cleanup);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::RecordingRunner;

    fn orchestrator() -> SyncOrchestrator<RecordingRunner> {
        let exec = Arc::new(Executor::new(RecordingRunner::new(), SshArgs::new("/k")));
        SyncOrchestrator::new(exec)
    }

    fn runner(sync: &SyncOrchestrator<RecordingRunner>) -> &RecordingRunner {
        sync.executor.runner()
    }

    fn w1() -> Server {
        Server::remote("w1", "10.0.0.5")
    }

    #[tokio::test]
    async fn test_push_removes_before_copy() {
        let sync = orchestrator();
        sync.push_dir(&w1(), "/home/op/epoch-builder/dist", "epoch-builder", "epoch-builder/dist")
            .await
            .unwrap();

        assert_eq!(
            runner(&sync).command_lines(),
            vec![
                "ssh -i /k w1@10.0.0.5 rm -r epoch-builder/dist",
                "scp -i /k -r /home/op/epoch-builder/dist w1@10.0.0.5:epoch-builder",
            ]
        );
        let modes: Vec<ExecutionMode> = runner(&sync).requests().iter().map(|r| r.mode).collect();
        assert_eq!(modes, vec![ExecutionMode::Captured, ExecutionMode::Interactive]);
    }

    #[tokio::test]
    async fn test_push_ignores_failed_removal() {
        let sync = orchestrator();
        runner(&sync).fail("rm -r", 1);

        sync.push_dir(&w1(), "/a", "epoch-builder", "epoch-builder/a").await.unwrap();
        assert_eq!(runner(&sync).requests().len(), 2);
    }

    #[tokio::test]
    async fn test_push_twice_is_identical() {
        let sync = orchestrator();
        sync.push_dir(&w1(), "/a", "p", "p/a").await.unwrap();
        let once = runner(&sync).command_lines();
        sync.push_dir(&w1(), "/a", "p", "p/a").await.unwrap();
        let twice = runner(&sync).command_lines();

        assert_eq!(twice.len(), 2 * once.len());
        assert_eq!(&twice[..once.len()], &twice[once.len()..]);
    }

    #[tokio::test]
    async fn test_push_copy_failure_propagates() {
        let sync = orchestrator();
        runner(&sync).fail("scp", 1);
        let err = sync.push_dir(&w1(), "/a", "p", "p/a").await.unwrap_err();
        assert!(matches!(err, ClusterError::CommandExecution { .. }));
    }

    #[tokio::test]
    async fn test_push_file() {
        let sync = orchestrator();
        sync.push_file(&w1(), "/home/op/epoch-builder/requirements.txt", "epoch-builder/requirements.txt")
            .await
            .unwrap();
        assert_eq!(
            runner(&sync).command_lines(),
            vec![
                "ssh -i /k w1@10.0.0.5 rm epoch-builder/requirements.txt",
                "scp -i /k /home/op/epoch-builder/requirements.txt w1@10.0.0.5:epoch-builder/requirements.txt",
            ]
        );
    }

    #[tokio::test]
    async fn test_pull_failure_skips_cleanup() {
        let sync = orchestrator();
        runner(&sync).fail("scp", 1);

        let result = sync.pull_dir(&w1(), "epoch-builder/db_management", "/l", Cleanup::Remove).await;
        assert!(result.is_err());
        assert_eq!(runner(&sync).requests().len(), 1);
        assert_eq!(runner(&sync).requests()[0].program, "scp");
    }

    #[tokio::test]
    async fn test_pull_cleanup_policies() {
        let sync = orchestrator();
        sync.pull_dir(&w1(), "r/a", "/l", Cleanup::Keep).await.unwrap();
        sync.pull_dir(&w1(), "r/b", "/l", Cleanup::Remove).await.unwrap();
        sync.pull_dir(&w1(), "r/c", "/l", Cleanup::Recreate).await.unwrap();

        assert_eq!(
            runner(&sync).command_lines(),
            vec![
                "scp -i /k -r w1@10.0.0.5:r/a /l",
                "scp -i /k -r w1@10.0.0.5:r/b /l",
                "ssh -i /k w1@10.0.0.5 rm -r r/b",
                "scp -i /k -r w1@10.0.0.5:r/c /l",
                "ssh -i /k w1@10.0.0.5 rm -r r/c",
                "ssh -i /k w1@10.0.0.5 mkdir r/c",
            ]
        );
    }

    #[tokio::test]
    async fn test_init_dirs_continues_past_failures() {
        let sync = orchestrator();
        runner(&sync).fail("mkdir epoch-builder", 1);

        let paths = vec!["epoch-builder".to_string(), "x/_e1".to_string()];
        sync.init_dirs(&w1(), &paths).await.unwrap();
        assert_eq!(
            runner(&sync).command_lines(),
            vec!["ssh -i /k w1@10.0.0.5 mkdir epoch-builder", "ssh -i /k w1@10.0.0.5 mkdir x/_e1"]
        );
    }

    #[tokio::test]
    async fn test_synthetic_targets_rejected() {
        let sync = orchestrator();
        for server in [Server::localhost(), Server::all()] {
            let err = sync.push_dir(&server, "/a", "p", "p/a").await.unwrap_err();
            assert!(matches!(err, ClusterError::Unsupported(_)));
        }
        assert!(runner(&sync).requests().is_empty());
    }
}
