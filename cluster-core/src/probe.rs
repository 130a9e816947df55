//! Host reachability and job detection
//!
//! Handles:
//! - Online check with a bounded `ping`
//! - Process-table inspection (`ps aux`, locally or over ssh) to find the
//!   epoch builder job
//! - Availability derived from the two above, never cached
//! - Status report retrieval (`landscape-sysinfo`)

use crate::args;
use crate::error::Result;
use crate::execution::{CommandRunner, ExecutionMode, Executor};
use crate::servers::{Server, ServerKind};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Invocations identifying the managed job in a process listing
pub const JOB_SIGNATURES: &[&str] = &["python3 ./dist", "python3 dist"];

/// Lines containing the transport name belong to the probe itself
const TRANSPORT_MARKER: &str = "ssh";

/// The managed job as observed in one process listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteProcess {
    pub pid: Option<String>,
    pub command: Option<String>,
}

impl RemoteProcess {
    pub fn is_running(&self) -> bool {
        self.pid.is_some()
    }
}

fn matched_signature(line: &str) -> Option<&'static str> {
    if line.contains(TRANSPORT_MARKER) {
        return None;
    }
    JOB_SIGNATURES.iter().copied().find(|sig| line.contains(sig))
}

/// Extract the job's PID and command from `ps aux` output
pub fn parse_process_table(listing: &str) -> RemoteProcess {
    let candidates: Vec<(&str, &str)> = listing
        .lines()
        .filter_map(|line| matched_signature(line).map(|sig| (line, sig)))
        .collect();

    let Some(&(line, signature)) = candidates.first() else {
        return RemoteProcess::default();
    };
    if candidates.len() > 1 {
        debug!("{} job candidates in process table, using the first", candidates.len());
    }

    let pid = line
        .split_whitespace()
        .find(|token| token.parse::<u32>().map(|n| n > 0).unwrap_or(false))
        .map(str::to_string);

    // Only report a command when a PID was found on the line
    let command = pid.as_ref().and_then(|_| {
        line.find(signature).map(|idx| line[idx..].trim_end().to_string())
    });

    RemoteProcess { pid, command }
}

/// Runs probe commands through the shared executor
#[derive(Debug)]
pub struct Probe<R> {
    executor: Arc<Executor<R>>,
    timeout: Duration,
}

impl<R> Clone for Probe<R> {
    fn clone(&self) -> Self {
        Self { executor: Arc::clone(&self.executor), timeout: self.timeout }
    }
}

impl<R: CommandRunner> Probe<R> {
    pub fn new(executor: Arc<Executor<R>>, timeout: Duration) -> Self {
        Self { executor, timeout }
    }

    pub fn executor(&self) -> &Arc<Executor<R>> {
        &self.executor
    }

    /// Ping the host once. Synthetic targets are always online.
    pub async fn is_online(&self, server: &Server) -> bool {
        if server.kind != ServerKind::Remote {
            return true;
        }

        let wait_secs = self.timeout.as_secs().max(1).to_string();
        let ping = self.executor.execute(
            "ping",
            vec!["-c".into(), "1".into(), "-w".into(), wait_secs, server.address.clone()],
            ExecutionMode::Captured,
        );

        // ping enforces its own deadline; this bound covers a stuck spawn
        match tokio::time::timeout(self.timeout.saturating_add(Duration::from_secs(1)), ping).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!("{} is offline: {}", server.name, e);
                false
            }
            Err(_) => {
                debug!("Ping to {} timed out", server.name);
                false
            }
        }
    }

    /// Fresh process-table lookup of the managed job
    pub async fn get_process(&self, server: &Server) -> Result<RemoteProcess> {
        let listing = match server.kind {
            ServerKind::Local => {
                self.executor
                    .execute("ps", vec!["aux".into()], ExecutionMode::Captured)
                    .await?
            }
            _ => self.executor.ssh(args![server, "ps", "aux"], ExecutionMode::Captured).await?,
        };

        Ok(listing.as_deref().map(parse_process_table).unwrap_or_default())
    }

    /// `None` when offline or when the process table could not be read
    pub async fn is_available(&self, is_online: bool, server: &Server) -> Option<bool> {
        if !is_online {
            return None;
        }
        match self.get_process(server).await {
            Ok(process) => Some(!process.is_running()),
            Err(e) => {
                warn!("Could not read the process table of {}: {}", server.name, e);
                None
            }
        }
    }

    /// `landscape-sysinfo` output of the host
    pub async fn get_landscape_sysinfo(&self, server: &Server) -> Result<Option<String>> {
        match server.kind {
            ServerKind::Local => {
                self.executor
                    .execute("landscape-sysinfo", Vec::new(), ExecutionMode::Captured)
                    .await
            }
            _ => {
                self.executor
                    .ssh(args![server, "landscape-sysinfo"], ExecutionMode::Captured)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::RecordingRunner;
    use crate::ssh::SshArgs;

    const LISTING: &str = "\
USER         PID %CPU %MEM    VSZ   RSS TTY      STAT START   TIME COMMAND
root           1  0.0  0.1 167744 11432 ?        Ss   Jan01   0:12 /sbin/init
worker      4242 99.5 12.0 9123456 812345 ?      Rl   10:01 120:00 python3 dist/train_regression_batch.py --category up
op          5001  0.0  0.0  12345  6789 ?        S    10:05   0:00 ssh -i /k w1@10.0.0.5 cd epoch-builder && nohup python3 dist/x.py
";

    fn probe() -> Probe<RecordingRunner> {
        let exec = Arc::new(Executor::new(RecordingRunner::new(), SshArgs::new("/k")));
        Probe::new(exec, Duration::from_secs(1))
    }

    #[test]
    fn test_parse_finds_job_and_ignores_transport_line() {
        let process = parse_process_table(LISTING);
        assert_eq!(process.pid.as_deref(), Some("4242"));
        assert_eq!(
            process.command.as_deref(),
            Some("python3 dist/train_regression_batch.py --category up")
        );
    }

    #[test]
    fn test_parse_only_transport_line_is_not_a_job() {
        let listing = "op 5001 0.0 0.0 1 1 ? S 10:05 0:00 ssh w1@h nohup python3 dist/x.py\n";
        assert_eq!(parse_process_table(listing), RemoteProcess::default());
    }

    #[test]
    fn test_parse_dot_slash_signature() {
        let listing = "root 77 1.0 0.0 1 1 ? R 10:05 0:00 python3 ./dist/backtest.py\n";
        let process = parse_process_table(listing);
        assert_eq!(process.pid.as_deref(), Some("77"));
        assert_eq!(process.command.as_deref(), Some("python3 ./dist/backtest.py"));
    }

    #[test]
    fn test_parse_empty_listing() {
        assert!(!parse_process_table("").is_running());
    }

    #[tokio::test]
    async fn test_localhost_uses_local_ps() {
        let probe = probe();
        probe.executor.runner().reply("ps aux", LISTING);

        let process = probe.get_process(&Server::localhost()).await.unwrap();
        assert!(process.is_running());
        assert_eq!(probe.executor.runner().command_lines(), vec!["ps aux"]);
    }

    #[tokio::test]
    async fn test_remote_uses_ssh() {
        let probe = probe();
        let server = Server::remote("w1", "10.0.0.5");
        probe.get_process(&server).await.unwrap();
        assert_eq!(
            probe.executor.runner().command_lines(),
            vec!["ssh -i /k w1@10.0.0.5 ps aux"]
        );
    }

    #[tokio::test]
    async fn test_availability() {
        let probe = probe();
        let server = Server::remote("w1", "10.0.0.5");
        assert_eq!(probe.is_available(false, &server).await, None);
        // nothing in the process table
        assert_eq!(probe.is_available(true, &server).await, Some(true));

        probe.executor.runner().reply("ps aux", LISTING);
        assert_eq!(probe.is_available(true, &server).await, Some(false));
    }

    #[tokio::test]
    async fn test_availability_unknown_when_probe_fails() {
        let probe = probe();
        probe.executor.runner().fail("ps aux", 255);
        let server = Server::remote("w1", "10.0.0.5");
        assert_eq!(probe.is_available(true, &server).await, None);
    }

    #[tokio::test]
    async fn test_is_online_with_huge_timeout() {
        let exec = Arc::new(Executor::new(RecordingRunner::new(), SshArgs::new("/k")));
        let probe = Probe::new(exec, Duration::from_secs(u64::MAX));

        assert!(probe.is_online(&Server::remote("w1", "127.0.0.1")).await);
        assert_eq!(
            probe.executor.runner().command_lines(),
            vec![format!("ping -c 1 -w {} 127.0.0.1", u64::MAX)]
        );
    }

    #[tokio::test]
    async fn test_is_online() {
        let probe = probe();
        probe.executor.runner().fail("10.0.0.6", 1);
        assert!(probe.is_online(&Server::remote("w1", "10.0.0.5")).await);
        assert!(!probe.is_online(&Server::remote("w2", "10.0.0.6")).await);
        assert!(probe.is_online(&Server::localhost()).await);
        assert!(probe.is_online(&Server::all()).await);
        assert_eq!(
            probe.executor.runner().command_lines(),
            vec!["ping -c 1 -w 1 10.0.0.5", "ping -c 1 -w 1 10.0.0.6"]
        );
    }
}
