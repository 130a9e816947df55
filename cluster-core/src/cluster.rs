//! Operator-facing cluster operations
//!
//! Each operation resolves its target (explicit name or the selector), then
//! runs a fixed sequence of executor, probe and sync calls. Operations run one
//! external process at a time; fan-out over `all` visits hosts in roster order.

use crate::args;
use crate::config::LoadedConfig;
use crate::error::{ClusterError, Result};
use crate::execution::{CommandRunner, ExecutionMode, Executor};
use crate::path::{PathContext, Resource, ROOT_DIR};
use crate::probe::{Probe, RemoteProcess};
use crate::servers::{SelectionFilter, Server, ServerKind, ServerRegistry, ServerSelector};
use crate::ssh::{Arg, SshArgs};
use crate::sync::{Cleanup, SyncOrchestrator};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Lines of history shown when subscribing to a job log
const TAIL_LINES: &str = "500000";
const UNIT_TEST_PATTERN: &str = "*_test.py";

/// Model type group offered when pulling trained models
pub const TRAINABLE_GROUP: &str = "all";

/// Pipeline entry points shipped in `dist/`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    CreateEpoch,
    GenerateRegressionTrainingConfigs,
    TrainRegressionBatch,
    InitializePredictionModels,
    FindProfitableConfigs,
    BuildPredictionModels,
    ExportEpoch,
}

impl Stage {
    pub const fn endpoint(self) -> &'static str {
        match self {
            Stage::CreateEpoch => "create_epoch.py",
            Stage::GenerateRegressionTrainingConfigs => "generate_regression_training_configs.py",
            Stage::TrainRegressionBatch => "train_regression_batch.py",
            Stage::InitializePredictionModels => "initialize_prediction_models.py",
            Stage::FindProfitableConfigs => "find_profitable_configs.py",
            Stage::BuildPredictionModels => "build_prediction_models.py",
            Stage::ExportEpoch => "export_epoch.py",
        }
    }

    /// Long stages run detached on remote hosts
    pub const fn detached(self) -> bool {
        matches!(self, Stage::TrainRegressionBatch | Stage::FindProfitableConfigs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushTarget {
    RootFiles,
    Config,
    DbManagement,
    Candlesticks,
    Dist,
    Models,
    RegressionSelection,
    ClassificationTrainingData,
    TrainingConfigs,
    BacktestConfigurations,
    BacktestResults,
    /// Epoch directories after initialising the remote epoch tree
    Epoch,
    /// Root files, root directories and the epoch
    EpochBuilder,
}

impl PushTarget {
    /// The directory pushed by single-resource targets
    pub const fn resource(self) -> Option<Resource> {
        match self {
            PushTarget::Config => Some(Resource::Config),
            PushTarget::DbManagement => Some(Resource::DbManagement),
            PushTarget::Candlesticks => Some(Resource::Candlesticks),
            PushTarget::Dist => Some(Resource::Dist),
            PushTarget::Models => Some(Resource::Models),
            PushTarget::RegressionSelection => Some(Resource::RegressionSelection),
            PushTarget::ClassificationTrainingData => Some(Resource::ClassificationTrainingData),
            PushTarget::TrainingConfigs => Some(Resource::TrainingConfigs),
            PushTarget::BacktestConfigurations => Some(Resource::BacktestConfigurations),
            PushTarget::BacktestResults => Some(Resource::BacktestResults),
            PushTarget::RootFiles | PushTarget::Epoch | PushTarget::EpochBuilder => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullTarget {
    /// Certificates and models bank of one model type
    TrainedModels(String),
    DbManagement,
    RegressionSelection,
    ClassificationTrainingData,
    BacktestResults,
}

/// What the status probe saw on one host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostState {
    Offline,
    Idle,
    Running { pid: String, command: String },
    /// The probe itself failed
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostReport {
    pub name: String,
    pub state: HostState,
    pub sysinfo: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusReport {
    pub hosts: Vec<HostReport>,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for host in &self.hosts {
            writeln!(f, "\n{}:", host.name)?;
            match &host.state {
                HostState::Offline => writeln!(f, "Offline")?,
                HostState::Idle => writeln!(f, "Not running.")?,
                HostState::Running { pid, command } => writeln!(f, "Running: {pid} ({command})")?,
                HostState::Unknown(reason) => writeln!(f, "Unknown: {reason}")?,
            }
            if let Some(sysinfo) = &host.sysinfo {
                writeln!(f, "{}", sysinfo.trim_end())?;
            }
        }
        Ok(())
    }
}

pub struct Cluster<R, S> {
    executor: Arc<Executor<R>>,
    registry: ServerRegistry<R>,
    paths: PathContext,
    sync: SyncOrchestrator<R>,
    selector: S,
    model_types: HashMap<String, Vec<String>>,
}

impl<R: CommandRunner, S: ServerSelector> Cluster<R, S> {
    pub fn new(config: &LoadedConfig, runner: R, selector: S) -> Result<Self> {
        let ssh = SshArgs::new(config.cluster.ssh_private_key_path.clone());
        let executor = Arc::new(Executor::new(runner, ssh));
        let probe = Probe::new(
            Arc::clone(&executor),
            Duration::from_secs(config.cluster.probe_timeout_secs),
        );
        let registry = ServerRegistry::new(config.cluster.servers.clone(), probe)?;
        let paths = PathContext::new(config.cluster.local_path.clone(), config.epoch_id());
        let sync = SyncOrchestrator::new(Arc::clone(&executor));

        info!(
            "Cluster ready: {} servers, epoch {}",
            registry.roster().len(),
            paths.epoch_id().unwrap_or("unset")
        );

        Ok(Self {
            executor,
            registry,
            paths,
            sync,
            selector,
            model_types: config.cluster.trainable_model_types.clone(),
        })
    }

    pub fn executor(&self) -> &Arc<Executor<R>> {
        &self.executor
    }

    pub fn registry(&self) -> &ServerRegistry<R> {
        &self.registry
    }

    pub fn paths(&self) -> &PathContext {
        &self.paths
    }

    pub fn model_types(&self, group: &str) -> &[String] {
        self.model_types.get(group).map(Vec::as_slice).unwrap_or(&[])
    }

    fn probe(&self) -> &Probe<R> {
        self.registry.probe()
    }

    /// Explicit server by name, otherwise ask the selector
    pub async fn target(&self, id: Option<&str>, filter: SelectionFilter) -> Result<Server> {
        match id {
            Some(id) => self.registry.get_server(id),
            None => self.registry.select(&self.selector, filter).await,
        }
    }

    fn remote_only(server: &Server, operation: &str) -> Result<()> {
        match server.kind {
            ServerKind::Remote => Ok(()),
            _ => Err(ClusterError::Unsupported(format!(
                "{operation} is not supported on {}",
                server.name
            ))),
        }
    }

    /// Interactive shell on a host
    pub async fn connect(&self, target: Option<&str>) -> Result<()> {
        let server = self.target(target, SelectionFilter::online()).await?;
        Self::remote_only(&server, "connect")?;
        self.executor.ssh(args![&server], ExecutionMode::Interactive).await?;
        Ok(())
    }

    /// Job state and system info of one host, or every host for `all`
    pub async fn status(&self, target: Option<&str>) -> Result<StatusReport> {
        let filter = SelectionFilter::online().with_local().with_all();
        let server = self.target(target, filter).await?;

        let mut report = StatusReport::default();
        if server.is_all() {
            for entry in self.registry.list_servers(true, false).await {
                let host = match self.host_report(&entry.server, entry.status.online).await {
                    Ok(host) => host,
                    Err(e) => {
                        warn!("Status of {} failed: {}", entry.server.name, e);
                        HostReport {
                            name: entry.server.name.clone(),
                            state: HostState::Unknown(e.to_string()),
                            sysinfo: None,
                        }
                    }
                };
                report.hosts.push(host);
            }
        } else {
            let online = self.probe().is_online(&server).await;
            report.hosts.push(self.host_report(&server, online).await?);
        }
        Ok(report)
    }

    async fn host_report(&self, server: &Server, online: bool) -> Result<HostReport> {
        if !online {
            return Ok(HostReport { name: server.name.clone(), state: HostState::Offline, sysinfo: None });
        }

        let state = match self.probe().get_process(server).await? {
            RemoteProcess { pid: Some(pid), command } => HostState::Running {
                pid,
                command: command.unwrap_or_default(),
            },
            _ => HostState::Idle,
        };
        let sysinfo = self.probe().get_landscape_sysinfo(server).await?;
        Ok(HostReport { name: server.name.clone(), state, sysinfo })
    }

    /// Follow the job log of a host until the operator interrupts
    pub async fn logs(&self, target: Option<&str>) -> Result<()> {
        let server = self.target(target, SelectionFilter::online()).await?;
        self.tail_logs(&server).await
    }

    /// Interactive `tail -f` of the remote job log. Interrupting it leaves any
    /// detached job running.
    pub async fn tail_logs(&self, server: &Server) -> Result<()> {
        Self::remote_only(server, "log subscription")?;
        let log = self.paths.resolve(false, Resource::NohupLogs)?;
        self.executor
            .ssh(args![server, "tail", "-n", TAIL_LINES, "-f", log], ExecutionMode::Interactive)
            .await?;
        Ok(())
    }

    pub async fn reboot(&self, target: Option<&str>) -> Result<()> {
        let server = self.target(target, SelectionFilter::online().with_local()).await?;
        println!("\n1/1) Rebooting {}...", server.name);
        self.power(&server, "reboot").await
    }

    /// Power off one host, or every online cluster member for `all`
    pub async fn shutdown(&self, target: Option<&str>) -> Result<()> {
        let server = self.target(target, SelectionFilter::online().with_all()).await?;

        if !server.is_all() {
            println!("\n1/1) Shutting {} down...", server.name);
            return self.power(&server, "poweroff").await;
        }

        for entry in self.registry.list_servers(false, false).await {
            if !(entry.status.online && entry.server.is_cluster) {
                debug!("Skipping shutdown of {}", entry.server.name);
                continue;
            }
            println!("\nShutting {} down...", entry.server.name);
            if let Err(e) = self.power(&entry.server, "poweroff").await {
                warn!("Shutdown of {} failed: {}", entry.server.name, e);
            }
        }
        Ok(())
    }

    async fn power(&self, server: &Server, action: &str) -> Result<()> {
        match server.kind {
            ServerKind::Local => {
                self.executor
                    .execute("sudo", vec![action.to_string()], ExecutionMode::Interactive)
                    .await?;
            }
            ServerKind::Remote => {
                self.executor
                    .ssh(args!["-t", server, "sudo", action], ExecutionMode::Interactive)
                    .await?;
            }
            ServerKind::All => {
                return Err(ClusterError::Unsupported(format!("{action} needs a single host")));
            }
        }
        Ok(())
    }

    /// `kill -9` the running job. Remote jobs started through nohup leave a
    /// second process behind, which is killed as well when present.
    pub async fn kill(&self, target: Option<&str>) -> Result<()> {
        let filter = SelectionFilter::online().with_local().busy();
        let server = self.target(target, filter).await?;
        if server.is_all() {
            return Err(ClusterError::Unsupported("kill needs a single host".to_string()));
        }

        let pid = self
            .probe()
            .get_process(&server)
            .await?
            .pid
            .ok_or_else(|| ClusterError::RemoteJobNotRunning(server.name.clone()))?;

        println!("\n1/1) Killing python3 process on {}...", server.name);
        if server.is_local() {
            self.executor
                .execute("kill", vec!["-9".to_string(), pid], ExecutionMode::Captured)
                .await?;
            return Ok(());
        }

        self.executor.ssh(args![&server, "kill", "-9", pid], ExecutionMode::Captured).await?;
        if let Some(pid) = self.probe().get_process(&server).await?.pid {
            debug!("Killing leftover process {} on {}", pid, server.name);
            self.executor.ssh(args![&server, "kill", "-9", pid], ExecutionMode::Captured).await?;
        }
        info!("Killed the job on {}", server.name);
        Ok(())
    }

    pub async fn install_ssh_key(&self, target: Option<&str>) -> Result<()> {
        let server = self.target(target, SelectionFilter::online()).await?;
        Self::remote_only(&server, "ssh key installation")?;
        let args = self.executor.ssh_args().build(args![&server]);
        self.executor.execute("ssh-copy-id", args, ExecutionMode::Interactive).await?;
        Ok(())
    }

    pub async fn unit_tests(&self, target: Option<&str>) -> Result<()> {
        let server = self.target(target, SelectionFilter::online().with_local()).await?;
        match server.kind {
            ServerKind::Local => {
                let tests = self.paths.resolve(true, Resource::UnitTests)?;
                let args = ["-m", "unittest", "discover", "-s", tests.as_str(), "-p", UNIT_TEST_PATTERN]
                    .iter()
                    .map(|s| s.to_string())
                    .collect();
                self.executor.execute("python3", args, ExecutionMode::Interactive).await?;
            }
            ServerKind::Remote => {
                let pattern = shell_words::quote(UNIT_TEST_PATTERN).into_owned();
                let partial = args![
                    &server, "cd", ROOT_DIR, "&&", "python3", "-m", "unittest", "discover",
                    Resource::Dist.segment(), "-p", pattern
                ];
                self.executor.ssh(partial, ExecutionMode::Interactive).await?;
            }
            ServerKind::All => {
                return Err(ClusterError::Unsupported("unit tests need a single host".to_string()));
            }
        }
        Ok(())
    }

    pub async fn run_stage(&self, target: Option<&str>, stage: Stage, args: &[String]) -> Result<()> {
        self.run_job(target, stage.endpoint(), args, stage.detached()).await
    }

    /// Run `dist/<endpoint>` on a host that is not already running a job.
    /// Detached remote runs return once the operator leaves the log tail.
    pub async fn run_job(
        &self,
        target: Option<&str>,
        endpoint: &str,
        args: &[String],
        detach: bool,
    ) -> Result<()> {
        let server = self.target(target, SelectionFilter::available().with_local()).await?;
        if server.is_all() {
            return Err(ClusterError::Unsupported("jobs run on a single host".to_string()));
        }

        if let Some(pid) = self.probe().get_process(&server).await?.pid {
            return Err(ClusterError::HostBusy { server: server.name.clone(), pid });
        }

        let script = format!("{}/{}", Resource::Dist.segment(), endpoint);
        match (server.is_local(), detach) {
            (true, _) => {
                let mut local_args = vec![script];
                local_args.extend(args.iter().cloned());
                self.executor.execute("python3", local_args, ExecutionMode::Interactive).await?;
            }
            (false, true) => {
                self.launch_job(&server, &script, args).await?;
                self.tail_logs(&server).await?;
            }
            (false, false) => {
                let mut partial = args![&server, "cd", ROOT_DIR, "&&", "python3", script];
                partial.extend(args.iter().map(|a| Arg::from(shell_words::quote(a).into_owned())));
                self.executor.ssh(partial, ExecutionMode::Interactive).await?;
            }
        }
        Ok(())
    }

    /// Start the job in the background on the host, output going to the log file
    async fn launch_job(&self, server: &Server, script: &str, args: &[String]) -> Result<()> {
        let log = self.paths.resolve(false, Resource::NohupLogs)?;
        self.executor.ssh(args![server, "touch", log], ExecutionMode::Captured).await?;

        let mut words = vec!["python3".to_string(), script.to_string()];
        words.extend(args.iter().cloned());
        let command = format!(
            "cd {} && nohup {} > {} 2>&1 &",
            ROOT_DIR,
            shell_words::join(&words),
            Resource::NohupLogs.segment()
        );

        info!("Launching {} on {}", script, server.name);
        self.executor.launch_detached(args![server, command])
    }

    pub async fn push(&self, target: Option<&str>, what: PushTarget) -> Result<()> {
        let server = self.target(target, SelectionFilter::available()).await?;
        match what {
            PushTarget::RootFiles => self.push_root_files(&server).await,
            PushTarget::Epoch => self.push_epoch(&server).await,
            PushTarget::EpochBuilder => self.push_epoch_builder(&server).await,
            single => match single.resource() {
                Some(resource) => self.push_resource(&server, resource).await,
                None => Err(ClusterError::Unsupported(format!("{single:?} cannot be pushed"))),
            },
        }
    }

    async fn push_resource(&self, server: &Server, resource: Resource) -> Result<()> {
        let origin = self.paths.resolve(true, resource)?;
        let destination = self.paths.resolve(false, resource)?;
        if resource.is_file() {
            return self.sync.push_file(server, &origin, &destination).await;
        }
        let parent = self.paths.parent_of(false, resource)?;
        self.sync.push_dir(server, &origin, &parent, &destination).await
    }

    pub async fn init_root_path(&self, server: &Server) -> Result<()> {
        self.sync.init_dirs(server, &[self.paths.path(false, None)]).await
    }

    /// Create the remote root, epoch root and every epoch directory
    pub async fn init_epoch_path(&self, server: &Server) -> Result<()> {
        let mut dirs = vec![self.paths.path(false, None), self.paths.epoch_path(false, None)?];
        for resource in Resource::EPOCH_DIRECTORIES {
            dirs.push(self.paths.resolve(false, resource)?);
        }
        self.sync.init_dirs(server, &dirs).await
    }

    async fn push_root_files(&self, server: &Server) -> Result<()> {
        self.init_root_path(server).await?;

        println!("\n1/2) REQUIREMENTS.TXT:");
        self.push_resource(server, Resource::Requirements).await?;

        println!("\n2/2) PACKAGE.JSON:");
        self.push_resource(server, Resource::PackageJson).await
    }

    async fn push_epoch(&self, server: &Server) -> Result<()> {
        self.init_epoch_path(server).await?;

        for resource in Resource::EPOCH_DIRECTORIES {
            let local = self.paths.resolve(true, resource)?;
            let exists = match tokio::fs::try_exists(&local).await {
                Ok(exists) => exists,
                Err(e) => {
                    warn!("Cannot check {}: {}", local, e);
                    false
                }
            };
            if !exists {
                println!("\n{}: Skipped", resource.segment().to_uppercase());
                continue;
            }
            println!("\n{}:", resource.segment().to_uppercase());
            self.push_resource(server, resource).await?;
        }
        Ok(())
    }

    async fn push_epoch_builder(&self, server: &Server) -> Result<()> {
        println!("\nROOT FILES");
        self.push_root_files(server).await?;

        println!("\n\nROOT DIRECTORIES");
        for resource in [Resource::Config, Resource::Candlesticks, Resource::Dist] {
            println!("\n{}:", resource.segment().to_uppercase());
            self.push_resource(server, resource).await?;
        }

        println!("\n\nEPOCH DIRECTORIES");
        self.push_epoch(server).await
    }

    pub async fn pull(&self, target: Option<&str>, what: PullTarget) -> Result<()> {
        // Validate before prompting for a server
        if let PullTarget::TrainedModels(model_type) = &what {
            if !self.model_types(TRAINABLE_GROUP).contains(model_type) {
                return Err(ClusterError::Unsupported(format!(
                    "{model_type} is not a trainable model type"
                )));
            }
        }

        let server = self.target(target, SelectionFilter::available()).await?;
        match what {
            PullTarget::TrainedModels(model_type) => self.pull_trained_models(&server, &model_type).await,
            PullTarget::DbManagement => {
                let origin = self.paths.resolve(false, Resource::DbManagement)?;
                let destination = self.paths.path(true, None);
                self.sync.pull_dir(&server, &origin, &destination, Cleanup::Remove).await
            }
            PullTarget::RegressionSelection => {
                self.pull_epoch_resource(&server, Resource::RegressionSelection, Cleanup::Keep).await
            }
            PullTarget::ClassificationTrainingData => {
                self.pull_epoch_resource(&server, Resource::ClassificationTrainingData, Cleanup::Keep)
                    .await
            }
            PullTarget::BacktestResults => {
                self.pull_epoch_resource(&server, Resource::BacktestResults, Cleanup::Recreate).await
            }
        }
    }

    async fn pull_epoch_resource(&self, server: &Server, resource: Resource, cleanup: Cleanup) -> Result<()> {
        let origin = self.paths.resolve(false, resource)?;
        let destination = self.paths.epoch_path(true, None)?;
        self.sync.pull_dir(server, &origin, &destination, cleanup).await
    }

    /// Certificates and models of one type land in the local type-agnostic
    /// roots; the remote type directories are recreated empty
    async fn pull_trained_models(&self, server: &Server, model_type: &str) -> Result<()> {
        for (step, resource) in [Resource::BatchedTrainingCertificates, Resource::ModelsBank]
            .into_iter()
            .enumerate()
        {
            println!("\n{}/2) {} ({}):", step + 1, resource.segment().to_uppercase(), model_type);
            let origin = self.paths.resolve_in(false, resource, &[model_type])?;
            let destination = self.paths.resolve(true, resource)?;
            self.sync.pull_dir(server, &origin, &destination, Cleanup::Recreate).await?;
        }
        Ok(())
    }
}
