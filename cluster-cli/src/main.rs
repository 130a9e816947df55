//! Epoch Builder cluster CLI
//!
//! Operator entry point for the training fleet:
//! - Fleet status, connection, reboot/shutdown and job kill
//! - Pipeline stage launches (attached or detached with log tail)
//! - Push/pull of the epoch builder workspace
//!
//! A server may be passed with `--server`; otherwise an interactive picker is shown.

mod prompt;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use epoch_cluster_core::cluster::TRAINABLE_GROUP;
use epoch_cluster_core::config;
use epoch_cluster_core::{Cluster, ProcessRunner, PullTarget, PushTarget, Stage};
use prompt::DialoguerSelector;
use std::path::PathBuf;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "eb_cluster=info,epoch_cluster_core=info";

#[derive(Parser, Debug)]
#[command(name = "eb-cluster", version, about = "Epoch Builder cluster operations")]
struct Cli {
    /// Directory holding cluster.json/toml and epoch.json/toml
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Target server name (`localhost` and `all` where supported)
    #[arg(long, short, global = true)]
    server: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Open a shell on a server
    Connect,
    /// Job state and system info
    Status,
    /// Follow the job log
    Logs,
    Reboot,
    Shutdown,
    /// Kill the running job
    Kill,
    InstallSshKey,
    UnitTests,
    /// Run a pipeline stage
    Run {
        #[arg(value_enum)]
        stage: StageArg,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Run any script from dist/
    Exec {
        endpoint: String,
        /// Run in the background and follow its log (remote hosts only)
        #[arg(long, default_value_t = false)]
        detach: bool,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    Push {
        #[arg(value_enum)]
        target: PushArg,
    },
    Pull {
        #[arg(value_enum)]
        target: PullArg,
        /// Model type for trained-models, prompted when omitted
        #[arg(long)]
        model_type: Option<String>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum StageArg {
    CreateEpoch,
    GenerateRegressionTrainingConfigs,
    TrainRegressionBatch,
    InitializePredictionModels,
    FindProfitableConfigs,
    BuildPredictionModels,
    ExportEpoch,
}

impl From<StageArg> for Stage {
    fn from(value: StageArg) -> Self {
        match value {
            StageArg::CreateEpoch => Stage::CreateEpoch,
            StageArg::GenerateRegressionTrainingConfigs => Stage::GenerateRegressionTrainingConfigs,
            StageArg::TrainRegressionBatch => Stage::TrainRegressionBatch,
            StageArg::InitializePredictionModels => Stage::InitializePredictionModels,
            StageArg::FindProfitableConfigs => Stage::FindProfitableConfigs,
            StageArg::BuildPredictionModels => Stage::BuildPredictionModels,
            StageArg::ExportEpoch => Stage::ExportEpoch,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum PushArg {
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
    Epoch,
    EpochBuilder,
}

impl From<PushArg> for PushTarget {
    fn from(value: PushArg) -> Self {
        match value {
            PushArg::RootFiles => PushTarget::RootFiles,
            PushArg::Config => PushTarget::Config,
            PushArg::DbManagement => PushTarget::DbManagement,
            PushArg::Candlesticks => PushTarget::Candlesticks,
            PushArg::Dist => PushTarget::Dist,
            PushArg::Models => PushTarget::Models,
            PushArg::RegressionSelection => PushTarget::RegressionSelection,
            PushArg::ClassificationTrainingData => PushTarget::ClassificationTrainingData,
            PushArg::TrainingConfigs => PushTarget::TrainingConfigs,
            PushArg::BacktestConfigurations => PushTarget::BacktestConfigurations,
            PushArg::BacktestResults => PushTarget::BacktestResults,
            PushArg::Epoch => PushTarget::Epoch,
            PushArg::EpochBuilder => PushTarget::EpochBuilder,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum PullArg {
    TrainedModels,
    DbManagement,
    RegressionSelection,
    ClassificationTrainingData,
    BacktestResults,
}

async fn run(cli: Cli) -> Result<()> {
    let dir = cli.config_dir.unwrap_or_else(config::config_dir);
    let loaded = config::load(&dir)
        .await
        .with_context(|| format!("Failed to load the configuration from {}", dir.display()))?;

    let cluster = Cluster::new(&loaded, ProcessRunner::new(), DialoguerSelector)
        .context("Invalid cluster configuration")?;
    let server = cli.server.as_deref();

    match cli.command {
        Commands::Connect => cluster.connect(server).await?,
        Commands::Status => print!("{}", cluster.status(server).await?),
        Commands::Logs => cluster.logs(server).await?,
        Commands::Reboot => cluster.reboot(server).await?,
        Commands::Shutdown => cluster.shutdown(server).await?,
        Commands::Kill => cluster.kill(server).await?,
        Commands::InstallSshKey => cluster.install_ssh_key(server).await?,
        Commands::UnitTests => cluster.unit_tests(server).await?,
        Commands::Run { stage, args } => cluster.run_stage(server, stage.into(), &args).await?,
        Commands::Exec { endpoint, detach, args } => {
            cluster.run_job(server, &endpoint, &args, detach).await?
        }
        Commands::Push { target } => cluster.push(server, target.into()).await?,
        Commands::Pull { target, model_type } => {
            let what = match target {
                PullArg::TrainedModels => {
                    let model_type = match model_type {
                        Some(model_type) => model_type,
                        None => prompt::model_type(cluster.model_types(TRAINABLE_GROUP)).await?,
                    };
                    PullTarget::TrainedModels(model_type)
                }
                PullArg::DbManagement => PullTarget::DbManagement,
                PullArg::RegressionSelection => PullTarget::RegressionSelection,
                PullArg::ClassificationTrainingData => PullTarget::ClassificationTrainingData,
                PullArg::BacktestResults => PullTarget::BacktestResults,
            };
            cluster.pull(server, what).await?
        }
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    dotenvy::dotenv().ok(); // no .env is fine

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let cli = Cli::parse();
    debug!("Command: {:?}", cli.command);

    match run(cli).await {
        Ok(()) => info!("Done"),
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    }
}
