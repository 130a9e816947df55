//! Epoch Builder cluster core - remote command and synchronization engine
//!
//! Drives the training fleet from the operator's workstation:
//! - Process execution (interactive, captured, detached) locally or over ssh
//! - Job detection from process tables
//! - Local/remote path layout of the epoch builder workspace
//! - Push/pull directory synchronization with scp

pub mod ssh;
pub mod error;
pub mod config;
pub mod path;
pub mod execution;
pub mod probe;
pub mod servers;
pub mod sync;
pub mod cluster;

pub use cluster::{Cluster, HostReport, HostState, PullTarget, PushTarget, Stage, StatusReport};
pub use config::LoadedConfig;
pub use error::{ClusterError, Result};
pub use execution::{CommandRunner, ExecutionMode, Executor, ProcessRunner};
pub use servers::{SelectionChoice, SelectionFilter, Server, ServerSelector};
