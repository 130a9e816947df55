//! Error taxonomy for cluster operations
//!
//! Every fallible operation in the engine returns [`ClusterError`]. Steps that
//! are allowed to fail are wrapped with [`crate::execution::best_effort`]
//! instead of matching on these variants at the call site.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, ClusterError>;

#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// The external program could not be started at all
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The external program ran and exited with a non-zero status
    #[error("the {program} process exited with the error code: {}", display_code(.exit_code))]
    CommandExecution {
        program: String,
        exit_code: Option<i32>,
    },

    #[error("the epoch id is not set because the epoch configuration could not be loaded")]
    PathResolution,

    #[error("server lookup failed: {0}")]
    ServerLookup(String),

    #[error("the epoch builder process is not running on {0}")]
    RemoteJobNotRunning(String),

    #[error("{server} is busy running process {pid}")]
    HostBusy { server: String, pid: String },

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("invalid configuration in {}: {message}", path.display())]
    Config { path: PathBuf, message: String },

    #[error("prompt failed: {0}")]
    Prompt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

fn display_code(code: &Option<i32>) -> String {
    match code {
        Some(c) => c.to_string(),
        None => "terminated by signal".to_string(),
    }
}
