//! Cluster and epoch configuration loading
//!
//! Handles:
//! - `cluster.json` / `cluster.toml`: roster, ssh identity, local workspace root
//! - `epoch.json` / `epoch.toml`: optional current epoch id
//! - Config directory override through `EB_CLUSTER_CONFIG_DIR`
//! - `~` expansion for local paths

use crate::error::{ClusterError, Result};
use crate::servers::Server;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const CONFIG_DIR_ENV: &str = "EB_CLUSTER_CONFIG_DIR";
pub const DEFAULT_CONFIG_DIR: &str = "config";

const CLUSTER_FILE_STEM: &str = "cluster";
const EPOCH_FILE_STEM: &str = "epoch";
const SUPPORTED_EXTENSIONS: &[&str] = &["json", "toml"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Directory holding the local `epoch-builder` checkout
    pub local_path: String,
    pub ssh_private_key_path: String,
    pub servers: Vec<Server>,
    /// Model type groups, e.g. `{"all": [...], "classification": [...]}`
    #[serde(default)]
    pub trainable_model_types: HashMap<String, Vec<String>>,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochConfig {
    pub id: String,
}

/// Everything read from the config directory at startup
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub cluster: ClusterConfig,
    pub epoch: Option<EpochConfig>,
}

fn default_probe_timeout() -> u64 {
    1
}

impl LoadedConfig {
    pub fn epoch_id(&self) -> Option<String> {
        self.epoch.as_ref().map(|e| e.id.clone())
    }
}

/// Config directory from the environment, falling back to `./config`
pub fn config_dir() -> PathBuf {
    std::env::var(CONFIG_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_DIR))
}

/// Load the cluster configuration (required) and the epoch configuration (optional)
pub async fn load(dir: &Path) -> Result<LoadedConfig> {
    let cluster_path = find_file(dir, CLUSTER_FILE_STEM).await.ok_or_else(|| ClusterError::Config {
        path: dir.join(format!("{CLUSTER_FILE_STEM}.json")),
        message: "the cluster configuration file does not exist".to_string(),
    })?;

    let mut cluster: ClusterConfig = read_file(&cluster_path).await?;
    cluster.local_path = expand_home(&cluster.local_path);
    cluster.ssh_private_key_path = expand_home(&cluster.ssh_private_key_path);
    info!(
        "Loaded cluster configuration from {} ({} servers)",
        cluster_path.display(),
        cluster.servers.len()
    );

    // A missing epoch file is expected before the first epoch is created
    let epoch = match find_file(dir, EPOCH_FILE_STEM).await {
        Some(path) => match read_file::<EpochConfig>(&path).await {
            Ok(epoch) => {
                debug!("Current epoch: {}", epoch.id);
                Some(epoch)
            }
            Err(e) => {
                warn!("Epoch configuration could not be loaded: {}", e);
                None
            }
        },
        None => {
            warn!("No epoch configuration in {}, epoch paths are unavailable", dir.display());
            None
        }
    };

    Ok(LoadedConfig { cluster, epoch })
}

async fn find_file(dir: &Path, stem: &str) -> Option<PathBuf> {
    for ext in SUPPORTED_EXTENSIONS {
        let path = dir.join(format!("{stem}.{ext}"));
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => return Some(path),
            Ok(_) => debug!("{} is not a file", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Cannot read {}: {}", path.display(), e),
        }
    }
    None
}

/// Parse a JSON or TOML file, picking the format from its extension
pub async fn read_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = tokio::fs::read_to_string(path).await?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => Ok(serde_json::from_str(&content)?),
        Some("toml") => Ok(toml::from_str(&content)?),
        _ => Err(ClusterError::Config {
            path: path.to_path_buf(),
            message: "the provided file is neither json nor toml".to_string(),
        }),
    }
}

/// Replace a leading `~` with the home directory
pub fn expand_home(path: &str) -> String {
    let rest = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => return path.to_string(),
    };
    match dirs::home_dir() {
        Some(home) => format!("{}{}", home.display(), rest),
        None => path.to_string(),
    }
}
