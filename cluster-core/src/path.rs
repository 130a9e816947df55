//! Path resolution for the epoch builder workspace
//!
//! Maps a logical [`Resource`] to its local or remote location:
//! - local paths live under `{local_root}/epoch-builder`
//! - remote paths are relative to the remote user's home: `epoch-builder/...`
//! - epoch resources are nested under the current epoch id and fail fast
//!   while no epoch id is configured
//!
//! Resolution is pure: no filesystem access, same inputs give the same path.

use crate::error::{ClusterError, Result};
use std::fmt;

pub const ROOT_DIR: &str = "epoch-builder";

/// Every addressable file or directory of the epoch builder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    // Root files
    Requirements,
    PackageJson,
    NohupLogs,

    // Root directories
    Config,
    DbManagement,
    Candlesticks,
    Dist,
    UnitTests,

    // Epoch directories
    Backtests,
    BatchedTrainingCertificates,
    Models,
    ModelsBank,
    RegressionSelection,
    ClassificationTrainingData,
    TrainingConfigs,
    BacktestConfigurations,
    BacktestResults,
}

impl Resource {
    /// Directories living inside the epoch, in creation order
    pub const EPOCH_DIRECTORIES: [Resource; 9] = [
        Resource::Backtests,
        Resource::BatchedTrainingCertificates,
        Resource::Models,
        Resource::ModelsBank,
        Resource::RegressionSelection,
        Resource::ClassificationTrainingData,
        Resource::TrainingConfigs,
        Resource::BacktestConfigurations,
        Resource::BacktestResults,
    ];

    pub const fn segment(self) -> &'static str {
        match self {
            Resource::Requirements => "requirements.txt",
            Resource::PackageJson => "package.json",
            Resource::NohupLogs => "nohup.out",
            Resource::Config => "config",
            Resource::DbManagement => "db_management",
            Resource::Candlesticks => "candlesticks",
            Resource::Dist => "dist",
            Resource::UnitTests => "dist/tests",
            Resource::Backtests => "backtests",
            Resource::BatchedTrainingCertificates => "batched_training_certificates",
            Resource::Models => "models",
            Resource::ModelsBank => "models_bank",
            Resource::RegressionSelection => "regression_selection",
            Resource::ClassificationTrainingData => "classification_training_data",
            Resource::TrainingConfigs => "training_configs",
            Resource::BacktestConfigurations => "backtest_configurations",
            Resource::BacktestResults => "backtest_results",
        }
    }

    pub const fn is_epoch_scoped(self) -> bool {
        matches!(
            self,
            Resource::Backtests
                | Resource::BatchedTrainingCertificates
                | Resource::Models
                | Resource::ModelsBank
                | Resource::RegressionSelection
                | Resource::ClassificationTrainingData
                | Resource::TrainingConfigs
                | Resource::BacktestConfigurations
                | Resource::BacktestResults
        )
    }

    /// How many category segments may follow the resource segment
    pub const fn max_categories(self) -> usize {
        match self {
            Resource::TrainingConfigs => 2,
            Resource::Backtests
            | Resource::BatchedTrainingCertificates
            | Resource::ModelsBank => 1,
            _ => 0,
        }
    }

    pub const fn is_file(self) -> bool {
        matches!(
            self,
            Resource::Requirements | Resource::PackageJson | Resource::NohupLogs
        )
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.segment())
    }
}

/// A resource resolved on both sides of a transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalPath {
    pub local: String,
    pub remote: String,
}

/// Immutable path context built once from configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathContext {
    local_root: String,
    epoch_id: Option<String>,
}

impl PathContext {
    pub fn new(local_root: impl Into<String>, epoch_id: Option<String>) -> Self {
        let local_root: String = local_root.into();
        Self {
            local_root: local_root.trim_end_matches('/').to_string(),
            epoch_id,
        }
    }

    pub fn local_root(&self) -> &str {
        &self.local_root
    }

    pub fn epoch_id(&self) -> Option<&str> {
        self.epoch_id.as_deref()
    }

    /// Root of the epoch builder, or `sub` inside it
    pub fn path(&self, local: bool, sub: Option<&str>) -> String {
        let base = if local {
            format!("{}/{}", self.local_root, ROOT_DIR)
        } else {
            ROOT_DIR.to_string()
        };
        match sub {
            Some(sub) => format!("{base}/{sub}"),
            None => base,
        }
    }

    /// Root of the current epoch, or `sub` inside it
    pub fn epoch_path(&self, local: bool, sub: Option<&str>) -> Result<String> {
        let epoch_id = self.epoch_id.as_deref().ok_or(ClusterError::PathResolution)?;
        Ok(match sub {
            Some(sub) => self.path(local, Some(&format!("{epoch_id}/{sub}"))),
            None => self.path(local, Some(epoch_id)),
        })
    }

    /// Resolve a resource root
    pub fn resolve(&self, local: bool, resource: Resource) -> Result<String> {
        self.resolve_in(local, resource, &[])
    }

    /// Resolve a resource with optional category segments, e.g. the model type
    /// for [`Resource::ModelsBank`] or type + category for [`Resource::TrainingConfigs`]
    pub fn resolve_in(&self, local: bool, resource: Resource, categories: &[&str]) -> Result<String> {
        if categories.len() > resource.max_categories() {
            return Err(ClusterError::Unsupported(format!(
                "{resource} accepts at most {} category segment(s)",
                resource.max_categories()
            )));
        }

        let mut sub = resource.segment().to_string();
        for category in categories {
            sub.push('/');
            sub.push_str(category);
        }

        if resource.is_epoch_scoped() {
            self.epoch_path(local, Some(&sub))
        } else {
            Ok(self.path(local, Some(&sub)))
        }
    }

    /// Local and remote location of a resource
    pub fn logical(&self, resource: Resource, categories: &[&str]) -> Result<LogicalPath> {
        Ok(LogicalPath {
            local: self.resolve_in(true, resource, categories)?,
            remote: self.resolve_in(false, resource, categories)?,
        })
    }

    /// Directory a resource is copied into when pushed: the epoch root for
    /// epoch resources, the epoch builder root otherwise
    pub fn parent_of(&self, local: bool, resource: Resource) -> Result<String> {
        if resource.is_epoch_scoped() {
            self.epoch_path(local, None)
        } else {
            Ok(self.path(local, None))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_epoch() -> PathContext {
        PathContext::new("/home/op", Some("_abc123".to_string()))
    }

    fn without_epoch() -> PathContext {
        PathContext::new("/home/op", None)
    }

    #[test]
    fn test_root_paths() {
        let paths = with_epoch();
        assert_eq!(paths.path(true, None), "/home/op/epoch-builder");
        assert_eq!(paths.path(false, None), "epoch-builder");
        assert_eq!(
            paths.resolve(true, Resource::Candlesticks).unwrap(),
            "/home/op/epoch-builder/candlesticks"
        );
        assert_eq!(paths.resolve(false, Resource::UnitTests).unwrap(), "epoch-builder/dist/tests");
        assert_eq!(paths.resolve(false, Resource::NohupLogs).unwrap(), "epoch-builder/nohup.out");
    }

    #[test]
    fn test_epoch_paths() {
        let paths = with_epoch();
        assert_eq!(
            paths.resolve(false, Resource::Models).unwrap(),
            "epoch-builder/_abc123/models"
        );
        assert_eq!(paths.epoch_path(true, None).unwrap(), "/home/op/epoch-builder/_abc123");
        assert_eq!(paths.epoch_path(false, None).unwrap(), "epoch-builder/_abc123");
    }

    #[test]
    fn test_composite_categories() {
        let paths = with_epoch();
        assert_eq!(
            paths.resolve_in(false, Resource::ModelsBank, &["keras_regression"]).unwrap(),
            "epoch-builder/_abc123/models_bank/keras_regression"
        );
        assert_eq!(
            paths.resolve(false, Resource::BatchedTrainingCertificates).unwrap(),
            "epoch-builder/_abc123/batched_training_certificates"
        );
        assert_eq!(
            paths
                .resolve_in(true, Resource::TrainingConfigs, &["xgb_regression", "up"])
                .unwrap(),
            "/home/op/epoch-builder/_abc123/training_configs/xgb_regression/up"
        );
        assert!(matches!(
            paths.resolve_in(true, Resource::Models, &["x"]),
            Err(ClusterError::Unsupported(_))
        ));
    }

    #[test]
    fn test_every_epoch_resource_fails_without_epoch() {
        let paths = without_epoch();
        for resource in Resource::EPOCH_DIRECTORIES {
            for local in [true, false] {
                assert!(matches!(
                    paths.resolve(local, resource),
                    Err(ClusterError::PathResolution)
                ));
            }
        }
        assert!(matches!(paths.epoch_path(true, None), Err(ClusterError::PathResolution)));
        // root resources keep resolving
        assert!(paths.resolve(true, Resource::Dist).is_ok());
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let paths = with_epoch();
        let all = [
            Resource::Requirements,
            Resource::PackageJson,
            Resource::NohupLogs,
            Resource::Config,
            Resource::DbManagement,
            Resource::Candlesticks,
            Resource::Dist,
            Resource::UnitTests,
        ]
        .into_iter()
        .chain(Resource::EPOCH_DIRECTORIES);
        for resource in all {
            for local in [true, false] {
                assert_eq!(
                    paths.resolve(local, resource).unwrap(),
                    paths.resolve(local, resource).unwrap()
                );
            }
        }
    }

    #[test]
    fn test_logical_pair_and_parent() {
        let paths = with_epoch();
        let logical = paths.logical(Resource::BacktestResults, &[]).unwrap();
        assert_eq!(logical.local, "/home/op/epoch-builder/_abc123/backtest_results");
        assert_eq!(logical.remote, "epoch-builder/_abc123/backtest_results");
        assert_eq!(paths.parent_of(false, Resource::Dist).unwrap(), "epoch-builder");
        assert_eq!(
            paths.parent_of(false, Resource::Models).unwrap(),
            "epoch-builder/_abc123"
        );
    }

    #[test]
    fn test_trailing_slash_in_root() {
        let paths = PathContext::new("/home/op/", None);
        assert_eq!(paths.path(true, Some("dist")), "/home/op/epoch-builder/dist");
    }
}
