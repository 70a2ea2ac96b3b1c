//! Source control adapter port.
//!
//! The processor and manager drive merges through this trait and never
//! touch a VCS directly. Backends form a closed set picked by
//! configuration; adding one means adding an [`AdapterKind`] variant and
//! wiring it in [`AdapterKind::create`].

pub mod git;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::RigConfig;

/// A failed source control operation.
///
/// The detail is recorded verbatim on the merge request, so it carries the
/// operation name and captured process output rather than a chain of
/// wrapped causes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct AdapterError {
    pub op: String,
    pub worker: String,
    pub detail: String,
}

impl std::fmt::Display for AdapterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.worker.is_empty() {
            write!(f, "{} failed: {}", self.op, self.detail)
        } else {
            write!(f, "{} failed for worker {}: {}", self.op, self.worker, self.detail)
        }
    }
}

impl AdapterError {
    pub fn new(
        op: impl Into<String>,
        worker: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            op: op.into(),
            worker: worker.into(),
            detail: detail.into(),
        }
    }
}

/// Result alias for adapter operations.
pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// Available source control backends.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AdapterKind {
    Git,
}

impl AdapterKind {
    /// Build the backend for this kind from rig configuration.
    #[must_use]
    pub fn create(self, config: &RigConfig) -> Arc<dyn SourceControlAdapter> {
        match self {
            Self::Git => Arc::new(git::GitAdapter::from_config(config)),
        }
    }
}

/// How workers get a checkout of their own.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum WorkerMode {
    /// One worktree per worker under the rig; activation is a no-op.
    Worktree,
    /// One shared checkout; workers own branches and activation switches.
    Branch,
}

/// Operations the queue needs from a source control system.
#[async_trait]
pub trait SourceControlAdapter: Send + Sync {
    /// Which backend this is.
    fn kind(&self) -> AdapterKind;

    /// Prepare the rig directory, cloning the upstream repository.
    async fn rig_init(&self) -> AdapterResult<()>;

    /// Create a checkout for a worker, returning its path.
    async fn worker_create(&self, worker: &str) -> AdapterResult<PathBuf>;

    /// Make the worker's branch the active context where the mode needs it.
    async fn worker_activate(&self, worker: &str) -> AdapterResult<()>;

    /// Release the active context.
    async fn worker_deactivate(&self, worker: &str) -> AdapterResult<()>;

    /// Directory build steps should run in for this worker.
    fn build_root(&self, worker: &str) -> PathBuf;

    /// Bring the worker's checkout up to date with the upstream trunk.
    async fn sync(&self, worker: &str) -> AdapterResult<()>;

    /// Publish the worker's branch for integration into `target`.
    async fn submit(&self, worker: &str, branch: &str, target: &str) -> AdapterResult<()>;
}
