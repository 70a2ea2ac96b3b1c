//! Rig configuration.
//!
//! Loaded from TOML, all fields optional with working defaults so a bare
//! `[refinery]`-less file or no file at all still yields a usable setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::adapter::{AdapterKind, WorkerMode};
use crate::error::{Error, Result};

/// Default location, relative to the rig checkout.
pub const DEFAULT_CONFIG_PATH: &str = ".refinery/config.toml";

/// Configuration for one rig.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RigConfig {
    /// Which source control backend drives this rig.
    pub adapter: AdapterKind,
    /// Upstream repository the rig clones from.
    pub repo_url: String,
    /// Root directory holding the rig's checkouts.
    pub rig_dir: PathBuf,
    /// Trunk branch merges land on by default.
    pub default_branch: String,
    /// Prefix for worker branches, `<prefix>/<worker>`.
    pub branch_prefix: String,
    /// Ticket database location.
    pub db_path: PathBuf,
    /// Directory for worker mailbox files.
    pub mailbox_dir: PathBuf,
    /// Seconds between processor passes.
    pub pass_interval_secs: u64,
    /// How workers get their checkouts.
    pub worker_mode: WorkerMode,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            adapter: AdapterKind::Git,
            repo_url: String::new(),
            rig_dir: PathBuf::from("."),
            default_branch: "main".into(),
            branch_prefix: "worker".into(),
            db_path: PathBuf::from(".refinery/tickets.db"),
            mailbox_dir: PathBuf::from(".refinery/mailbox"),
            pass_interval_secs: 30,
            worker_mode: WorkerMode::Worktree,
        }
    }
}

impl RigConfig {
    /// Parse a config from TOML text.
    ///
    /// # Errors
    ///
    /// Returns `Config` for malformed TOML, unknown fields or an unknown
    /// adapter kind.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `Config` when the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("reading {}: {e}", path.display())))?;
        Self::from_toml(&text)
    }

    /// Load from a TOML file, falling back to defaults when it is absent.
    ///
    /// # Errors
    ///
    /// Returns `Config` when a file exists but cannot be read or parsed.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Time between processor passes.
    #[must_use]
    pub const fn pass_interval(&self) -> Duration {
        Duration::from_secs(self.pass_interval_secs)
    }
}
