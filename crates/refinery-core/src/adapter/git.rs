//! Git backend, shelling out to the `git` binary.
//!
//! Worktree mode keeps a bare clone at `<rig>/.repo.git` and one worktree
//! per worker under `<rig>/workers/`. Branch mode keeps a single clone at
//! `<rig>/repo` and switches branches on activation.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{AdapterError, AdapterKind, AdapterResult, SourceControlAdapter, WorkerMode};
use crate::config::RigConfig;

const BARE_REPO_DIR: &str = ".repo.git";
const SHARED_REPO_DIR: &str = "repo";
const WORKERS_DIR: &str = "workers";

pub struct GitAdapter {
    rig_dir: PathBuf,
    repo_url: String,
    default_branch: String,
    branch_prefix: String,
    worker_mode: WorkerMode,
}

impl GitAdapter {
    #[must_use]
    pub fn from_config(config: &RigConfig) -> Self {
        Self {
            rig_dir: config.rig_dir.clone(),
            repo_url: config.repo_url.clone(),
            default_branch: config.default_branch.clone(),
            branch_prefix: config.branch_prefix.clone(),
            worker_mode: config.worker_mode,
        }
    }

    fn bare_repo(&self) -> PathBuf {
        self.rig_dir.join(BARE_REPO_DIR)
    }

    fn shared_repo(&self) -> PathBuf {
        self.rig_dir.join(SHARED_REPO_DIR)
    }

    /// Branch a worker commits on.
    #[must_use]
    pub fn worker_branch(&self, worker: &str) -> String {
        format!("{}/{}", self.branch_prefix, worker)
    }

    /// Directory git commands run in for a worker's checkout.
    fn worker_dir(&self, worker: &str) -> PathBuf {
        match self.worker_mode {
            WorkerMode::Worktree => self.rig_dir.join(WORKERS_DIR).join(worker),
            WorkerMode::Branch => self.shared_repo(),
        }
    }

    async fn git(
        &self,
        op: &'static str,
        worker: &str,
        dir: &Path,
        args: &[&str],
    ) -> AdapterResult<String> {
        debug!(op, worker, ?args, "running git");
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .await
            .map_err(|e| AdapterError::new(op, worker, format!("spawning git: {e}")))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = if stderr.trim().is_empty() {
                String::from_utf8_lossy(&output.stdout).trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            Err(AdapterError::new(op, worker, detail))
        }
    }

    /// The branch worktrees start from: the remote HEAD when resolvable,
    /// then the configured name, then `main` / `master`.
    async fn resolve_default_branch(&self, worker: &str, repo: &Path) -> AdapterResult<String> {
        if let Ok(head) = self
            .git(
                "resolve-default-branch",
                worker,
                repo,
                &["symbolic-ref", "refs/remotes/origin/HEAD"],
            )
            .await
        {
            if let Some(branch) = head.rsplit('/').next() {
                if !branch.is_empty() {
                    return Ok(branch.to_string());
                }
            }
        }

        for candidate in [self.default_branch.as_str(), "main", "master"] {
            let probe = self
                .git(
                    "resolve-default-branch",
                    worker,
                    repo,
                    &[
                        "show-ref",
                        "--verify",
                        "--quiet",
                        &format!("refs/heads/{candidate}"),
                    ],
                )
                .await;
            if probe.is_ok() {
                return Ok(candidate.to_string());
            }
        }

        Err(AdapterError::new(
            "resolve-default-branch",
            worker,
            format!("no default branch in {}", repo.display()),
        ))
    }
}

#[async_trait]
impl SourceControlAdapter for GitAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Git
    }

    async fn rig_init(&self) -> AdapterResult<()> {
        if self.repo_url.is_empty() {
            return Err(AdapterError::new(
                "rig-init",
                "",
                "git adapter requires repo_url in config",
            ));
        }
        tokio::fs::create_dir_all(&self.rig_dir)
            .await
            .map_err(|e| {
                AdapterError::new(
                    "rig-init",
                    "",
                    format!("creating {}: {e}", self.rig_dir.display()),
                )
            })?;

        match self.worker_mode {
            WorkerMode::Worktree => {
                let bare = self.bare_repo();
                self.git(
                    "rig-init",
                    "",
                    &self.rig_dir,
                    &[
                        "clone",
                        "--bare",
                        &self.repo_url,
                        &bare.to_string_lossy(),
                    ],
                )
                .await?;
            }
            WorkerMode::Branch => {
                let shared = self.shared_repo();
                self.git(
                    "rig-init",
                    "",
                    &self.rig_dir,
                    &["clone", &self.repo_url, &shared.to_string_lossy()],
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn worker_create(&self, worker: &str) -> AdapterResult<PathBuf> {
        let branch = self.worker_branch(worker);
        match self.worker_mode {
            WorkerMode::Worktree => {
                let bare = self.bare_repo();
                let start = self.resolve_default_branch(worker, &bare).await?;
                let path = self.worker_dir(worker);
                self.git(
                    "worker-create",
                    worker,
                    &bare,
                    &[
                        "worktree",
                        "add",
                        "-b",
                        &branch,
                        &path.to_string_lossy(),
                        &start,
                    ],
                )
                .await?;
                Ok(path)
            }
            WorkerMode::Branch => {
                let shared = self.shared_repo();
                let start = self.resolve_default_branch(worker, &shared).await?;
                self.git("worker-create", worker, &shared, &["branch", &branch, &start])
                    .await?;
                Ok(shared)
            }
        }
    }

    async fn worker_activate(&self, worker: &str) -> AdapterResult<()> {
        match self.worker_mode {
            // Worktrees are always live, nothing to switch.
            WorkerMode::Worktree => Ok(()),
            WorkerMode::Branch => {
                let branch = self.worker_branch(worker);
                self.git(
                    "worker-activate",
                    worker,
                    &self.shared_repo(),
                    &["checkout", &branch],
                )
                .await
                .map(|_| ())
            }
        }
    }

    async fn worker_deactivate(&self, worker: &str) -> AdapterResult<()> {
        match self.worker_mode {
            WorkerMode::Worktree => Ok(()),
            WorkerMode::Branch => self
                .git(
                    "worker-deactivate",
                    worker,
                    &self.shared_repo(),
                    &["checkout", &self.default_branch],
                )
                .await
                .map(|_| ()),
        }
    }

    fn build_root(&self, worker: &str) -> PathBuf {
        self.worker_dir(worker)
    }

    async fn sync(&self, worker: &str) -> AdapterResult<()> {
        let dir = self.worker_dir(worker);
        self.git("sync", worker, &dir, &["fetch", "origin"]).await?;
        self.git(
            "sync",
            worker,
            &dir,
            &["pull", "--rebase", "origin", &self.default_branch],
        )
        .await?;
        Ok(())
    }

    async fn submit(&self, worker: &str, branch: &str, target: &str) -> AdapterResult<()> {
        debug!(worker, branch, target, "submitting branch");
        let dir = self.worker_dir(worker);
        self.git("submit", worker, &dir, &["push", "-u", "origin", branch])
            .await?;
        // Land the branch on the target ref; a stale worker fails
        // non-fast-forward here until the next sync rebases it.
        let refspec = format!("{branch}:{target}");
        self.git("submit", worker, &dir, &["push", "origin", &refspec])
            .await?;
        Ok(())
    }
}
