//! VCS driver: worktree lifecycle and merge-with-conflict-detection, grounded on the
//! original `merge.py`'s `_run_git`/`create_worktree`/`merge_branch` helpers but
//! reshaped around a typed error enum per the teacher's `git::GitError` idiom.

mod error;

pub use error::VcsError;

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::shell_exec;

/// Result of a merge attempt. Exactly one of `success`/`conflict`/other-error is true,
/// per the data model's invariant.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MergeResult {
    pub branch: String,
    pub success: bool,
    pub conflict: bool,
    pub error: String,
}

/// Drives `git` subcommands against a single repository root (the main line's working
/// tree, never a worker's worktree).
pub struct Vcs {
    repo_dir: PathBuf,
}

impl Vcs {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
        }
    }

    fn git(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new("git");
        cmd.current_dir(&self.repo_dir).args(args);
        cmd
    }

    fn run(&self, args: &[&str]) -> Result<shell_exec::CommandOutput, VcsError> {
        shell_exec::run(&mut self.git(args)).map_err(|e| VcsError::Spawn {
            command: format!("git {}", args.join(" ")),
            source: e.to_string(),
        })
    }

    pub fn is_repository(path: &Path) -> bool {
        Command::new("git")
            .current_dir(path)
            .args(["rev-parse", "--is-inside-work-tree"])
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// Idempotent with respect to stale state: stale directory and stale branch are
    /// both removed before the fresh worktree is created from the current head.
    pub fn create_worktree(&self, dir: &Path, branch: &str) -> Result<(), VcsError> {
        if dir.exists() {
            let _ = std::fs::remove_dir_all(dir);
            let _ = self.run(&["worktree", "prune"]);
        }

        // Force-delete a stale branch of the same name, ignoring failure (branch may
        // not exist, which is the common case).
        let _ = self.run(&["branch", "-D", branch]);

        let dir_str = dir.to_string_lossy().to_string();
        let output = self.run(&["worktree", "add", "-b", branch, &dir_str, "HEAD"])?;
        if !output.success() {
            return Err(VcsError::CommandFailed {
                command: format!("git worktree add -b {branch} {dir_str} HEAD"),
                status: output.status,
                output: output.combined,
            });
        }
        Ok(())
    }

    /// Succeeds (returns `Ok(true)`) when `dir` does not exist on entry. Falls back to
    /// a filesystem removal plus prune when the native `worktree remove` fails (e.g.
    /// the worker left uncommitted state the native command refuses to discard without
    /// `--force`, which we already pass, or the worktree was already half-removed).
    pub fn remove_worktree(&self, dir: &Path) -> Result<bool, VcsError> {
        if !dir.exists() {
            return Ok(true);
        }

        let dir_str = dir.to_string_lossy().to_string();
        let output = self.run(&["worktree", "remove", "--force", &dir_str])?;
        if output.success() {
            return Ok(true);
        }

        let _ = std::fs::remove_dir_all(dir);
        let _ = self.run(&["worktree", "prune"]);
        Ok(true)
    }

    /// Non-fast-forward merge with conflict detection. Abort is attempted on any
    /// non-zero exit to leave the working tree clean, regardless of cause.
    pub fn merge(&self, branch: &str) -> Result<MergeResult, VcsError> {
        let message = format!("Merge parallel branch: {branch}");
        let output = self.run(&["merge", "--no-ff", branch, "-m", &message])?;

        if output.success() {
            return Ok(MergeResult {
                branch: branch.to_string(),
                success: true,
                conflict: false,
                error: String::new(),
            });
        }

        let is_conflict = output.combined.to_lowercase().contains("conflict");
        let _ = self.run(&["merge", "--abort"]);

        if is_conflict {
            Ok(MergeResult {
                branch: branch.to_string(),
                success: false,
                conflict: true,
                error: String::new(),
            })
        } else {
            Ok(MergeResult {
                branch: branch.to_string(),
                success: false,
                conflict: false,
                error: output.combined,
            })
        }
    }

    pub fn delete_branch(&self, branch: &str) -> Result<(), VcsError> {
        let output = self.run(&["branch", "-D", branch])?;
        if !output.success() {
            return Err(VcsError::CommandFailed {
                command: format!("git branch -D {branch}"),
                status: output.status,
                output: output.combined,
            });
        }
        Ok(())
    }

    /// Removes the worktree root directory entirely and prunes dangling references.
    /// Run once at the end of a coordinator run.
    pub fn cleanup_worktrees(&self, worktree_root: &Path) -> Result<(), VcsError> {
        if worktree_root.exists() {
            let _ = std::fs::remove_dir_all(worktree_root);
        }
        let output = self.run(&["worktree", "prune"])?;
        if !output.success() {
            return Err(VcsError::CommandFailed {
                command: "git worktree prune".to_string(),
                status: output.status,
                output: output.combined,
            });
        }
        Ok(())
    }
}
