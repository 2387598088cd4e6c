//! At-most-one-per-fingerprint job queue driver, grounded on `queue_runner.py`.
//! Runs builds one at a time against a single project, swapping its canonical spec
//! file out for each job's own and guaranteeing the swap is undone afterward.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::coordinator::Interrupted;
use crate::issue::ProjectState;
use crate::shell_exec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Interrupted,
}

impl JobStatus {
    /// A processable job is pending, interrupted, or (if a prior coordinator crashed
    /// mid-run and left it stuck) running — treated as stale and retried.
    fn is_processable(self) -> bool {
        matches!(self, Self::Pending | Self::Interrupted | Self::Running)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub spec_path: PathBuf,
    pub model: Option<String>,
    pub max_iterations: Option<u32>,
    pub parallel: bool,
    pub max_workers: Option<u32>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
}

impl Job {
    pub fn new(
        id: impl Into<String>,
        spec_path: impl Into<PathBuf>,
        model: Option<String>,
        max_iterations: Option<u32>,
        parallel: bool,
        max_workers: Option<u32>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            spec_path: spec_path.into(),
            model,
            max_iterations,
            parallel,
            max_workers,
            status: JobStatus::Pending,
            created_at: now,
            started_at: None,
            ended_at: None,
            exit_code: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStore {
    pub version: u32,
    pub jobs: Vec<Job>,
}

impl Default for QueueStore {
    fn default() -> Self {
        Self {
            version: 1,
            jobs: Vec::new(),
        }
    }
}

impl QueueStore {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
        let store: Self = serde_json::from_str(&data)
            .map_err(|e| anyhow::anyhow!("parsing {}: {e}", path.display()))?;
        Ok(store)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)
            .map_err(|e| anyhow::anyhow!("writing {}: {e}", path.display()))?;
        Ok(())
    }

    pub fn add(&mut self, job: Job) -> anyhow::Result<()> {
        if self.jobs.iter().any(|j| j.id == job.id) {
            anyhow::bail!("duplicate job id: {}", job.id);
        }
        self.jobs.push(job);
        Ok(())
    }

    /// The subset of jobs the processable filter selects, in list order. Property
    /// #6: this set is exactly the jobs whose status is pending, interrupted, or
    /// running.
    pub fn processable(&self) -> Vec<&Job> {
        self.jobs.iter().filter(|j| j.status.is_processable()).collect()
    }

    pub fn find(&self, id: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == id)
    }
}

/// Swaps the project's canonical spec file out for a job's own spec file on
/// acquisition, and restores the original byte-for-byte (or removes the canonical
/// file entirely, if none existed before) when dropped. Restoration runs on every
/// exit path, including an unwinding panic.
struct SpecSwap {
    canonical_path: PathBuf,
    backup_path: PathBuf,
    had_original: bool,
}

impl SpecSwap {
    fn acquire(canonical_path: PathBuf, job_spec_path: &Path) -> anyhow::Result<Self> {
        let backup_path = canonical_path.with_extension("json.queue-backup");
        let had_original = canonical_path.exists();
        if had_original {
            std::fs::copy(&canonical_path, &backup_path)?;
        }
        std::fs::copy(job_spec_path, &canonical_path)?;
        Ok(Self {
            canonical_path,
            backup_path,
            had_original,
        })
    }
}

impl Drop for SpecSwap {
    fn drop(&mut self) {
        if self.had_original {
            if let Err(e) = std::fs::copy(&self.backup_path, &self.canonical_path) {
                log::error!(
                    "failed to restore canonical spec {}: {e}",
                    self.canonical_path.display()
                );
            }
            let _ = std::fs::remove_file(&self.backup_path);
        } else {
            let _ = std::fs::remove_file(&self.canonical_path);
        }
    }
}

/// Drives the queue against a single project directory, invoking `coordinator_bin`
/// as a child process for each processable job.
pub struct QueueRunner {
    pub project_dir: PathBuf,
    pub store_path: PathBuf,
    pub coordinator_bin: String,
}

impl QueueRunner {
    pub const DEFAULT_STORE_PATH: &'static str = "data/queue.json";

    /// Runs every processable job in list order. `dry_run` reports what would run
    /// without invoking the coordinator or mutating the spec file.
    pub fn start(&self, dry_run: bool) -> anyhow::Result<()> {
        let mut store = QueueStore::load(&self.store_path)?;
        let canonical_path = self.project_dir.join(ProjectState::FILENAME);

        let processable_ids: Vec<String> = store.processable().iter().map(|j| j.id.clone()).collect();

        for id in processable_ids {
            if dry_run {
                log::info!("[dry-run] would process job {id}");
                continue;
            }
            self.run_one(&mut store, &canonical_path, &id)?;
        }
        Ok(())
    }

    fn run_one(&self, store: &mut QueueStore, canonical_path: &Path, id: &str) -> anyhow::Result<()> {
        let spec_path = store
            .jobs
            .iter()
            .find(|j| j.id == id)
            .map(|j| j.spec_path.clone())
            .ok_or_else(|| anyhow::anyhow!("job {id} vanished from the queue"))?;

        let started_at = Utc::now();
        if let Some(job) = store.jobs.iter_mut().find(|j| j.id == id) {
            job.status = JobStatus::Running;
            job.started_at = Some(started_at);
        }
        store.save(&self.store_path)?;

        let swap = SpecSwap::acquire(canonical_path.to_path_buf(), &spec_path)?;

        let run_result = (|| -> anyhow::Result<shell_exec::CommandOutput> {
            let job = store
                .jobs
                .iter()
                .find(|j| j.id == id)
                .ok_or_else(|| anyhow::anyhow!("job {id} vanished from the queue"))?;
            let mut command = Command::new(&self.coordinator_bin);
            command.arg("--project-dir").arg(&self.project_dir);
            if let Some(model) = &job.model {
                command.arg("--model").arg(model);
            }
            if let Some(max_iterations) = job.max_iterations {
                command.arg("--max-iterations").arg(max_iterations.to_string());
            }
            if job.parallel {
                command.arg("--parallel");
            }
            if let Some(max_workers) = job.max_workers {
                command.arg("--max-workers").arg(max_workers.to_string());
            }
            Ok(shell_exec::run_streamed(&mut command, |line| println!("{line}"))?)
        })();

        drop(swap);

        let (status, exit_code, error) = match run_result {
            Ok(output) => match output.status {
                0 => (JobStatus::Completed, Some(0), None),
                130 => (JobStatus::Interrupted, Some(130), None),
                other => (JobStatus::Failed, Some(other), Some(output.combined)),
            },
            Err(e) => (JobStatus::Failed, None, Some(e.to_string())),
        };

        if let Some(job) = store.jobs.iter_mut().find(|j| j.id == id) {
            job.status = status;
            job.exit_code = exit_code;
            job.error = error;
            job.ended_at = Some(Utc::now());
        }
        store.save(&self.store_path)?;

        if status == JobStatus::Interrupted {
            return Err(Interrupted.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: &str, status: JobStatus) -> Job {
        let mut j = Job::new(id, "/tmp/spec.json", None, None, false, None, Utc::now());
        j.status = status;
        j
    }

    #[test]
    fn add_rejects_duplicate_ids() {
        let mut store = QueueStore::default();
        store.add(job("A", JobStatus::Pending)).unwrap();
        assert!(store.add(job("A", JobStatus::Pending)).is_err());
    }

    #[test]
    fn processable_filter_matches_exactly_pending_interrupted_running() {
        let mut store = QueueStore::default();
        for (id, status) in [
            ("A", JobStatus::Pending),
            ("B", JobStatus::Running),
            ("C", JobStatus::Completed),
            ("D", JobStatus::Failed),
            ("E", JobStatus::Interrupted),
        ] {
            store.add(job(id, status)).unwrap();
        }
        let ids: Vec<&str> = store.processable().iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B", "E"]);
    }

    #[test]
    fn queue_store_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        let mut store = QueueStore::default();
        store.add(job("A", JobStatus::Pending)).unwrap();
        store.save(&path).unwrap();
        let loaded = QueueStore::load(&path).unwrap();
        assert_eq!(loaded.jobs.len(), 1);
        assert_eq!(loaded.jobs[0].id, "A");
    }

    #[test]
    fn missing_store_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = QueueStore::load(&dir.path().join("absent.json")).unwrap();
        assert!(store.jobs.is_empty());
    }

    #[test]
    fn s6_swap_restores_original_bytes_after_job_completes() {
        let dir = tempfile::tempdir().unwrap();
        let canonical = dir.path().join(ProjectState::FILENAME);
        std::fs::write(&canonical, b"spec A").unwrap();

        let job_spec = dir.path().join("spec_b.json");
        std::fs::write(&job_spec, b"spec B").unwrap();

        {
            let swap = SpecSwap::acquire(canonical.clone(), &job_spec).unwrap();
            assert_eq!(std::fs::read(&canonical).unwrap(), b"spec B");
            drop(swap);
        }
        assert_eq!(std::fs::read(&canonical).unwrap(), b"spec A");
    }

    #[test]
    fn s6_swap_removes_canonical_when_none_existed_originally() {
        let dir = tempfile::tempdir().unwrap();
        let canonical = dir.path().join(ProjectState::FILENAME);
        let job_spec = dir.path().join("spec_b.json");
        std::fs::write(&job_spec, b"spec B").unwrap();

        let swap = SpecSwap::acquire(canonical.clone(), &job_spec).unwrap();
        assert!(canonical.exists());
        drop(swap);
        assert!(!canonical.exists());
    }

    #[test]
    fn s6_swap_restores_even_when_the_job_body_panics() {
        let dir = tempfile::tempdir().unwrap();
        let canonical = dir.path().join(ProjectState::FILENAME);
        std::fs::write(&canonical, b"spec A").unwrap();
        let job_spec = dir.path().join("spec_b.json");
        std::fs::write(&job_spec, b"spec B").unwrap();

        let result = std::panic::catch_unwind(|| {
            let _swap = SpecSwap::acquire(canonical.clone(), &job_spec).unwrap();
            panic!("job body failed");
        });
        assert!(result.is_err());
        assert_eq!(std::fs::read(&canonical).unwrap(), b"spec A");
    }
}
