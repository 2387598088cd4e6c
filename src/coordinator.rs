//! Top-level orchestration: Initialize, Plan, Sync state, Execute tiers, Sequential
//! retry, Cleanup. Composes the scheduler, VCS driver, tracker, worker supervisor,
//! progress model, and notifier. Grounded on `parallel_coordinator.py`.

use chrono::Utc;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::issue::{Issue, ProjectState};
use crate::notifier::Notifier;
use crate::progress::{self, OverallProgress, TierProgress, WorkerRecord, WorkerStatus};
use crate::scheduler::{self, ExecutionTier, ParallelPlan};
use crate::signals::InterruptFlag;
use crate::tracker::{Tracker, TrackerBackend};
use crate::vcs::Vcs;
use crate::worker::{WorkerResultDescriptor, WorkerSpec};

const WORKTREE_SUBDIR: &str = ".workers";

/// Marker error: a user signal arrived at a suspension point. The job/run that
/// surfaces this should map to an interrupted status and exit code 130.
#[derive(Debug)]
pub struct Interrupted;

impl std::fmt::Display for Interrupted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "interrupted")
    }
}

impl std::error::Error for Interrupted {}

/// Launches one worker for one issue and returns its outcome. The production
/// implementation spawns a real subprocess; tests substitute a fake to exercise
/// wave/merge/retry policy without touching the filesystem or git.
pub trait WorkerLauncher {
    fn launch(&self, spec: &WorkerSpec<'_>, worker_index: usize) -> WorkerResultDescriptor;
}

/// Spawns the real worker binary and parses its result descriptor, synthesizing an
/// error record when the process crashes or leaves no descriptor behind.
pub struct ProcessWorkerLauncher {
    pub worker_bin: String,
}

impl WorkerLauncher for ProcessWorkerLauncher {
    fn launch(&self, spec: &WorkerSpec<'_>, worker_index: usize) -> WorkerResultDescriptor {
        let command = crate::worker::build_worker_command(&self.worker_bin, spec);
        let (issue_id, exit_code) = crate::worker::spawn_worker(command, &spec.issue.id, worker_index);

        match exit_code {
            Err(e) => WorkerResultDescriptor::synthesized_error(
                &issue_id,
                &spec.branch,
                format!("failed to spawn worker: {e}"),
            ),
            Ok(_code) => WorkerResultDescriptor::load(&spec.result_path).unwrap_or_else(|| {
                WorkerResultDescriptor::synthesized_error(
                    &issue_id,
                    &spec.branch,
                    "worker exited without a result descriptor",
                )
            }),
        }
    }
}

/// External one-shot project initializer. Out of scope beyond this seam: the real
/// implementation is a separate collaborator invoked once before the first run.
pub trait Initializer {
    fn initialize(&self, project_dir: &Path) -> anyhow::Result<()>;
}

pub struct NoopInitializer;

impl Initializer for NoopInitializer {
    fn initialize(&self, project_dir: &Path) -> anyhow::Result<()> {
        anyhow::bail!(
            "project at {} has no {} and no initializer is configured",
            project_dir.display(),
            ProjectState::FILENAME
        )
    }
}

pub struct CoordinatorConfig {
    pub project_name: String,
    pub project_dir: PathBuf,
    pub worker_bin: String,
    pub model: String,
    pub max_iterations: u32,
    pub parallel: bool,
    pub max_workers: u32,
}

impl CoordinatorConfig {
    /// Max-parallelism is validated to the inclusive range [1, 5] regardless of
    /// older documentation describing 1-3; the implementation limit is 5.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(1..=5).contains(&self.max_workers) {
            anyhow::bail!("--max-workers must be between 1 and 5, got {}", self.max_workers);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct CoordinatorOutcome {
    pub completed: BTreeSet<String>,
    pub failed: BTreeSet<String>,
}

pub struct Coordinator<'a, L: WorkerLauncher + Sync, B: TrackerBackend, I: Initializer> {
    pub config: CoordinatorConfig,
    pub vcs: &'a Vcs,
    pub launcher: L,
    pub tracker: Tracker<B>,
    pub initializer: I,
    pub notifier: &'a Notifier,
    pub interrupt: Option<InterruptFlag>,
}

impl<'a, L: WorkerLauncher + Sync, B: TrackerBackend, I: Initializer> Coordinator<'a, L, B, I> {
    pub fn run(&self) -> anyhow::Result<CoordinatorOutcome> {
        self.config.validate()?;

        // 1. Initialize.
        if !Vcs::is_repository(&self.config.project_dir) {
            return Err(crate::vcs::VcsError::NotARepository {
                path: self.config.project_dir.display().to_string(),
            }
            .into());
        }
        if !ProjectState::exists(&self.config.project_dir) {
            self.initializer.initialize(&self.config.project_dir)?;
            if !ProjectState::exists(&self.config.project_dir) {
                anyhow::bail!(
                    "project at {} remains uninitialized after running the initializer",
                    self.config.project_dir.display()
                );
            }
        }
        let project_state = ProjectState::load(&self.config.project_dir)?;

        // 2. Plan.
        let plan = match ParallelPlan::load(&self.config.project_dir)? {
            Some(plan) => plan,
            None => {
                let plan = scheduler::build_plan(&project_state.issues, self.config.max_workers);
                plan.save(&self.config.project_dir)?;
                plan
            }
        };

        let issues_by_id: std::collections::HashMap<&str, &Issue> = project_state
            .issues
            .iter()
            .map(|issue| (issue.id.as_str(), issue))
            .collect();

        // 3. Sync state.
        let all_ids: Vec<String> = plan
            .tiers
            .iter()
            .flat_map(|t| t.issue_ids.iter().cloned())
            .collect();
        let (tracker_completed, tracker_cancelled, _status_map) = self.tracker.check_statuses(&all_ids);
        let skip: BTreeSet<String> = tracker_completed
            .union(&tracker_cancelled)
            .cloned()
            .collect();

        self.notifier.send_parallel_start(
            &self.config.project_name,
            plan.total_issues,
            plan.total_issues.saturating_sub(skip.len()),
            plan.max_parallelism,
        );

        let mut progress = OverallProgress::new(plan.total_issues, Utc::now());
        progress.completed = tracker_completed;
        progress.failed = BTreeSet::new();

        let worktree_root = self.config.project_dir.join(WORKTREE_SUBDIR);
        let mut requeued: Vec<String> = Vec::new();

        // 4. Execute tiers.
        for tier in &plan.tiers {
            let non_skipped: Vec<&str> = tier
                .issue_ids
                .iter()
                .filter(|id| !skip.contains(*id))
                .map(String::as_str)
                .collect();

            if non_skipped.is_empty() {
                progress.tiers_completed += 1;
                continue;
            }

            progress.current_tier = Some(TierProgress::new(tier.tier, tier.description.clone()));

            for (wave_start, wave) in non_skipped.chunks(self.config.max_workers as usize).enumerate() {
                let wave_start = wave_start * self.config.max_workers as usize;
                self.run_wave(wave, wave_start, &issues_by_id, tier, &mut progress, &mut requeued)?;

                if self.interrupt.as_ref().is_some_and(InterruptFlag::is_set) {
                    log::warn!("interrupt received; leaving worktrees on disk for post-mortem");
                    return Err(Interrupted.into());
                }
            }

            if let Some(current_tier) = progress.current_tier.as_ref() {
                log::debug!("{}", progress::format_tier_detail(current_tier));
            }

            progress.tiers_completed += 1;
            let tier_completed: Vec<String> = non_skipped
                .iter()
                .filter(|id| progress.completed.contains(**id))
                .map(|id| id.to_string())
                .collect();
            let tier_failed: Vec<String> = non_skipped
                .iter()
                .filter(|id| progress.failed.contains(**id))
                .map(|id| id.to_string())
                .collect();
            self.notifier
                .send_tier_complete(tier.tier, &tier.description, &tier_completed, &tier_failed);
        }

        // 5. Sequential retry: one re-queued issue at a time, in order of first
        // failure. Only merge conflicts land here; worker-reported failures are
        // never retried.
        let retry_queue = requeued.clone();
        for issue_id in retry_queue {
            let synthetic_tier = ExecutionTier {
                tier: u32::MAX,
                description: "retry".to_string(),
                sequential: true,
                issue_ids: vec![issue_id.clone()],
            };
            progress.current_tier = Some(TierProgress::new(
                synthetic_tier.tier,
                synthetic_tier.description.clone(),
            ));
            self.run_wave(
                &[issue_id.as_str()],
                0,
                &issues_by_id,
                &synthetic_tier,
                &mut progress,
                &mut requeued,
            )?;
        }
        progress.requeued = requeued.into_iter().collect();

        // 6. Cleanup.
        self.vcs.cleanup_worktrees(&worktree_root)?;
        self.notifier.send_run_summary(
            &self.config.project_name,
            progress.completed.len(),
            progress.failed.len(),
            skip.len(),
            plan.total_issues,
        );

        Ok(CoordinatorOutcome {
            completed: progress.completed,
            failed: progress.failed,
        })
    }

    /// Runs one wave: create worktrees, launch workers concurrently (one OS thread
    /// per worker, bounded in turn by the subprocess semaphore), collect results
    /// with gather-with-exceptions semantics, remove worktrees, then serialize the
    /// merge phase on the main line.
    fn run_wave(
        &self,
        wave: &[&str],
        wave_start: usize,
        issues_by_id: &std::collections::HashMap<&str, &Issue>,
        tier: &ExecutionTier,
        progress: &mut OverallProgress,
        requeued: &mut Vec<String>,
    ) -> anyhow::Result<()> {
        debug_assert!(
            progress
                .current_tier
                .as_ref()
                .is_none_or(|t| t.tier == tier.tier),
            "run_wave called for tier {} but progress.current_tier is tracking a different tier",
            tier.tier
        );

        let worktree_root = self.config.project_dir.join(WORKTREE_SUBDIR);
        let mut specs = Vec::new();

        for (i, issue_id) in wave.iter().copied().enumerate() {
            let worker_index = wave_start + i;
            if let Some(current_tier) = progress.current_tier.as_mut() {
                current_tier
                    .workers
                    .insert(worker_index, WorkerRecord::new(worker_index, issue_id, Utc::now()));
            }

            let issue = match issues_by_id.get(issue_id) {
                Some(issue) => *issue,
                None => {
                    progress.failed.insert(issue_id.to_string());
                    Self::finish_worker(progress, worker_index, WorkerStatus::Failed, issue_id);
                    continue;
                }
            };
            let branch = format!("parallel/{issue_id}");
            let worktree_dir = worktree_root.join(format!("w{worker_index}"));
            let result_path = WorkerResultDescriptor::path_for(&self.config.project_dir, issue_id);

            if let Err(e) = self.vcs.create_worktree(&worktree_dir, &branch) {
                log::error!("worktree creation failed for {issue_id}: {e}");
                progress.failed.insert(issue_id.to_string());
                Self::finish_worker(progress, worker_index, WorkerStatus::Failed, issue_id);
                continue;
            }

            specs.push((
                worker_index,
                WorkerSpec {
                    issue,
                    worktree_dir,
                    branch,
                    project_dir: self.config.project_dir.clone(),
                    model: self.config.model.clone(),
                    result_path,
                    parallel: self.config.parallel,
                },
            ));
        }

        let launcher = &self.launcher;
        let results: Vec<(usize, WorkerResultDescriptor)> = std::thread::scope(|scope| {
            let handles: Vec<_> = specs
                .iter()
                .map(|(worker_index, spec)| {
                    let worker_index = *worker_index;
                    scope.spawn(move || (worker_index, launcher.launch(spec, worker_index)))
                })
                .collect();

            handles
                .into_iter()
                .zip(specs.iter())
                .map(|(handle, (worker_index, spec))| {
                    handle.join().unwrap_or_else(|_| {
                        (
                            *worker_index,
                            WorkerResultDescriptor::synthesized_error(
                                &spec.issue.id,
                                &spec.branch,
                                "worker thread panicked",
                            ),
                        )
                    })
                })
                .collect()
        });

        for (_, spec) in &specs {
            let _ = self.vcs.remove_worktree(&spec.worktree_dir);
        }

        // Merge phase: serialized on the main line, one at a time.
        for (worker_index, result) in results {
            match result.status {
                crate::worker::WorkerOutcome::Error => {
                    progress.failed.insert(result.issue_id.clone());
                    Self::finish_worker(progress, worker_index, WorkerStatus::Failed, &result.issue_id);
                    self.notifier.send_issue_failed(&result.issue_id, &result.error);
                }
                crate::worker::WorkerOutcome::Success => {
                    Self::set_worker_status(progress, worker_index, WorkerStatus::Integrating);
                    match self.vcs.merge(&result.branch) {
                        Ok(merge) if merge.success => {
                            progress.completed.insert(result.issue_id.clone());
                            Self::finish_worker(progress, worker_index, WorkerStatus::Done, &result.issue_id);
                            let _ = self.vcs.delete_branch(&result.branch);
                            let title = issues_by_id
                                .get(result.issue_id.as_str())
                                .map(|issue| issue.title.as_str())
                                .unwrap_or(&result.issue_id);
                            self.notifier.send_issue_complete(&result.issue_id, title);
                        }
                        Ok(merge) if merge.conflict => {
                            requeued.push(result.issue_id.clone());
                            Self::set_worker_status(progress, worker_index, WorkerStatus::Conflict);
                        }
                        Ok(merge) => {
                            progress.failed.insert(result.issue_id.clone());
                            Self::finish_worker(progress, worker_index, WorkerStatus::Failed, &result.issue_id);
                            self.notifier.send_issue_failed(&result.issue_id, &merge.error);
                        }
                        Err(e) => {
                            progress.failed.insert(result.issue_id.clone());
                            Self::finish_worker(progress, worker_index, WorkerStatus::Failed, &result.issue_id);
                            self.notifier.send_issue_failed(&result.issue_id, &e.to_string());
                        }
                    }
                }
            }
        }

        requeued.retain(|id| !progress.completed.contains(id));
        Ok(())
    }

    /// Flips a worker's record to a terminal status and mirrors the outcome into the
    /// current tier's completed/failed sets.
    fn finish_worker(
        progress: &mut OverallProgress,
        worker_index: usize,
        status: WorkerStatus,
        issue_id: &str,
    ) {
        Self::set_worker_status(progress, worker_index, status);
        if let Some(current_tier) = progress.current_tier.as_mut() {
            match status {
                WorkerStatus::Done => {
                    current_tier.completed.insert(issue_id.to_string());
                }
                WorkerStatus::Failed => {
                    current_tier.failed.insert(issue_id.to_string());
                }
                _ => {}
            }
        }
    }

    fn set_worker_status(progress: &mut OverallProgress, worker_index: usize, status: WorkerStatus) {
        if let Some(record) = progress
            .current_tier
            .as_mut()
            .and_then(|tier| tier.workers.get_mut(&worker_index))
        {
            record.set_status(status, Utc::now());
        }
    }
}
