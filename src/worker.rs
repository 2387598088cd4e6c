//! Worker supervisor: builds the child command for one issue, spawns it, relays its
//! output, and tolerantly parses its result descriptor. Grounded on `worker.py`'s
//! `build_worker_prompt`/`run_worker` pair.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;

use crate::config;
use crate::issue::Issue;
use crate::learnings::CodebaseLearnings;
use crate::shell_exec;

/// Terminal status a worker reports in its result descriptor. Closed per the
/// sum-type discipline design note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerOutcome {
    Success,
    Error,
}

/// The file a worker writes on exit, named `.workers/results/<issue_id>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResultDescriptor {
    pub issue_id: String,
    pub status: WorkerOutcome,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub files_changed: Vec<String>,
    #[serde(default)]
    pub duration_seconds: f64,
    #[serde(default)]
    pub error: String,
}

impl WorkerResultDescriptor {
    /// A coordinator-synthesized stand-in for a worker that crashed, never wrote its
    /// descriptor, or whose descriptor failed to parse.
    pub fn synthesized_error(issue_id: &str, branch: &str, message: impl Into<String>) -> Self {
        Self {
            issue_id: issue_id.to_string(),
            status: WorkerOutcome::Error,
            branch: branch.to_string(),
            files_changed: Vec::new(),
            duration_seconds: 0.0,
            error: message.into(),
        }
    }

    pub fn path_for(project_dir: &Path, issue_id: &str) -> std::path::PathBuf {
        project_dir
            .join(".workers")
            .join("results")
            .join(format!("{issue_id}.json"))
    }

    /// Missing or malformed descriptor files both yield `None`; the caller is
    /// expected to substitute a synthesized error in that case.
    pub fn load(path: &Path) -> Option<Self> {
        let data = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&data).ok()
    }
}

/// All the inputs needed to build one worker's command line and prompt. Mirrors the
/// worker invocation contract: issue identity plus placement plus model selection.
pub struct WorkerSpec<'a> {
    pub issue: &'a Issue,
    pub worktree_dir: std::path::PathBuf,
    pub branch: String,
    pub project_dir: std::path::PathBuf,
    pub model: String,
    pub result_path: std::path::PathBuf,
    pub parallel: bool,
}

/// Builds the child command the supervisor will spawn: a bare `worker` executable
/// taking flags for every field the worker contract requires. Asserting on this
/// function's output is how "worker command completeness" is verified.
///
/// Also forwards the persona-catalog directory and any `<AGENT>_AGENT_MODEL`
/// overrides found in this process's environment, validated and re-normalized, so
/// the worker's internal coder/reviewer/qa agents pick up the same overrides the
/// coordinator was started with rather than relying on implicit env inheritance.
pub fn build_worker_command(worker_bin: &str, spec: &WorkerSpec<'_>) -> Command {
    let mut cmd = Command::new(worker_bin);
    cmd.arg("--issue-id")
        .arg(&spec.issue.id)
        .arg("--issue-title")
        .arg(&spec.issue.title)
        .arg("--issue-category")
        .arg(&spec.issue.category)
        .arg("--issue-priority")
        .arg(&spec.issue.priority)
        .arg("--worktree-dir")
        .arg(&spec.worktree_dir)
        .arg("--branch")
        .arg(&spec.branch)
        .arg("--project-dir")
        .arg(&spec.project_dir)
        .arg("--model")
        .arg(&spec.model)
        .arg("--result-file")
        .arg(&spec.result_path);

    if spec.parallel {
        cmd.arg("--parallel");
    }

    if let Some(dir) = config::personas_dir() {
        cmd.env(config::PERSONAS_DIR_ENV, dir);
    }
    for (agent, model) in config::agent_model_overrides() {
        cmd.env(format!("{agent}{}", config::AGENT_MODEL_ENV_SUFFIX), model.as_env_value());
    }

    cmd
}

/// Renders the task prompt template for one issue. A template author who needs a
/// literal `{{` in the output wraps it in `{% raw %}...{% endraw %}`, same as any
/// other Jinja-style template.
pub fn build_worker_prompt(
    template: &str,
    issue: &Issue,
    worktree_dir: &Path,
    branch: &str,
    project_dir: &Path,
    learnings: &CodebaseLearnings,
) -> anyhow::Result<String> {
    let mut env = minijinja::Environment::new();
    // Unresolved template syntax (an unknown field reference) is a prompt-build-time
    // error rather than silently rendering as empty, matching the worker invocation
    // contract's requirement that substitution failures surface before spawn.
    env.set_undefined_behavior(minijinja::UndefinedBehavior::Strict);
    env.add_template("worker_prompt", template)?;
    let tmpl = env.get_template("worker_prompt")?;

    let mut extra = BTreeMap::new();
    for (key, value) in &issue.extra {
        extra.insert(key.clone(), value.clone());
    }

    let rendered = tmpl.render(minijinja::context! {
        issue_id => issue.id,
        issue_title => issue.title,
        issue_category => issue.category,
        issue_priority => issue.priority,
        worktree_dir => worktree_dir.to_string_lossy().to_string(),
        branch => branch,
        project_dir => project_dir.to_string_lossy().to_string(),
        codebase_learnings => learnings.format_for_prompt(),
        extra => extra,
    })?;
    Ok(rendered)
}

/// Spawns the worker, relaying its combined stdout/stderr line-by-line with a
/// per-worker prefix, and returns its exit code alongside the issue it was working.
/// The supervisor never parses this output for meaning; that arrives via the result
/// descriptor file.
pub fn spawn_worker(
    mut command: Command,
    issue_id: &str,
    worker_index: usize,
) -> (String, std::io::Result<i32>) {
    let prefix = format!("[w{worker_index}:{issue_id}]");
    let result = shell_exec::run_streamed(&mut command, |line| {
        println!("{prefix} {line}");
    });
    (issue_id.to_string(), result.map(|output| output.status))
}
