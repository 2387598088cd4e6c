use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use tiercoord::coordinator::{
    Coordinator, CoordinatorConfig, Interrupted, NoopInitializer, ProcessWorkerLauncher,
};
use tiercoord::error_format::format_error;
use tiercoord::notifier::Notifier;
use tiercoord::signals::InterruptFlag;
use tiercoord::tracker::{HttpTracker, Tracker};
use tiercoord::vcs::Vcs;

const WORKER_BIN_ENV: &str = "TIERCOORD_WORKER_BIN";
const DEFAULT_WORKER_BIN: &str = "academy-worker";

#[derive(Parser)]
#[command(name = "tiercoord")]
#[command(about = "Tier-based parallel build coordinator", long_about = None)]
struct Cli {
    /// Root directory of the project being built.
    #[arg(long)]
    project_dir: PathBuf,

    /// Model tag passed through to each worker.
    #[arg(long, default_value = "sonnet")]
    model: String,

    /// Maximum iterations a worker may take on one issue.
    #[arg(long, default_value_t = 10)]
    max_iterations: u32,

    /// Run tiers with concurrent waves instead of one worker at a time.
    #[arg(long)]
    parallel: bool,

    /// Maximum workers per wave, 1-5.
    #[arg(long, default_value_t = 1)]
    max_workers: u32,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "info")).init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if e.downcast_ref::<Interrupted>().is_some() {
                return ExitCode::from(130);
            }
            anstream::eprintln!("{}", format_error(&e.to_string()));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let vcs = Vcs::new(&cli.project_dir);
    let notifier = Notifier::from_env();
    let tracker_backend = HttpTracker::from_env()?;
    let interrupt = InterruptFlag::install()?;

    let worker_bin =
        std::env::var(WORKER_BIN_ENV).unwrap_or_else(|_| DEFAULT_WORKER_BIN.to_string());

    let project_name = cli
        .project_dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| cli.project_dir.display().to_string());

    let config = CoordinatorConfig {
        project_name,
        project_dir: cli.project_dir,
        worker_bin: worker_bin.clone(),
        model: cli.model,
        max_iterations: cli.max_iterations,
        parallel: cli.parallel,
        max_workers: cli.max_workers,
    };

    let coordinator = Coordinator {
        config,
        vcs: &vcs,
        launcher: ProcessWorkerLauncher { worker_bin },
        tracker: Tracker::new(tracker_backend),
        initializer: NoopInitializer,
        notifier: &notifier,
        interrupt: Some(interrupt),
    };

    let outcome = coordinator.run()?;
    log::info!(
        "run complete: {} completed, {} failed",
        outcome.completed.len(),
        outcome.failed.len()
    );
    if !outcome.failed.is_empty() {
        anyhow::bail!("{} issue(s) failed", outcome.failed.len());
    }
    Ok(())
}
