use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use tiercoord::coordinator::Interrupted;
use tiercoord::error_format::format_error;
use tiercoord::queue::{Job, QueueRunner, QueueStore};

#[derive(Parser)]
#[command(name = "tcqueue")]
#[command(about = "At-most-one-per-fingerprint job queue driver", long_about = None)]
struct Cli {
    /// Project directory the queued builds run against.
    #[arg(long, global = true)]
    project_dir: PathBuf,

    /// Path to the coordinator binary to invoke for each job.
    #[arg(long, global = true, default_value = "tiercoord")]
    coordinator_bin: String,

    /// Queue store path, relative to the current directory.
    #[arg(long, global = true, default_value = "data/queue.json")]
    store: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new job.
    Add(AddArgs),
    /// Run every processable job, in list order.
    Start {
        /// Report what would run without invoking the coordinator.
        #[arg(long)]
        dry_run: bool,
    },
    /// Report job status.
    Status {
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct AddArgs {
    spec_path: PathBuf,
    #[arg(long)]
    id: String,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    max_iterations: Option<u32>,
    #[arg(long)]
    parallel: bool,
    #[arg(long)]
    max_workers: Option<u32>,
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
    match cli.command {
        Commands::Add(args) => {
            let mut store = QueueStore::load(&cli.store)?;
            let job = Job::new(
                args.id,
                args.spec_path,
                args.model,
                args.max_iterations,
                args.parallel,
                args.max_workers,
                Utc::now(),
            );
            store.add(job)?;
            store.save(&cli.store)?;
            Ok(())
        }
        Commands::Start { dry_run } => {
            let runner = QueueRunner {
                project_dir: cli.project_dir,
                store_path: cli.store,
                coordinator_bin: cli.coordinator_bin,
            };
            runner.start(dry_run)
        }
        Commands::Status { id, json } => {
            let store = QueueStore::load(&cli.store)?;
            match id {
                Some(id) => {
                    let job = store
                        .find(&id)
                        .ok_or_else(|| anyhow::anyhow!("no job with id {id}"))?;
                    print_job(job, json);
                }
                None => {
                    if json {
                        println!("{}", serde_json::to_string_pretty(&store)?);
                    } else {
                        for job in &store.jobs {
                            print_job(job, false);
                        }
                    }
                }
            }
            Ok(())
        }
    }
}

fn print_job(job: &Job, json: bool) {
    if json {
        if let Ok(text) = serde_json::to_string_pretty(job) {
            println!("{text}");
        }
        return;
    }
    println!(
        "{:<20} {:?}  spec={}  exit={:?}",
        job.id,
        job.status,
        job.spec_path.display(),
        job.exit_code
    );
}
