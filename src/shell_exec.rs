//! Bounded subprocess execution shared by the VCS driver and the worker supervisor.
//!
//! Every external command run by this crate (`git`, the worker binary, the queued
//! coordinator child) goes through [`run`] or [`run_streamed`]. Both block the calling
//! thread until the child exits, merge stdout+stderr, and acquire a process-wide
//! semaphore first so a wave of workers each shelling out to `git` doesn't exhaust file
//! descriptors.

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::{Condvar, Mutex, OnceLock};

const DEFAULT_CONCURRENT_COMMANDS: usize = 32;

struct Semaphore {
    state: Mutex<usize>,
    condvar: Condvar,
}

impl Semaphore {
    fn new(permits: usize) -> Self {
        Self {
            state: Mutex::new(permits),
            condvar: Condvar::new(),
        }
    }

    fn acquire(&self) -> SemaphoreGuard<'_> {
        let mut permits = self.state.lock().unwrap();
        while *permits == 0 {
            permits = self.condvar.wait(permits).unwrap();
        }
        *permits -= 1;
        SemaphoreGuard { sem: self }
    }
}

struct SemaphoreGuard<'a> {
    sem: &'a Semaphore,
}

impl Drop for SemaphoreGuard<'_> {
    fn drop(&mut self) {
        let mut permits = self.sem.state.lock().unwrap();
        *permits += 1;
        self.sem.condvar.notify_one();
    }
}

fn max_concurrent_commands() -> usize {
    std::env::var("TIERCOORD_MAX_CONCURRENT_COMMANDS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_CONCURRENT_COMMANDS)
}

fn semaphore() -> &'static Semaphore {
    static SEM: OnceLock<Semaphore> = OnceLock::new();
    SEM.get_or_init(|| Semaphore::new(max_concurrent_commands()))
}

/// Outcome of a command run through this module.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: i32,
    /// Combined stdout+stderr, in the order the child produced it.
    pub combined: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Run a command to completion, merging stdout and stderr.
///
/// Returns `Ok` even when the child exits non-zero — callers inspect
/// [`CommandOutput::status`]. `Err` is reserved for spawn failure (binary not found,
/// permission denied) since that's categorically different from "the command ran and
/// failed."
pub fn run(command: &mut Command) -> std::io::Result<CommandOutput> {
    let _permit = semaphore().acquire();
    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    let mut child = command.spawn()?;
    let combined = capture_combined(&mut child)?;
    let status = child.wait()?;

    Ok(CommandOutput {
        status: exit_code(&status),
        combined,
    })
}

/// Run a command, relaying each line of its combined output through `on_line` as it is
/// produced (used by the worker supervisor to prefix and forward child output).
pub fn run_streamed(
    command: &mut Command,
    mut on_line: impl FnMut(&str),
) -> std::io::Result<CommandOutput> {
    let _permit = semaphore().acquire();
    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    let mut child = command.spawn()?;
    let mut combined = String::new();

    // Worker stdout and stderr are merged onto the same relayed stream; reading stdout
    // to completion first and then stderr is sufficient here because we don't need
    // interleaved ordering precision, only the accumulated text for result-descriptor
    // fallbacks and the per-line relay for the user.
    if let Some(stdout) = child.stdout.take() {
        for line in BufReader::new(stdout).lines() {
            let line = line?;
            on_line(&line);
            combined.push_str(&line);
            combined.push('\n');
        }
    }
    if let Some(mut stderr) = child.stderr.take() {
        let mut buf = String::new();
        stderr.read_to_string(&mut buf)?;
        for line in buf.lines() {
            on_line(line);
        }
        combined.push_str(&buf);
    }

    let status = child.wait()?;
    Ok(CommandOutput {
        status: exit_code(&status),
        combined,
    })
}

fn capture_combined(child: &mut Child) -> std::io::Result<String> {
    let mut combined = String::new();
    if let Some(mut stdout) = child.stdout.take() {
        stdout.read_to_string(&mut combined)?;
    }
    if let Some(mut stderr) = child.stderr.take() {
        stderr.read_to_string(&mut combined)?;
    }
    Ok(combined)
}

#[cfg(unix)]
fn exit_code(status: &std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status.code().unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}

#[cfg(not(unix))]
fn exit_code(status: &std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_captures_combined_output_and_status() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo out; echo err 1>&2; exit 3"]);
        let result = run(&mut cmd).unwrap();
        assert_eq!(result.status, 3);
        assert!(!result.success());
        assert!(result.combined.contains("out"));
        assert!(result.combined.contains("err"));
    }

    #[test]
    fn run_reports_success_on_zero_exit() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "exit 0"]);
        let result = run(&mut cmd).unwrap();
        assert!(result.success());
    }

    #[test]
    fn run_streamed_relays_each_line() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo one; echo two"]);
        let mut lines = Vec::new();
        let result = run_streamed(&mut cmd, |line| lines.push(line.to_string())).unwrap();
        assert!(result.success());
        assert_eq!(lines, vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn run_errors_on_missing_binary() {
        let mut cmd = Command::new("tiercoord-definitely-not-a-real-binary");
        assert!(run(&mut cmd).is_err());
    }
}
