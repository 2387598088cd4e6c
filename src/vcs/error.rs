//! VCS driver error type.

use crate::error_format::format_error;

#[derive(Debug)]
pub enum VcsError {
    /// The directory is not inside a git repository.
    NotARepository { path: String },
    /// A git subprocess could not be spawned at all.
    Spawn { command: String, source: String },
    /// A git subprocess ran and returned a non-zero exit status that isn't recognized
    /// as a merge conflict.
    CommandFailed {
        command: String,
        status: i32,
        output: String,
    },
}

impl std::fmt::Display for VcsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VcsError::NotARepository { path } => {
                write!(f, "{}", format_error(&format!("not a git repository: {path}")))
            }
            VcsError::Spawn { command, source } => write!(
                f,
                "{}",
                format_error(&format!("failed to spawn `{command}`: {source}"))
            ),
            VcsError::CommandFailed {
                command,
                status,
                output,
            } => write!(
                f,
                "{}",
                format_error(&format!(
                    "`{command}` exited with status {status}\n{output}"
                ))
            ),
        }
    }
}

impl std::error::Error for VcsError {}
