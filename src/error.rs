use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcError {
    #[error("Spawn error: `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("Invalid working directory: {}", .0.display())]
    InvalidCwd(PathBuf),
    #[error("Timeout: `{program}` did not finish within {:.1}s", .timeout.as_secs_f64())]
    Timeout { program: String, timeout: Duration },
    #[error("Broken pipe: stdin of `{program}` is closed")]
    BrokenPipe { program: String },
    #[error("Precondition failed: {0}")]
    Precondition(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Pattern not found: `{pattern}` before end of output from `{program}`")]
    PatternNotFound { program: String, pattern: String },
    #[error("Stream closed: {stream} of `{program}` was already drained")]
    StreamClosed { program: String, stream: &'static str },
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ProcError {
    pub fn is_timeout(&self) -> bool { matches!(self, ProcError::Timeout { .. }) }

    /// Maps a write failure on a child's stdin, folding EPIPE into `BrokenPipe`.
    pub(crate) fn from_write(program: &str, err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::BrokenPipe {
            ProcError::BrokenPipe { program: program.to_string() }
        } else {
            ProcError::Io(err)
        }
    }
}
