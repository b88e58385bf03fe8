use std::os::fd::OwnedFd;
use std::process::{Child, ChildStdin, Stdio};

use tracing::debug;

use super::stream::OutputStream;
use crate::cmd::{CommandSpec, RunOptions};
use crate::error::ProcError;

/// Optional fd wiring for a direct spawn. `None` means a captured pipe.
#[derive(Debug, Default)]
pub(crate) struct Wiring {
    pub stdin: Option<OwnedFd>,
    pub stdout: Option<OwnedFd>,
}

/// A child spawned with plain OS pipes: separate stdout and stderr.
#[derive(Debug)]
pub struct DirectProcess {
    pub(super) child: Child,
    pub(super) stdin: Option<ChildStdin>,
    pub(super) stdout: Option<OutputStream>,
    pub(super) stderr: OutputStream,
    pub(super) returncode: Option<i32>,
}

impl DirectProcess {
    pub(crate) fn spawn(spec: &CommandSpec, opts: &RunOptions, wiring: Wiring) -> Result<Self, ProcError> {
        let mut command = spec.command(opts)?;
        command
            .stdin(wiring.stdin.map_or_else(Stdio::piped, Stdio::from))
            .stdout(wiring.stdout.map_or_else(Stdio::piped, Stdio::from))
            .stderr(Stdio::piped());
        let mut child = command.spawn().map_err(|e| spec.spawn_error(e))?;
        // release the parent's copies of any wired fds
        drop(command);

        let stdin = child.stdin.take();
        let stdout = match child.stdout.take() {
            Some(out) => Some(OutputStream::spawn(spec.program(), "stdout", out, false)?),
            None => None,
        };
        let stderr = match child.stderr.take() {
            Some(err) => OutputStream::spawn(spec.program(), "stderr", err, false)?,
            None => return Err(ProcError::Precondition("stderr pipe missing after spawn".into())),
        };
        debug!(program = spec.program(), pid = child.id(), strategy = "direct", "spawned");
        Ok(Self { child, stdin, stdout, stderr, returncode: None })
    }

    pub fn pid(&self) -> u32 { self.child.id() }

    /// Raw OS return code, once the process has been observed to exit.
    pub fn returncode(&self) -> Option<i32> { self.returncode }
}
