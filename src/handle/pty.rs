use std::fs::File;
use std::process::{Child, ChildStdin, Stdio};

use nix::pty::{openpty, OpenptyResult, Winsize};
use nix::sys::termios::{cfmakeraw, tcgetattr, tcsetattr, SetArg, Termios};
use tracing::debug;

use super::set_cloexec;
use super::stream::OutputStream;
use crate::cmd::{CommandSpec, RunOptions};
use crate::error::ProcError;

/// Forced on in every pty child so interpreters flush as they write.
pub const UNBUFFERED_ENV: &str = "PYTHONUNBUFFERED";

/// Owns the real child behind a pseudo-terminal session.
#[derive(Debug)]
pub struct PtyController {
    pub(super) child: Child,
}

impl PtyController {
    pub fn pid(&self) -> u32 { self.child.id() }
}

/// A child whose stdout and stderr share one pty; stdin stays a pipe so that
/// end-of-input is a plain close.
#[derive(Debug)]
pub struct PtyProcess {
    pub(super) controller: PtyController,
    pub(super) stdin: Option<ChildStdin>,
    pub(super) output: OutputStream,
    pub(super) exitstatus: Option<i32>,
}

impl PtyProcess {
    pub(crate) fn spawn(spec: &CommandSpec, opts: &RunOptions) -> Result<Self, ProcError> {
        let mut command = spec.command(opts)?;
        let OpenptyResult { master, slave } = openpty(None::<&Winsize>, None::<&Termios>).map_err(std::io::Error::from)?;
        set_cloexec(&master)?;
        set_cloexec(&slave)?;

        // raw mode: no echo and no LF -> CRLF rewriting on output
        let mut attrs = tcgetattr(&slave).map_err(std::io::Error::from)?;
        cfmakeraw(&mut attrs);
        tcsetattr(&slave, SetArg::TCSANOW, &attrs).map_err(std::io::Error::from)?;

        command
            .env(UNBUFFERED_ENV, "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::from(slave.try_clone()?))
            .stderr(Stdio::from(slave));
        let mut child = command.spawn().map_err(|e| spec.spawn_error(e))?;
        // the master only sees EOF once no slave fd is left open in this process
        drop(command);

        let stdin = child.stdin.take();
        let output = OutputStream::spawn(spec.program(), "pty", File::from(master), true)?;
        debug!(program = spec.program(), pid = child.id(), strategy = "pty", "spawned");
        Ok(Self { controller: PtyController { child }, stdin, output, exitstatus: None })
    }

    pub fn controller(&self) -> &PtyController { &self.controller }

    /// Exit status, only present after status collection.
    pub fn exitstatus(&self) -> Option<i32> { self.exitstatus }
}
