//! One surface over the two spawning strategies: plain pipes and pty.

mod direct;
mod pty;
mod stream;

pub use direct::DirectProcess;
pub(crate) use direct::Wiring;
pub use pty::{PtyController, PtyProcess, UNBUFFERED_ENV};
pub use stream::OutputStream;

use std::io::Write;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, ChildStdin, ExitStatus};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use regex::bytes::Regex;
use tracing::{trace, warn};

use crate::error::ProcError;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug)]
pub enum ExecutionHandle {
    Direct(DirectProcess),
    Pty(PtyProcess),
}

impl ExecutionHandle {
    pub fn strategy(&self) -> &'static str {
        match self {
            ExecutionHandle::Direct(_) => "direct",
            ExecutionHandle::Pty(_) => "pty",
        }
    }

    pub fn program(&self) -> &str {
        match self {
            ExecutionHandle::Direct(p) => p.stderr.program(),
            ExecutionHandle::Pty(p) => p.output.program(),
        }
    }

    pub fn pid(&self) -> u32 {
        match self {
            ExecutionHandle::Direct(p) => p.pid(),
            ExecutionHandle::Pty(p) => p.controller().pid(),
        }
    }

    /// The stdout stream. For a pty this is the merged stream.
    pub fn standard_out(&mut self) -> Result<&mut OutputStream, ProcError> {
        match self {
            ExecutionHandle::Direct(p) => {
                let program = p.stderr.program().to_string();
                p.stdout.as_mut().ok_or_else(|| {
                    ProcError::Precondition(format!("stdout of `{}` is wired to the next stage", program))
                })
            }
            ExecutionHandle::Pty(p) => Ok(&mut p.output),
        }
    }

    /// The stderr stream. For a pty this is the same merged stream as stdout.
    pub fn standard_err(&mut self) -> Result<&mut OutputStream, ProcError> {
        match self {
            ExecutionHandle::Direct(p) => Ok(&mut p.stderr),
            ExecutionHandle::Pty(p) => Ok(&mut p.output),
        }
    }

    /// Normalized exit code: the exit value, or the negated signal number.
    /// Fails until the exit has been observed (direct) or collected (pty).
    pub fn exit_code(&mut self) -> Result<i32, ProcError> {
        match self {
            ExecutionHandle::Direct(p) => {
                if let Some(code) = p.returncode {
                    return Ok(code);
                }
                match p.child.try_wait()? {
                    Some(status) => {
                        let code = normalize(status);
                        p.returncode = Some(code);
                        Ok(code)
                    }
                    None => Err(ProcError::Precondition(format!(
                        "`{}` is still running; wait for it before reading the exit code",
                        p.stderr.program()
                    ))),
                }
            }
            ExecutionHandle::Pty(p) => p.exitstatus.ok_or_else(|| {
                ProcError::Precondition(format!("exit status of `{}` has not been collected yet", p.output.program()))
            }),
        }
    }

    /// Reads stdout to end-of-stream (the full merged drain for a pty).
    pub fn drain_stdout(&mut self, timeout: Duration) -> Result<Vec<u8>, ProcError> {
        let merged = matches!(self, ExecutionHandle::Pty(_));
        let res = self
            .standard_out()
            .and_then(|s| if merged { s.drain_all(timeout) } else { s.read_to_end(timeout) });
        self.kill_on_timeout(res)
    }

    pub fn drain_stderr(&mut self, timeout: Duration) -> Result<Vec<u8>, ProcError> {
        let res = match self {
            ExecutionHandle::Direct(p) => p.stderr.read_to_end(timeout),
            ExecutionHandle::Pty(p) => p.output.drain_all(timeout),
        };
        self.kill_on_timeout(res)
    }

    pub fn expect(&mut self, pattern: &Regex, timeout: Duration) -> Result<(), ProcError> {
        let res = match self {
            ExecutionHandle::Pty(p) => p.output.expect(pattern, timeout),
            ExecutionHandle::Direct(p) => Err(ProcError::Precondition(format!(
                "expect on `{}` needs a pty handle (run with blocking = false)",
                p.stderr.program()
            ))),
        };
        self.kill_on_timeout(res)
    }

    /// Writes all of `data` to the child's stdin within `timeout`. A child
    /// that stops reading is killed and reaped once the deadline passes.
    pub fn send(&mut self, data: &[u8], timeout: Duration) -> Result<(), ProcError> {
        let program = self.program().to_string();
        let mut stdin = self.stdin_slot().take().ok_or_else(|| ProcError::BrokenPipe { program: program.clone() })?;
        let buf = data.to_vec();
        let (tx, rx) = mpsc::channel();
        thread::Builder::new().name("subproc-stdin".into()).spawn(move || {
            let res = stdin.write_all(&buf).and_then(|_| stdin.flush());
            let _ = tx.send((stdin, res));
        })?;
        match rx.recv_timeout(timeout) {
            Ok((stdin, res)) => {
                *self.stdin_slot() = Some(stdin);
                res.map_err(|e| ProcError::from_write(&program, e))?;
                trace!(program = %program, bytes = data.len(), "sent");
                Ok(())
            }
            // the writer unblocks with EPIPE once the child is gone
            Err(RecvTimeoutError::Timeout) => self.kill_on_timeout(Err(ProcError::Timeout { program, timeout })),
            Err(RecvTimeoutError::Disconnected) => Err(ProcError::BrokenPipe { program }),
        }
    }

    /// Closes stdin so the child sees end-of-input. Idempotent.
    pub fn send_eof(&mut self) {
        if self.stdin_slot().take().is_some() {
            trace!(program = self.program(), "sent eof");
        }
    }

    /// Waits for exit within `timeout` and records the status. On expiry the
    /// child is killed and reaped before `Timeout` is returned.
    pub fn wait(&mut self, timeout: Duration) -> Result<i32, ProcError> {
        let program = self.program().to_string();
        let (child, slot) = self.status_slot();
        if let Some(code) = *slot {
            return Ok(code);
        }
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = child.try_wait()? {
                let code = normalize(status);
                *slot = Some(code);
                return Ok(code);
            }
            let now = Instant::now();
            if now >= deadline {
                warn!(program = %program, pid = child.id(), ?timeout, "wait timed out, killing child");
                *slot = kill_and_reap(child);
                return Err(ProcError::Timeout { program, timeout });
            }
            thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }

    pub fn kill(&mut self) -> Result<(), ProcError> { self.signal(Signal::SIGKILL) }

    pub fn terminate(&mut self) -> Result<(), ProcError> { self.signal(Signal::SIGTERM) }

    /// Sends `sig` to the child unless it has already been reaped.
    pub fn signal(&mut self, sig: Signal) -> Result<(), ProcError> {
        let pid = self.pid();
        let (child, slot) = self.status_slot();
        if slot.is_none() {
            if let Some(status) = child.try_wait()? {
                *slot = Some(normalize(status));
            }
        }
        if slot.is_some() {
            return Ok(());
        }
        signal::kill(Pid::from_raw(pid as i32), sig).map_err(std::io::Error::from)?;
        Ok(())
    }

    fn stdin_slot(&mut self) -> &mut Option<ChildStdin> {
        match self {
            ExecutionHandle::Direct(p) => &mut p.stdin,
            ExecutionHandle::Pty(p) => &mut p.stdin,
        }
    }

    fn status_slot(&mut self) -> (&mut Child, &mut Option<i32>) {
        match self {
            ExecutionHandle::Direct(p) => (&mut p.child, &mut p.returncode),
            ExecutionHandle::Pty(p) => (&mut p.controller.child, &mut p.exitstatus),
        }
    }

    fn kill_on_timeout<T>(&mut self, res: Result<T, ProcError>) -> Result<T, ProcError> {
        if let Err(ProcError::Timeout { program, timeout }) = &res {
            warn!(program = %program, pid = self.pid(), ?timeout, "timed out, killing child");
            let (child, slot) = self.status_slot();
            if slot.is_none() {
                *slot = kill_and_reap(child);
            }
        }
        res
    }
}

fn normalize(status: ExitStatus) -> i32 {
    match status.code() {
        Some(code) => code,
        None => status.signal().map(|s| -s).unwrap_or(-1),
    }
}

fn kill_and_reap(child: &mut Child) -> Option<i32> {
    let _ = child.kill();
    child.wait().ok().map(normalize)
}

pub(crate) fn set_cloexec(fd: &OwnedFd) -> Result<(), ProcError> {
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)).map_err(std::io::Error::from)?;
    Ok(())
}

/// An OS pipe as `(read, write)`, both close-on-exec.
pub(crate) fn os_pipe() -> Result<(OwnedFd, OwnedFd), ProcError> {
    let (r, w) = nix::unistd::pipe().map_err(std::io::Error::from)?;
    set_cloexec(&r)?;
    set_cloexec(&w)?;
    Ok((r, w))
}
