//! One command invocation: run at most once, then query output and status.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use regex::bytes::Regex;
use tracing::debug;

use crate::cmd::{default_timeout, CommandSpec, RunOptions, ToCommand};
use crate::error::ProcError;
use crate::handle::{DirectProcess, ExecutionHandle, PtyProcess, Wiring};
use crate::output::Captured;

#[derive(Debug, Clone, Copy)]
enum Stream { Stdout, Stderr }

/// A command plus the process it spawned, if any.
///
/// `run(true, ..)` spawns over plain pipes; `run(false, ..)` spawns on a pty
/// for send/expect work. `out()` and `err()` read to end-of-stream once and
/// memoize; on a pty both return the same merged output.
#[derive(Debug)]
pub struct Invocation {
    spec: CommandSpec,
    timeout: Duration,
    handle: Option<ExecutionHandle>,
    blocking: Option<bool>,
    binary: bool,
    was_started: bool,
    cached_stdout: Option<Captured>,
    cached_stderr: Option<Captured>,
    raw_stdout: Option<Vec<u8>>,
}

impl Invocation {
    pub fn new<C: ToCommand>(cmd: C) -> Result<Self, ProcError> { Ok(Self::from_spec(cmd.to_command()?)) }

    pub fn from_spec(spec: CommandSpec) -> Self {
        Self {
            spec,
            timeout: default_timeout(),
            handle: None,
            blocking: None,
            binary: false,
            was_started: false,
            cached_stdout: None,
            cached_stderr: None,
            raw_stdout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self { self.timeout = timeout; self }

    pub fn command(&self) -> &CommandSpec { &self.spec }
    pub fn timeout(&self) -> Duration { self.timeout }
    pub fn was_started(&self) -> bool { self.was_started }
    /// `Some(true)` for a direct spawn, `Some(false)` for a pty, `None` before `run`.
    pub fn blocking(&self) -> Option<bool> { self.blocking }

    /// Spawns the process. Only one run per invocation; a second call fails
    /// with `Precondition`. A failed spawn leaves the invocation unstarted.
    pub fn run(&mut self, blocking: bool, opts: &RunOptions) -> Result<(), ProcError> {
        self.ensure_fresh()?;
        let handle = if blocking {
            ExecutionHandle::Direct(DirectProcess::spawn(&self.spec, opts, Wiring::default())?)
        } else {
            ExecutionHandle::Pty(PtyProcess::spawn(&self.spec, opts)?)
        };
        self.started(handle, blocking, opts.binary);
        Ok(())
    }

    /// Direct spawn with stdin/stdout wired to caller-provided fds.
    pub(crate) fn run_wired(&mut self, opts: &RunOptions, wiring: Wiring) -> Result<(), ProcError> {
        self.ensure_fresh()?;
        let handle = ExecutionHandle::Direct(DirectProcess::spawn(&self.spec, opts, wiring)?);
        self.started(handle, true, opts.binary);
        Ok(())
    }

    pub fn handle(&self) -> Result<&ExecutionHandle, ProcError> {
        self.handle.as_ref().ok_or_else(|| not_started(&self.spec))
    }

    pub fn handle_mut(&mut self) -> Result<&mut ExecutionHandle, ProcError> {
        self.handle.as_mut().ok_or_else(|| not_started(&self.spec))
    }

    pub fn pid(&self) -> Result<u32, ProcError> { Ok(self.handle()?.pid()) }

    /// Captured stdout, read to end-of-stream on first call.
    pub fn out(&mut self) -> Result<&Captured, ProcError> {
        let captured = match self.cached_stdout.take() {
            Some(c) => c,
            None => self.capture(Stream::Stdout)?,
        };
        let c: &Captured = self.cached_stdout.insert(captured);
        Ok(c)
    }

    /// Stdout exactly as drained, before any decoding. Reads the stream on
    /// first call, same as `out()`.
    pub fn out_bytes(&mut self) -> Result<&[u8], ProcError> {
        self.out()?;
        Ok(self.raw_stdout.as_deref().unwrap_or_default())
    }

    /// Captured stderr; identical to `out()` for a pty run.
    pub fn err(&mut self) -> Result<&Captured, ProcError> {
        let captured = match self.cached_stderr.take() {
            Some(c) => c,
            None => self.capture(Stream::Stderr)?,
        };
        let c: &Captured = self.cached_stderr.insert(captured);
        Ok(c)
    }

    pub fn return_code(&mut self) -> Result<i32, ProcError> { self.handle_mut()?.exit_code() }

    pub fn ok(&mut self) -> Result<bool, ProcError> { Ok(self.return_code()? == 0) }

    pub fn send(&mut self, data: impl AsRef<[u8]>) -> Result<(), ProcError> {
        let timeout = self.timeout;
        self.handle_mut()?.send(data.as_ref(), timeout)
    }

    pub fn send_eof(&mut self) -> Result<(), ProcError> {
        self.handle_mut()?.send_eof();
        Ok(())
    }

    /// Consumes pty output until `pattern` (a regex) matches.
    pub fn expect(&mut self, pattern: &str) -> Result<(), ProcError> {
        let re = Regex::new(pattern).map_err(|e| ProcError::InvalidInput(format!("bad pattern {:?}: {}", pattern, e)))?;
        let timeout = self.timeout;
        self.handle_mut()?.expect(&re, timeout)
    }

    /// Signals end-of-input, then waits for exit and collects the status.
    pub fn block(&mut self) -> Result<i32, ProcError> {
        let timeout = self.timeout;
        let handle = self.handle_mut()?;
        handle.send_eof();
        handle.wait(timeout)
    }

    pub fn kill(&mut self) -> Result<(), ProcError> { self.handle_mut()?.kill() }

    pub fn terminate(&mut self) -> Result<(), ProcError> { self.handle_mut()?.terminate() }

    /// Feeds this invocation's full output into `next` and returns `next`,
    /// finished. Runs `self` on a pty first if it was never started.
    pub fn pipe<C: ToCommand>(&mut self, next: C, timeout: Option<Duration>, cwd: Option<&Path>) -> Result<Invocation, ProcError> {
        let timeout = timeout.unwrap_or(self.timeout);
        let mut opts = RunOptions::new();
        if let Some(dir) = cwd {
            opts = opts.cwd(dir);
        }
        let mut next = Invocation::new(next)?.with_timeout(timeout);

        if !self.was_started {
            self.run(false, &opts)?;
        }
        let data = self.out_bytes()?.to_vec();

        next.run(false, &opts)?;
        if !data.is_empty() {
            next.send(&data)?;
            next.send_eof()?;
        }
        next.block()?;
        Ok(next)
    }

    fn capture(&mut self, stream: Stream) -> Result<Captured, ProcError> {
        let (timeout, binary) = (self.timeout, self.binary);
        let handle = self.handle_mut()?;
        let raw = match stream {
            Stream::Stdout => handle.drain_stdout(timeout)?,
            Stream::Stderr => handle.drain_stderr(timeout)?,
        };
        let merged = matches!(handle, ExecutionHandle::Pty(_));
        if merged || matches!(stream, Stream::Stdout) {
            self.raw_stdout = Some(raw.clone());
        }
        // newline folding applies to plain pipes only; a pty hands back what the child wrote
        let captured = Captured::decode(raw, binary, !merged);
        if merged {
            // one drain serves both accessors
            self.cached_stdout = Some(captured.clone());
            self.cached_stderr = Some(captured.clone());
        }
        Ok(captured)
    }

    fn ensure_fresh(&self) -> Result<(), ProcError> {
        if self.was_started {
            return Err(ProcError::Precondition(format!("`{}` has already been run", self.spec)));
        }
        Ok(())
    }

    fn started(&mut self, handle: ExecutionHandle, blocking: bool, binary: bool) {
        debug!(command = %self.spec, pid = handle.pid(), strategy = handle.strategy(), "invocation started");
        self.handle = Some(handle);
        self.blocking = Some(blocking);
        self.binary = binary;
        self.was_started = true;
    }
}

fn not_started(spec: &CommandSpec) -> ProcError {
    ProcError::Precondition(format!("`{}` has not been run", spec))
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "<Invocation '{}'>", self.spec) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn started(line: &str, blocking: bool) -> Invocation {
        let mut inv = Invocation::new(line).unwrap().with_timeout(Duration::from_secs(10));
        inv.run(blocking, &RunOptions::default()).unwrap();
        inv
    }

    #[test]
    fn echo_direct_and_pty() {
        for blocking in [true, false] {
            let mut inv = started("echo hello", blocking);
            assert_eq!(inv.out().unwrap(), "hello\n");
            inv.block().unwrap();
            assert!(inv.ok().unwrap());
        }
    }

    #[test]
    fn out_is_memoized() {
        let mut inv = started("echo once", true);
        let first = inv.out().unwrap().clone();
        // the stream itself is spent; a second read would fail
        let spent = inv.handle_mut().unwrap().standard_out().unwrap().read_to_end(Duration::from_secs(1));
        assert!(matches!(spent, Err(ProcError::StreamClosed { .. })));
        assert_eq!(inv.out().unwrap(), &first);
    }

    #[test]
    fn pty_out_and_err_share_one_drain() {
        let mut inv = started("sh -c 'echo a; echo b >&2'", false);
        let out = inv.out().unwrap().clone();
        assert_eq!(out, "a\nb\n");
        assert_eq!(inv.err().unwrap(), &out);
    }

    #[test]
    fn direct_err_is_separate() {
        let mut inv = started("sh -c 'echo a; echo b >&2'", true);
        assert_eq!(inv.out().unwrap(), "a\n");
        assert_eq!(inv.err().unwrap(), "b\n");
    }

    #[test]
    fn missing_program_is_spawn_error() {
        for blocking in [true, false] {
            let mut inv = Invocation::new("no-such-program-subproc-test").unwrap();
            let err = inv.run(blocking, &RunOptions::default()).unwrap_err();
            assert!(matches!(err, ProcError::Spawn { .. }), "{err}");
            assert!(!inv.was_started());
            assert!(matches!(inv.pid(), Err(ProcError::Precondition(_))));
        }
    }

    #[test]
    fn missing_cwd_is_invalid_cwd() {
        let mut inv = Invocation::new("true").unwrap();
        let err = inv.run(true, &RunOptions::new().cwd("/no/such/dir/subproc")).unwrap_err();
        assert!(matches!(err, ProcError::InvalidCwd(_)));
    }

    #[test]
    fn silent_sleeper_times_out() {
        for blocking in [true, false] {
            let mut inv = Invocation::new("sleep 5").unwrap().with_timeout(Duration::from_secs(1));
            inv.run(blocking, &RunOptions::default()).unwrap();
            let start = Instant::now();
            let err = inv.out().unwrap_err();
            assert!(err.is_timeout(), "{err}");
            assert!(start.elapsed() < Duration::from_secs(4));
        }
    }

    #[test]
    fn exit_code_two_is_not_ok() {
        let mut inv = started("sh -c 'exit 2'", true);
        assert_eq!(inv.block().unwrap(), 2);
        assert!(!inv.ok().unwrap());
        assert_eq!(inv.return_code().unwrap(), 2);
    }

    #[test]
    fn second_run_is_rejected() {
        let mut inv = started("true", true);
        let err = inv.run(true, &RunOptions::default()).unwrap_err();
        assert!(matches!(err, ProcError::Precondition(_)));
    }

    #[test]
    fn output_before_run_is_rejected() {
        let mut inv = Invocation::new("echo hi").unwrap();
        assert!(matches!(inv.out(), Err(ProcError::Precondition(_))));
        assert!(matches!(inv.return_code(), Err(ProcError::Precondition(_))));
        assert!(matches!(inv.handle_mut(), Err(ProcError::Precondition(ref m)) if m.contains("has not been run")));
        assert!(matches!(inv.send("x"), Err(ProcError::Precondition(_))));
    }

    #[test]
    fn env_overrides_win() {
        let opts = RunOptions::new().env("SUBPROC_PROBE", "yes").env("HOME", "/override");
        let mut inv = Invocation::new("sh -c 'echo $SUBPROC_PROBE $HOME'").unwrap();
        inv.run(true, &opts).unwrap();
        assert_eq!(inv.out().unwrap(), "yes /override\n");
    }

    #[test]
    fn pty_forces_unbuffered_hint() {
        let opts = RunOptions::new().env("PYTHONUNBUFFERED", "0");
        let mut inv = Invocation::new("printenv PYTHONUNBUFFERED").unwrap();
        inv.run(false, &opts).unwrap();
        assert_eq!(inv.out().unwrap(), "1\n");
    }

    #[test]
    fn cwd_is_applied() {
        let dir = tempfile::tempdir().unwrap();
        let mut inv = Invocation::new("pwd").unwrap();
        inv.run(true, &RunOptions::new().cwd(dir.path())).unwrap();
        let got = inv.out().unwrap().to_string();
        assert_eq!(Path::new(got.trim_end()), dir.path().canonicalize().unwrap());
    }

    #[test]
    fn binary_mode_returns_raw_bytes() {
        let argv = ["sh", "-c", r"printf 'a\r\nb'"];
        let mut bin = Invocation::new(argv).unwrap();
        bin.run(true, &RunOptions::new().binary(true)).unwrap();
        assert_eq!(bin.out().unwrap(), &Captured::Bytes(b"a\r\nb".to_vec()));

        let mut text = Invocation::new(argv).unwrap();
        text.run(true, &RunOptions::default()).unwrap();
        assert_eq!(text.out().unwrap(), "a\nb");
    }

    #[test]
    fn pty_text_keeps_carriage_returns() {
        let argv = ["sh", "-c", r"printf 'a\r\nb'"];
        let mut inv = Invocation::new(argv).unwrap();
        inv.run(false, &RunOptions::default()).unwrap();
        assert_eq!(inv.out().unwrap(), "a\r\nb");
        assert_eq!(inv.out_bytes().unwrap(), b"a\r\nb");
    }

    #[test]
    fn direct_out_bytes_are_untranslated() {
        let mut inv = started(r"printf 'x\r\n'", true);
        assert_eq!(inv.out().unwrap(), "x\n");
        assert_eq!(inv.out_bytes().unwrap(), b"x\r\n");
    }

    #[test]
    fn expect_then_send() {
        let mut inv = started("sh -c 'echo ready; read line; echo got $line'", false);
        inv.expect("ready").unwrap();
        inv.send("hi\n").unwrap();
        inv.send_eof().unwrap();
        assert_eq!(inv.out().unwrap(), "ready\ngot hi\n");
        assert_eq!(inv.block().unwrap(), 0);
    }

    #[test]
    fn pipe_forwards_output() {
        let mut head = Invocation::new("echo hello").unwrap();
        let mut next = head.pipe("cat", Some(Duration::from_secs(10)), None).unwrap();
        assert!(head.was_started());
        assert_eq!(next.out().unwrap(), "hello\n");
        assert!(next.ok().unwrap());
    }

    #[test]
    fn pipe_forwards_carriage_returns_untouched() {
        let mut head = Invocation::new(["sh", "-c", r"printf 'a\r\nb'"]).unwrap();
        let mut next = head.pipe("wc -c", Some(Duration::from_secs(10)), None).unwrap();
        assert_eq!(next.out().unwrap().to_string().trim(), "4");
    }

    #[test]
    fn pipe_into_non_reader_times_out() {
        let mut head = Invocation::new("head -c 300000 /dev/zero").unwrap();
        let start = Instant::now();
        let err = head.pipe("sleep 30", Some(Duration::from_secs(1)), None).unwrap_err();
        assert!(err.is_timeout(), "{err}");
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn display_renders_command() {
        let inv = Invocation::new(["grep", "a b"]).unwrap();
        assert_eq!(inv.to_string(), "<Invocation 'grep 'a b''>");
    }
}
