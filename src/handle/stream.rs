//! Output streams drained in the background and read against a deadline.

use std::io::{self, Read};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use regex::bytes::Regex;
use tracing::trace;

use crate::error::ProcError;

const CHUNK_SIZE: usize = 8 * 1024;

#[derive(Debug)]
enum Chunk {
    Data(Vec<u8>),
    Eof,
    Failed(io::Error),
}

/// One readable output stream of a child. A reader thread pulls from the OS
/// stream into a channel, so the child never blocks on a full pipe and every
/// read here is bounded by a deadline.
#[derive(Debug)]
pub struct OutputStream {
    program: String,
    name: &'static str,
    rx: Receiver<Chunk>,
    pending: Vec<u8>,
    before: Option<Vec<u8>>,
    after: Option<Vec<u8>>,
    eof: bool,
    drained: bool,
}

impl OutputStream {
    /// Starts the reader thread. With `pty` set, EIO from the master side is
    /// read as end-of-stream, which is how Linux reports a hung-up slave.
    pub(crate) fn spawn<R>(program: &str, name: &'static str, mut reader: R, pty: bool) -> io::Result<Self>
    where
        R: Read + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        thread::Builder::new().name(format!("subproc-{}", name)).spawn(move || {
            let mut buf = vec![0u8; CHUNK_SIZE];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => { let _ = tx.send(Chunk::Eof); break; }
                    Ok(n) => {
                        if tx.send(Chunk::Data(buf[..n].to_vec())).is_err() { break; }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) if pty && e.raw_os_error() == Some(Errno::EIO as i32) => {
                        let _ = tx.send(Chunk::Eof);
                        break;
                    }
                    Err(e) => { let _ = tx.send(Chunk::Failed(e)); break; }
                }
            }
        })?;
        Ok(Self {
            program: program.to_string(),
            name,
            rx,
            pending: Vec::new(),
            before: None,
            after: None,
            eof: false,
            drained: false,
        })
    }

    pub fn program(&self) -> &str { &self.program }
    pub fn name(&self) -> &'static str { self.name }
    pub fn is_eof(&self) -> bool { self.eof }

    /// Data preceding the last `expect` match.
    pub fn before(&self) -> Option<&[u8]> { self.before.as_deref() }
    /// Data matched by the last `expect`.
    pub fn after(&self) -> Option<&[u8]> { self.after.as_deref() }

    /// Reads everything up to end-of-stream. A second call after a full drain
    /// fails with `StreamClosed` rather than returning empty data.
    pub fn read_to_end(&mut self, timeout: Duration) -> Result<Vec<u8>, ProcError> {
        if self.drained {
            return Err(self.closed());
        }
        let deadline = Instant::now() + timeout;
        while !self.eof {
            self.pull(deadline, timeout)?;
        }
        self.drained = true;
        Ok(std::mem::take(&mut self.pending))
    }

    /// Concatenates `before`, `after` and the remainder of the stream. Absent
    /// segments count as empty.
    pub fn drain_all(&mut self, timeout: Duration) -> Result<Vec<u8>, ProcError> {
        let rest = self.read_to_end(timeout)?;
        let mut out = self.before.take().unwrap_or_default();
        out.extend(self.after.take().unwrap_or_default());
        out.extend(rest);
        Ok(out)
    }

    /// Consumes output until `pattern` matches, recording `before` and `after`.
    pub fn expect(&mut self, pattern: &Regex, timeout: Duration) -> Result<(), ProcError> {
        if self.drained {
            return Err(self.closed());
        }
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(m) = pattern.find(&self.pending) {
                let (start, end) = (m.start(), m.end());
                let rest = self.pending.split_off(end);
                let matched = self.pending.split_off(start);
                self.before = Some(std::mem::replace(&mut self.pending, rest));
                self.after = Some(matched);
                return Ok(());
            }
            if self.eof {
                self.before = Some(std::mem::take(&mut self.pending));
                self.after = None;
                return Err(ProcError::PatternNotFound {
                    program: self.program.clone(),
                    pattern: pattern.as_str().to_string(),
                });
            }
            self.pull(deadline, timeout)?;
        }
    }

    fn pull(&mut self, deadline: Instant, timeout: Duration) -> Result<(), ProcError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match self.rx.recv_timeout(remaining) {
            Ok(Chunk::Data(data)) => {
                trace!(program = %self.program, stream = self.name, bytes = data.len(), "read");
                self.pending.extend(data);
                Ok(())
            }
            Ok(Chunk::Eof) | Err(RecvTimeoutError::Disconnected) => { self.eof = true; Ok(()) }
            Ok(Chunk::Failed(e)) => { self.eof = true; Err(ProcError::Io(e)) }
            Err(RecvTimeoutError::Timeout) => {
                Err(ProcError::Timeout { program: self.program.clone(), timeout })
            }
        }
    }

    fn closed(&self) -> ProcError {
        ProcError::StreamClosed { program: self.program.clone(), stream: self.name }
    }
}
