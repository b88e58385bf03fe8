//! Pipeline execution strategies.

use std::os::fd::OwnedFd;
use std::time::Duration;

use tracing::{debug, warn};

use crate::cmd::{PipelineSpec, RunOptions};
use crate::error::ProcError;
use crate::handle::{os_pipe, Wiring};
use crate::invocation::Invocation;

pub trait Executor {
    /// Runs every stage and returns the finished final stage.
    fn exec(&self, pipe: &PipelineSpec) -> Result<Invocation, ProcError>;
}

/// Buffer-and-forward: each stage runs on a pty, its full output is captured,
/// then written to the next stage byte for byte. Stages never overlap, so a producer that
/// never ends stalls the pipeline until its timeout.
#[derive(Debug, Clone)]
pub struct BufferedExecutor {
    pub opts: RunOptions,
    pub timeout: Duration,
}

impl Executor for BufferedExecutor {
    fn exec(&self, pipe: &PipelineSpec) -> Result<Invocation, ProcError> {
        let mut data: Option<Vec<u8>> = None;
        let mut last = None;
        for (i, stage) in pipe.stages().iter().enumerate() {
            debug!(stage = i, command = %stage, "buffered stage");
            let mut inv = Invocation::from_spec(stage.clone()).with_timeout(self.timeout);
            inv.run(false, &self.opts)?;
            if let Some(input) = data.as_deref().filter(|d| !d.is_empty()) {
                inv.send(input)?;
            }
            inv.send_eof()?;
            data = Some(inv.out_bytes()?.to_vec());
            inv.block()?;
            last = Some(inv);
        }
        last.ok_or_else(|| ProcError::InvalidInput("pipeline has no stages".into()))
    }
}

/// Concurrent streaming: every stage is spawned up front over plain pipes,
/// stdout of stage `i` wired straight into stdin of stage `i + 1`.
#[derive(Debug, Clone)]
pub struct StreamingExecutor {
    pub opts: RunOptions,
    pub timeout: Duration,
}

impl Executor for StreamingExecutor {
    fn exec(&self, pipe: &PipelineSpec) -> Result<Invocation, ProcError> {
        let n = pipe.len();
        let mut stages: Vec<Invocation> = Vec::with_capacity(n);
        let mut upstream: Option<OwnedFd> = None;
        for (i, stage) in pipe.stages().iter().enumerate() {
            debug!(stage = i, command = %stage, "streaming stage");
            let spawned = (|| {
                let (stdout, next_in) = if i + 1 < n {
                    let (r, w) = os_pipe()?;
                    (Some(w), Some(r))
                } else {
                    (None, None)
                };
                let mut inv = Invocation::from_spec(stage.clone()).with_timeout(self.timeout);
                inv.run_wired(&self.opts, Wiring { stdin: upstream.take(), stdout })?;
                Ok::<_, ProcError>((inv, next_in))
            })();
            match spawned {
                Ok((inv, next_in)) => {
                    stages.push(inv);
                    upstream = next_in;
                }
                Err(e) => {
                    abort(&mut stages);
                    return Err(e);
                }
            }
        }

        if let Some(first) = stages.first_mut() {
            first.send_eof()?;
        }
        let Some(mut last) = stages.pop() else {
            return Err(ProcError::InvalidInput("pipeline has no stages".into()));
        };
        if let Err(e) = last.out() {
            abort(&mut stages);
            abort(std::slice::from_mut(&mut last));
            return Err(e);
        }
        for i in 0..stages.len() {
            if let Err(e) = stages[i].block() {
                abort(&mut stages[i + 1..]);
                abort(std::slice::from_mut(&mut last));
                return Err(e);
            }
        }
        last.block()?;
        Ok(last)
    }
}

fn abort(stages: &mut [Invocation]) {
    for inv in stages.iter_mut() {
        warn!(command = %inv.command(), "aborting pipeline stage");
        let _ = inv.kill();
        let _ = inv.block();
    }
}
