//! Easy mode: one call per common task.

use std::time::Duration;

use crate::cmd::{RunOptions, ToCommand};
use crate::error::ProcError;
use crate::invocation::Invocation;
use crate::pipeline::PipelineBuilder;

/// Runs `cmd` over plain pipes and waits for it to exit.
pub fn run<C: ToCommand>(cmd: C) -> Result<Invocation, ProcError> { run_with(cmd, true, &RunOptions::default(), None) }

/// Runs `cmd`; when `block` is set, waits for exit before returning. A
/// non-blocking run lands on a pty and is left running for send/expect.
pub fn run_with<C: ToCommand>(cmd: C, block: bool, opts: &RunOptions, timeout: Option<Duration>) -> Result<Invocation, ProcError> {
    let mut inv = Invocation::new(cmd)?;
    if let Some(t) = timeout { inv = inv.with_timeout(t); }
    inv.run(block, opts)?;
    if block { inv.block()?; }
    Ok(inv)
}

/// Starts `cmd` on a pty without waiting.
pub fn spawn<C: ToCommand>(cmd: C) -> Result<Invocation, ProcError> { run_with(cmd, false, &RunOptions::default(), None) }

/// Runs a `a | b | c` command line with default settings.
pub fn chain(line: &str) -> Result<Invocation, ProcError> { PipelineBuilder::parse(line)?.run() }

/// Runs pre-tokenized stages with default settings.
pub fn chain_argv<I, A, S>(stages: I) -> Result<Invocation, ProcError>
where
    I: IntoIterator<Item = A>,
    A: IntoIterator<Item = S>,
    S: Into<String>,
{
    PipelineBuilder::from_stages(stages)?.run()
}
