//! subproc::prelude - grab-and-go imports for running commands

pub use crate::cmd::{CommandSpec, PipelineSpec, RunOptions, ToCommand, DEFAULT_TIMEOUT};
pub use crate::easy::{chain, chain_argv, run, run_with, spawn};
pub use crate::error::ProcError;
pub use crate::invocation::Invocation;
pub use crate::output::Captured;
pub use crate::pipeline::{PipeMode, PipelineBuilder};
