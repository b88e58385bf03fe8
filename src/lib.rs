//! subproc: run processes over pipes or a pseudo-terminal, and chain them
//! into shell-like pipelines.

pub mod error;
pub mod cmd;
pub mod render;
pub mod output;
pub mod handle;
pub mod invocation;
pub mod exec;
pub mod pipeline;
pub mod prelude;
pub mod easy;
pub mod macros;

pub use error::ProcError;
pub use invocation::Invocation;
pub use pipeline::{PipeMode, PipelineBuilder};

#[cfg(test)]
pub(crate) fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
