//! Builds and runs shell-like pipelines: `a | b | c`.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::cmd::{default_timeout, PipelineSpec, RunOptions};
use crate::error::ProcError;
use crate::exec::{BufferedExecutor, Executor, StreamingExecutor};
use crate::invocation::Invocation;
use crate::render::PosixRenderer;

/// How stage output reaches the next stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PipeMode {
    /// Capture each stage fully on a pty, then forward it. Stages run one
    /// after another.
    #[default]
    Buffered,
    /// Spawn all stages at once, connected by OS pipes.
    Streaming,
}

impl PipeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipeMode::Buffered => "buffered",
            PipeMode::Streaming => "streaming",
        }
    }
}

impl fmt::Display for PipeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    spec: PipelineSpec,
    opts: RunOptions,
    timeout: Duration,
    mode: PipeMode,
}

impl PipelineBuilder {
    /// From a single command line; stages split on unquoted `|`.
    pub fn parse(line: &str) -> Result<Self, ProcError> { Self::from_spec(PipelineSpec::parse(line)?) }

    /// From already-tokenized stages, e.g. `[["echo", "a"], ["wc", "-l"]]`.
    pub fn from_stages<I, A, S>(stages: I) -> Result<Self, ProcError>
    where
        I: IntoIterator<Item = A>,
        A: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_spec(PipelineSpec::from_stages(stages)?)
    }

    pub fn from_spec(spec: PipelineSpec) -> Result<Self, ProcError> {
        if spec.is_empty() {
            return Err(ProcError::InvalidInput("pipeline has no stages".into()));
        }
        Ok(Self { spec, opts: RunOptions::default(), timeout: default_timeout(), mode: PipeMode::default() })
    }

    pub fn timeout(mut self, timeout: Duration) -> Self { self.timeout = timeout; self }
    pub fn cwd(mut self, dir: impl AsRef<Path>) -> Self { self.opts = self.opts.cwd(dir); self }
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self { self.opts = self.opts.env(key, value); self }
    pub fn envs(mut self, vars: BTreeMap<String, String>) -> Self { self.opts = self.opts.envs(vars); self }
    pub fn binary(mut self, binary: bool) -> Self { self.opts = self.opts.binary(binary); self }
    pub fn mode(mut self, mode: PipeMode) -> Self { self.mode = mode; self }

    pub fn spec(&self) -> &PipelineSpec { &self.spec }
    pub fn options(&self) -> &RunOptions { &self.opts }

    /// The pipeline as it would be typed into `sh`, with run metadata.
    pub fn plan(&self) -> String {
        PosixRenderer::default().render_plan(&self.spec, &self.opts, self.timeout, self.mode.as_str())
    }

    /// Runs every stage in order and returns the final one. The first stage
    /// error aborts the pipeline; a non-zero exit does not.
    pub fn run(&self) -> Result<Invocation, ProcError> {
        tracing::debug!(plan = %self.plan(), "running pipeline");
        match self.mode {
            PipeMode::Buffered => BufferedExecutor { opts: self.opts.clone(), timeout: self.timeout }.exec(&self.spec),
            PipeMode::Streaming => StreamingExecutor { opts: self.opts.clone(), timeout: self.timeout }.exec(&self.spec),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init_test_tracing;

    const T: Duration = Duration::from_secs(10);

    #[test]
    fn two_stage_output_matches_producer() {
        init_test_tracing();
        let mut producer = Invocation::new("echo hello").unwrap();
        producer.run(false, &RunOptions::default()).unwrap();
        let expected = producer.out().unwrap().clone();

        let mut last = PipelineBuilder::parse("echo hello | cat").unwrap().timeout(T).run().unwrap();
        assert_eq!(last.out().unwrap(), &expected);
        assert!(last.ok().unwrap());
    }

    #[test]
    fn string_and_pretokenized_agree() {
        init_test_tracing();
        let mut a = PipelineBuilder::parse("echo a | grep a | wc -l").unwrap().timeout(T).run().unwrap();
        let mut b = PipelineBuilder::from_stages([vec!["echo", "a"], vec!["grep", "a"], vec!["wc", "-l"]])
            .unwrap()
            .timeout(T)
            .run()
            .unwrap();
        let a_out = a.out().unwrap().clone();
        assert_eq!(b.out().unwrap(), &a_out);
        assert_eq!(a_out.to_string().trim(), "1");
    }

    #[test]
    fn quoted_pipe_is_one_stage() {
        let b = PipelineBuilder::parse(r#"echo "a|b""#).unwrap();
        assert_eq!(b.spec().len(), 1);
        let mut last = b.timeout(T).run().unwrap();
        assert_eq!(last.out().unwrap(), "a|b\n");
    }

    #[test]
    fn empty_command_is_invalid_input() {
        assert!(matches!(PipelineBuilder::parse(""), Err(ProcError::InvalidInput(_))));
        assert!(matches!(PipelineBuilder::from_stages(Vec::<Vec<String>>::new()), Err(ProcError::InvalidInput(_))));
        assert!(matches!(PipelineBuilder::from_spec(PipelineSpec::new()), Err(ProcError::InvalidInput(_))));
    }

    #[test]
    fn single_stage_is_plain_run() {
        let mut last = PipelineBuilder::parse("echo solo").unwrap().timeout(T).run().unwrap();
        assert_eq!(last.out().unwrap(), "solo\n");
        assert_eq!(last.blocking(), Some(false));
    }

    #[test]
    fn non_zero_stage_does_not_abort() {
        let mut last = PipelineBuilder::parse("sh -c 'echo x; exit 1' | cat").unwrap().timeout(T).run().unwrap();
        assert_eq!(last.out().unwrap(), "x\n");
        assert_eq!(last.return_code().unwrap(), 0);
    }

    #[test]
    fn stage_failure_aborts() {
        let err = PipelineBuilder::parse("echo a | no-such-program-subproc-test | cat").unwrap().timeout(T).run().unwrap_err();
        assert!(matches!(err, ProcError::Spawn { ref program, .. } if program == "no-such-program-subproc-test"));
    }

    #[test]
    fn stage_timeout_surfaces() {
        let err = PipelineBuilder::parse("sleep 5 | cat")
            .unwrap()
            .timeout(Duration::from_secs(1))
            .run()
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn options_reach_every_stage() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data.txt"), "beta\nalpha\n").unwrap();
        let mut last = PipelineBuilder::parse("cat data.txt | sort")
            .unwrap()
            .cwd(dir.path())
            .timeout(T)
            .run()
            .unwrap();
        assert_eq!(last.out().unwrap(), "alpha\nbeta\n");
    }

    #[test]
    fn streaming_mode_matches_buffered() {
        let line = "printf 'one\\ntwo\\n' | grep t";
        let mut buffered = PipelineBuilder::parse(line).unwrap().timeout(T).run().unwrap();
        let mut streaming = PipelineBuilder::parse(line).unwrap().timeout(T).mode(PipeMode::Streaming).run().unwrap();
        let expected = buffered.out().unwrap().clone();
        assert_eq!(streaming.out().unwrap(), &expected);
        assert_eq!(streaming.blocking(), Some(true));
    }

    #[test]
    fn carriage_returns_reach_next_stage() {
        for mode in [PipeMode::Buffered, PipeMode::Streaming] {
            let mut last = PipelineBuilder::parse(r"printf 'a\r\nb' | wc -c").unwrap().timeout(T).mode(mode).run().unwrap();
            assert_eq!(last.out().unwrap().to_string().trim(), "4", "{mode}");
        }
    }

    #[test]
    fn oversized_input_to_non_reader_times_out() {
        let err = PipelineBuilder::parse("head -c 300000 /dev/zero | sleep 30")
            .unwrap()
            .timeout(Duration::from_secs(1))
            .run()
            .unwrap_err();
        assert!(err.is_timeout(), "{err}");
    }

    #[test]
    fn plan_names_mode() {
        let b = PipelineBuilder::parse("echo a | cat").unwrap().timeout(Duration::from_secs(30)).mode(PipeMode::Streaming);
        assert_eq!(b.plan(), "echo a | cat  # timeout=30s, mode=streaming");
    }
}
