//! Command modeling: what to run, and how to run it.

pub mod lexer;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use crate::error::ProcError;
use crate::render;

/// Timeout applied to every blocking read or wait unless overridden.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Environment variable that overrides [`DEFAULT_TIMEOUT`], in seconds.
pub const TIMEOUT_ENV: &str = "SUBPROC_TIMEOUT";

/// Resolves the default timeout, honoring `SUBPROC_TIMEOUT` when it parses.
pub fn default_timeout() -> Duration { parse_timeout(std::env::var(TIMEOUT_ENV).ok()) }

fn parse_timeout(raw: Option<String>) -> Duration {
    raw.and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs > 0.0)
        .map(Duration::from_secs_f64)
        .unwrap_or(DEFAULT_TIMEOUT)
}

/// One program plus its arguments. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self { Self { program: program.into(), args: Vec::new() } }

    pub fn arg(mut self, arg: impl Into<String>) -> Self { self.args.push(arg.into()); self }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Splits a single command line into argv using shell quoting rules.
    pub fn parse(line: &str) -> Result<Self, ProcError> {
        let argv = shell_words::split(line)
            .map_err(|e| ProcError::InvalidInput(format!("cannot tokenize {:?}: {}", line, e)))?;
        Self::from_argv(argv)
    }

    pub fn from_argv<I, S>(argv: I) -> Result<Self, ProcError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut it = argv.into_iter().map(Into::into);
        match it.next() {
            Some(program) if !program.is_empty() => Ok(Self { program, args: it.collect() }),
            _ => Err(ProcError::InvalidInput("empty command".into())),
        }
    }

    pub fn program(&self) -> &str { &self.program }
    pub fn arguments(&self) -> &[String] { &self.args }

    /// Builds the std `Command` with cwd and env overrides applied on top of
    /// the inherited environment. Stdio wiring is left to the caller.
    pub(crate) fn command(&self, opts: &RunOptions) -> Result<Command, ProcError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(dir) = &opts.cwd {
            if !dir.is_dir() {
                return Err(ProcError::InvalidCwd(dir.clone()));
            }
            cmd.current_dir(dir);
        }
        cmd.envs(&opts.env);
        Ok(cmd)
    }

    pub(crate) fn spawn_error(&self, source: std::io::Error) -> ProcError {
        ProcError::Spawn { program: self.program.clone(), source }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&render::render_cmd(self)) }
}

/// Anything that can name a single command.
pub trait ToCommand {
    fn to_command(self) -> Result<CommandSpec, ProcError>;
}

impl ToCommand for CommandSpec {
    fn to_command(self) -> Result<CommandSpec, ProcError> { Ok(self) }
}

impl ToCommand for &CommandSpec {
    fn to_command(self) -> Result<CommandSpec, ProcError> { Ok(self.clone()) }
}

impl ToCommand for &str {
    fn to_command(self) -> Result<CommandSpec, ProcError> { CommandSpec::parse(self) }
}

impl ToCommand for String {
    fn to_command(self) -> Result<CommandSpec, ProcError> { CommandSpec::parse(&self) }
}

impl ToCommand for Vec<String> {
    fn to_command(self) -> Result<CommandSpec, ProcError> { CommandSpec::from_argv(self) }
}

impl ToCommand for &[&str] {
    fn to_command(self) -> Result<CommandSpec, ProcError> { CommandSpec::from_argv(self.iter().copied()) }
}

impl<const N: usize> ToCommand for [&str; N] {
    fn to_command(self) -> Result<CommandSpec, ProcError> { CommandSpec::from_argv(self) }
}

/// Per-run settings shared by both spawning strategies.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub binary: bool,
}

impl RunOptions {
    pub fn new() -> Self { Self::default() }
    pub fn cwd(mut self, dir: impl AsRef<Path>) -> Self { self.cwd = Some(dir.as_ref().to_path_buf()); self }
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
    pub fn envs(mut self, vars: BTreeMap<String, String>) -> Self { self.env.extend(vars); self }
    pub fn binary(mut self, binary: bool) -> Self { self.binary = binary; self }
}

/// Ordered pipeline stages; stage `i` feeds stage `i + 1`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineSpec(pub Vec<CommandSpec>);

impl PipelineSpec {
    pub fn new() -> Self { PipelineSpec(Vec::new()) }
    pub fn push(&mut self, cmd: CommandSpec) { self.0.push(cmd); }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
    pub fn len(&self) -> usize { self.0.len() }
    pub fn stages(&self) -> &[CommandSpec] { &self.0 }

    /// Splits `a | b | c` into stages (quote-aware), then tokenizes each stage.
    pub fn parse(line: &str) -> Result<Self, ProcError> {
        let stages = lexer::split_stages(line)?
            .iter()
            .map(|s| CommandSpec::parse(s))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PipelineSpec(stages))
    }

    pub fn from_stages<I, A, S>(stages: I) -> Result<Self, ProcError>
    where
        I: IntoIterator<Item = A>,
        A: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let stages = stages.into_iter().map(CommandSpec::from_argv).collect::<Result<Vec<_>, _>>()?;
        if stages.is_empty() {
            return Err(ProcError::InvalidInput("pipeline has no stages".into()));
        }
        Ok(PipelineSpec(stages))
    }
}

impl fmt::Display for PipelineSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&render::render_pipe(self)) }
}
