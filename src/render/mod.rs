//! POSIX rendering of commands and pipelines, for display, logs and plans.

use std::time::Duration;

use crate::cmd::{CommandSpec, PipelineSpec, RunOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotePolicy { Strict, Loose }

pub trait Renderer {
    fn render_cmd(&self, cmd: &CommandSpec) -> String;
    fn render_pipe(&self, pipe: &PipelineSpec) -> String {
        pipe.stages().iter().map(|c| self.render_cmd(c)).collect::<Vec<_>>().join(" | ")
    }
}

#[derive(Debug, Clone)]
pub struct PosixRenderer { pub quote: QuotePolicy }

impl Default for PosixRenderer { fn default() -> Self { Self { quote: QuotePolicy::Loose } } }

impl Renderer for PosixRenderer {
    fn render_cmd(&self, cmd: &CommandSpec) -> String {
        let mut parts = Vec::with_capacity(cmd.arguments().len() + 1);
        parts.push(quote_word(cmd.program(), QuotePolicy::Loose));
        for a in cmd.arguments() {
            parts.push(quote_word(a, self.quote));
        }
        parts.join(" ")
    }
}

impl PosixRenderer {
    /// Renders a pipeline the way it would be typed into `sh`, prefixed with
    /// `cd` and env assignments, and suffixed with run metadata as a comment.
    pub fn render_plan(&self, pipe: &PipelineSpec, opts: &RunOptions, timeout: Duration, mode: &str) -> String {
        let mut prefix: Vec<String> = Vec::new();
        if let Some(dir) = &opts.cwd {
            prefix.push(format!("cd {} &&", quote_sh(&dir.to_string_lossy())));
        }
        for (k, v) in &opts.env {
            prefix.push(format!("{}={}", k, quote_sh(v)));
        }
        let mut s = prefix.join(" ");
        if !s.is_empty() { s.push(' '); }
        s.push_str(&self.render_pipe(pipe));

        let mut metas = vec![format!("timeout={}s", timeout.as_secs_f64()), format!("mode={}", mode)];
        if opts.binary { metas.push("binary".into()); }
        s.push_str(&format!("  # {}", metas.join(", ")));
        s
    }
}

pub fn render_cmd(cmd: &CommandSpec) -> String { PosixRenderer::default().render_cmd(cmd) }

pub fn render_pipe(pipe: &PipelineSpec) -> String { PosixRenderer::default().render_pipe(pipe) }

fn quote_word(s: &str, policy: QuotePolicy) -> String {
    match policy {
        QuotePolicy::Loose if is_simple_word(s) => s.to_string(),
        _ => quote_sh(s),
    }
}

fn is_simple_word(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| matches!(c,
        'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '-' | '.' | '/' | ':' | '+' | '%' | '@' | '=' | ','))
}

fn quote_sh(s: &str) -> String {
    if s.is_empty() { return "''".to_string(); }
    let escaped = s.replace('\'', "'\"'\"'");
    format!("'{}'", escaped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_sh_basic() {
        assert_eq!(quote_sh(""), "''");
        assert_eq!(quote_sh("hello"), "'hello'");
        assert_eq!(quote_sh("hello world"), "'hello world'");
        assert_eq!(quote_sh("foo'bar"), "'foo'\"'\"'bar'");
    }

    #[test]
    fn loose_quotes_only_when_needed() {
        let cmd = CommandSpec::new("grep").args(["-e", "a|b", ""]);
        assert_eq!(render_cmd(&cmd), "grep -e 'a|b' ''");
        let strict = PosixRenderer { quote: QuotePolicy::Strict };
        assert_eq!(strict.render_cmd(&cmd), "grep '-e' 'a|b' ''");
    }

    #[test]
    fn render_plan_with_cwd_env_and_metadata() {
        let pipe = PipelineSpec::parse("echo a | grep a").unwrap();
        let opts = RunOptions::new().cwd("/tmp").env("FOO", "bar baz").binary(true);
        let got = PosixRenderer::default().render_plan(&pipe, &opts, Duration::from_secs(5), "buffered");
        assert_eq!(got, "cd '/tmp' && FOO='bar baz' echo a | grep a  # timeout=5s, mode=buffered, binary");
    }
}
