//! Child process invocation for the command line collaborators.
//!
//! Secrets handed to a tool go through [`Invocation::secret_env`],
//! [`Invocation::secret_stdin`] or, where a tool only accepts a flag,
//! [`Invocation::secret_arg`]. All three reveal the value only while the
//! command is being spawned, and [`Invocation::display`] renders them redacted.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::secret::Secret;

use super::ToolError;

/// Lines of stderr kept in a failure message.
const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Clone)]
enum Arg {
  Plain(String),
  Secret(Secret),
}

/// Captured output of a successful invocation.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
  pub stdout: String,
  pub stderr: String,
}

/// A command line to run, built up before spawning.
#[derive(Debug, Clone)]
pub struct Invocation {
  program: String,
  args: Vec<Arg>,
  env: BTreeMap<String, String>,
  secret_env: BTreeMap<String, Secret>,
  stdin: Option<Secret>,
  cwd: Option<PathBuf>,
}

impl Invocation {
  pub fn new(program: impl Into<String>) -> Self {
    Self {
      program: program.into(),
      args: Vec::new(),
      env: BTreeMap::new(),
      secret_env: BTreeMap::new(),
      stdin: None,
      cwd: None,
    }
  }

  pub fn arg(mut self, arg: impl Into<String>) -> Self {
    self.args.push(Arg::Plain(arg.into()));
    self
  }

  pub fn args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.args.extend(args.into_iter().map(|a| Arg::Plain(a.into())));
    self
  }

  /// An argument whose value must not be logged.
  pub fn secret_arg(mut self, secret: &Secret) -> Self {
    self.args.push(Arg::Secret(secret.clone()));
    self
  }

  pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.env.insert(key.into(), value.into());
    self
  }

  /// An environment binding visible only to the child process.
  pub fn secret_env(mut self, key: impl Into<String>, secret: &Secret) -> Self {
    self.secret_env.insert(key.into(), secret.clone());
    self
  }

  /// Write `secret` to the child's stdin and close it.
  pub fn secret_stdin(mut self, secret: &Secret) -> Self {
    self.stdin = Some(secret.clone());
    self
  }

  pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
    self.cwd = Some(dir.into());
    self
  }

  pub fn program(&self) -> &str {
    &self.program
  }

  /// The command line with secret arguments redacted.
  pub fn display(&self) -> String {
    let mut rendered = self.program.clone();
    for arg in &self.args {
      rendered.push(' ');
      match arg {
        Arg::Plain(value) => rendered.push_str(value),
        Arg::Secret(secret) => rendered.push_str(&secret.to_string()),
      }
    }
    rendered
  }

  /// Run to completion and return captured output.
  ///
  /// The child inherits the parent environment plus the configured bindings,
  /// and is killed if the returned future is dropped before it exits.
  pub async fn run(&self) -> Result<ToolOutput, ToolError> {
    info!(cmd = %self.display(), "running tool");

    let mut command = Command::new(&self.program);
    for arg in &self.args {
      match arg {
        Arg::Plain(value) => command.arg(value),
        Arg::Secret(secret) => command.arg(secret.reveal()),
      };
    }
    command
      .envs(&self.env)
      .envs(self.secret_env.iter().map(|(k, v)| (k, v.reveal())))
      .stdin(if self.stdin.is_some() { Stdio::piped() } else { Stdio::null() })
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true);

    if let Some(cwd) = &self.cwd {
      command.current_dir(cwd);
    }

    debug!(program = %self.program, cwd = ?self.cwd, "spawning process");

    let mut child = command.spawn().map_err(|source| ToolError::Spawn {
      program: self.program.clone(),
      source,
    })?;

    if let (Some(secret), Some(mut stdin)) = (&self.stdin, child.stdin.take()) {
      stdin.write_all(secret.reveal().as_bytes()).await?;
      stdin.shutdown().await?;
    }

    let output = child.wait_with_output().await?;
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

    if !output.status.success() {
      if !stdout.is_empty() {
        debug!(stdout = %stdout, "tool stdout");
      }
      return Err(ToolError::Failed {
        program: self.program.clone(),
        code: output.status.code(),
        stderr: tail(&stderr, STDERR_TAIL_LINES),
      });
    }

    if !stdout.is_empty() {
      debug!(stdout = %stdout, "tool output");
    }

    Ok(ToolOutput { stdout, stderr })
  }
}

fn tail(text: &str, lines: usize) -> String {
  let all: Vec<&str> = text.lines().collect();
  let start = all.len().saturating_sub(lines);
  all[start..].join("\n")
}
