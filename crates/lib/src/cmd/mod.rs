//! External command execution.
//!
//! Every side effect the pipeline has outside its own process (git, docker)
//! goes through [`CmdRunner`]. Commands are spawned directly, without a shell,
//! so paths and image names never need quoting.
//!
//! Spawned processes are killed when the future driving them is dropped, which
//! makes every external call cancellable by the caller. An optional timeout
//! bounds each call.

use std::collections::{BTreeMap, VecDeque};
use std::ffi::{OsStr, OsString};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::debug;

/// Number of trailing output lines kept for a failed streamed command.
const FAILED_TAIL_LINES: usize = 20;

/// Errors that can occur while running an external command.
#[derive(Debug, Error)]
pub enum CmdError {
  /// The process could not be started.
  #[error("failed to spawn '{cmd}': {source}")]
  Spawn {
    cmd: String,
    #[source]
    source: std::io::Error,
  },

  /// Reading the process output or waiting for it failed.
  #[error("i/o error while running '{cmd}': {source}")]
  Io {
    cmd: String,
    #[source]
    source: std::io::Error,
  },

  /// The process exited unsuccessfully.
  #[error("command failed with exit code {code:?}: {cmd}\n{output}")]
  Failed {
    cmd: String,
    code: Option<i32>,
    output: String,
  },

  /// The process did not finish within the configured timeout.
  #[error("command timed out after {timeout:?}: {cmd}")]
  Timeout { cmd: String, timeout: Duration },
}

/// Which pipe a streamed line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
  Stdout,
  Stderr,
}

/// Captured output of a finished command.
#[derive(Debug, Clone, Default)]
pub struct CmdOutput {
  pub stdout: Vec<u8>,
  pub stderr: Vec<u8>,
}

impl CmdOutput {
  /// Stdout decoded lossily and trimmed.
  pub fn stdout_str(&self) -> String {
    String::from_utf8_lossy(&self.stdout).trim().to_string()
  }

  /// Stdout followed by stderr, the way a terminal would show them.
  pub fn combined(&self) -> String {
    let mut out = String::from_utf8_lossy(&self.stdout).into_owned();
    out.push_str(&String::from_utf8_lossy(&self.stderr));
    out
  }
}

/// Per-call options: working directory and environment overrides.
///
/// The environment is inherited from the current process; entries in `env`
/// are added on top.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions<'a> {
  pub cwd: Option<&'a Path>,
  pub env: Option<&'a BTreeMap<String, String>>,
}

impl<'a> RunOptions<'a> {
  pub fn in_dir(cwd: &'a Path) -> Self {
    Self { cwd: Some(cwd), env: None }
  }
}

/// Runs external commands with an optional per-call timeout.
#[derive(Debug, Clone, Default)]
pub struct CmdRunner {
  timeout: Option<Duration>,
}

impl CmdRunner {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_timeout(timeout: Option<Duration>) -> Self {
    Self { timeout }
  }

  pub fn timeout(&self) -> Option<Duration> {
    self.timeout
  }

  /// Run a command to completion and capture its output.
  ///
  /// A non-zero exit status is an error carrying the combined output.
  pub async fn run<I, S>(&self, program: &str, args: I, options: RunOptions<'_>) -> Result<CmdOutput, CmdError>
  where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
  {
    let args: Vec<OsString> = args.into_iter().map(|a| a.as_ref().to_os_string()).collect();
    let cmd = command_line(program, &args);
    debug!(cmd = %cmd, cwd = ?options.cwd, "running command");

    let mut command = build_command(program, &args, options);
    command.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());

    let child = command.spawn().map_err(|source| CmdError::Spawn {
      cmd: cmd.clone(),
      source,
    })?;

    let output = self
      .bounded(&cmd, child.wait_with_output())
      .await?
      .map_err(|source| CmdError::Io { cmd: cmd.clone(), source })?;

    let captured = CmdOutput {
      stdout: output.stdout,
      stderr: output.stderr,
    };

    if !output.status.success() {
      return Err(CmdError::Failed {
        cmd,
        code: output.status.code(),
        output: captured.combined(),
      });
    }

    Ok(captured)
  }

  /// Run a command, handing each output line to `on_line` as soon as it is read.
  ///
  /// Stdout and stderr are read concurrently. Nothing is buffered beyond the
  /// last few lines, which are attached to the error if the command fails.
  pub async fn stream<I, S, F>(
    &self,
    program: &str,
    args: I,
    options: RunOptions<'_>,
    mut on_line: F,
  ) -> Result<(), CmdError>
  where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
    F: FnMut(OutputStream, &str),
  {
    let args: Vec<OsString> = args.into_iter().map(|a| a.as_ref().to_os_string()).collect();
    let cmd = command_line(program, &args);
    debug!(cmd = %cmd, cwd = ?options.cwd, "streaming command");

    let mut command = build_command(program, &args, options);
    command.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());

    let mut child = command.spawn().map_err(|source| CmdError::Spawn {
      cmd: cmd.clone(),
      source,
    })?;

    let io_err = |source| CmdError::Io { cmd: cmd.clone(), source };

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
      return Err(io_err(std::io::Error::other("child pipes not captured")));
    };

    let mut tail: VecDeque<String> = VecDeque::with_capacity(FAILED_TAIL_LINES);
    let pump = async {
      let mut out_lines = BufReader::new(stdout).lines();
      let mut err_lines = BufReader::new(stderr).lines();
      let (mut out_done, mut err_done) = (false, false);

      while !(out_done && err_done) {
        let (stream, line) = tokio::select! {
          line = out_lines.next_line(), if !out_done => (OutputStream::Stdout, line?),
          line = err_lines.next_line(), if !err_done => (OutputStream::Stderr, line?),
        };

        match line {
          Some(line) => {
            on_line(stream, &line);
            if tail.len() == FAILED_TAIL_LINES {
              tail.pop_front();
            }
            tail.push_back(line);
          }
          None if stream == OutputStream::Stdout => out_done = true,
          None => err_done = true,
        }
      }

      child.wait().await
    };

    let status = self.bounded(&cmd, pump).await?.map_err(io_err)?;

    if !status.success() {
      return Err(CmdError::Failed {
        cmd,
        code: status.code(),
        output: Vec::from(tail).join("\n"),
      });
    }

    Ok(())
  }

  async fn bounded<F, T>(&self, cmd: &str, fut: F) -> Result<T, CmdError>
  where
    F: std::future::Future<Output = T>,
  {
    match self.timeout {
      Some(timeout) => tokio::time::timeout(timeout, fut).await.map_err(|_| CmdError::Timeout {
        cmd: cmd.to_string(),
        timeout,
      }),
      None => Ok(fut.await),
    }
  }
}

fn build_command(program: &str, args: &[OsString], options: RunOptions<'_>) -> Command {
  let mut command = Command::new(program);
  command.args(args).kill_on_drop(true);

  if let Some(cwd) = options.cwd {
    command.current_dir(cwd);
  }

  if let Some(env) = options.env {
    for (key, value) in env {
      command.env(key, value);
    }
  }

  command
}

/// Render a command line for logs and error messages.
fn command_line(program: &str, args: &[OsString]) -> String {
  let mut line = program.to_string();
  for arg in args {
    line.push(' ');
    line.push_str(&arg.to_string_lossy());
  }
  line
}

#[cfg(all(test, unix))]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn sh(script: &str) -> [String; 2] {
    ["-c".to_string(), script.to_string()]
  }

  #[tokio::test]
  async fn run_captures_stdout() {
    let output = CmdRunner::new()
      .run("/bin/sh", sh("echo hello"), RunOptions::default())
      .await
      .unwrap();

    assert_eq!(output.stdout_str(), "hello");
  }

  #[tokio::test]
  async fn run_combines_stdout_and_stderr() {
    let output = CmdRunner::new()
      .run("/bin/sh", sh("echo out; echo err >&2"), RunOptions::default())
      .await
      .unwrap();

    assert_eq!(output.combined(), "out\nerr\n");
  }

  #[tokio::test]
  async fn run_in_working_directory() {
    let temp_dir = TempDir::new().unwrap();

    CmdRunner::new()
      .run("/usr/bin/touch", ["cwd_marker"], RunOptions::in_dir(temp_dir.path()))
      .await
      .unwrap();

    assert!(temp_dir.path().join("cwd_marker").exists());
  }

  #[tokio::test]
  async fn run_with_env_override() {
    let mut env = BTreeMap::new();
    env.insert("PROCBUILD_TEST_VAR".to_string(), "value".to_string());

    let output = CmdRunner::new()
      .run(
        "/bin/sh",
        sh("echo $PROCBUILD_TEST_VAR"),
        RunOptions {
          cwd: None,
          env: Some(&env),
        },
      )
      .await
      .unwrap();

    assert_eq!(output.stdout_str(), "value");
  }

  #[tokio::test]
  async fn run_failure_reports_exit_code_and_output() {
    let result = CmdRunner::new()
      .run("/bin/sh", sh("echo broken >&2; exit 3"), RunOptions::default())
      .await;

    match result {
      Err(CmdError::Failed { code, output, .. }) => {
        assert_eq!(code, Some(3));
        assert!(output.contains("broken"));
      }
      other => panic!("expected failure, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn run_missing_program_is_spawn_error() {
    let result = CmdRunner::new()
      .run("/nonexistent/procbuild-binary", Vec::<String>::new(), RunOptions::default())
      .await;

    assert!(matches!(result, Err(CmdError::Spawn { .. })));
  }

  #[tokio::test]
  async fn run_times_out() {
    let runner = CmdRunner::with_timeout(Some(Duration::from_millis(100)));

    let result = runner.run("/bin/sh", sh("sleep 5"), RunOptions::default()).await;

    assert!(matches!(result, Err(CmdError::Timeout { .. })));
  }

  #[tokio::test]
  async fn stream_delivers_lines_from_both_pipes() {
    let mut seen = Vec::new();

    CmdRunner::new()
      .stream(
        "/bin/sh",
        sh("echo one; echo two >&2; echo three"),
        RunOptions::default(),
        |stream, line| seen.push((stream, line.to_string())),
      )
      .await
      .unwrap();

    assert!(seen.contains(&(OutputStream::Stdout, "one".to_string())));
    assert!(seen.contains(&(OutputStream::Stderr, "two".to_string())));
    assert!(seen.contains(&(OutputStream::Stdout, "three".to_string())));
    assert_eq!(seen.len(), 3);
  }

  #[tokio::test]
  async fn stream_failure_keeps_tail() {
    let result = CmdRunner::new()
      .stream("/bin/sh", sh("echo last words; exit 1"), RunOptions::default(), |_, _| {})
      .await;

    match result {
      Err(CmdError::Failed { output, .. }) => assert_eq!(output, "last words"),
      other => panic!("expected failure, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn stream_failure_tail_is_bounded() {
    let result = CmdRunner::new()
      .stream(
        "/bin/sh",
        sh("i=1; while [ $i -le 30 ]; do echo line $i; i=$((i+1)); done; exit 1"),
        RunOptions::default(),
        |_, _| {},
      )
      .await;

    match result {
      Err(CmdError::Failed { output, .. }) => {
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), FAILED_TAIL_LINES);
        assert_eq!(lines.first(), Some(&"line 11"));
        assert_eq!(lines.last(), Some(&"line 30"));
      }
      other => panic!("expected failure, got {:?}", other),
    }
  }
}
