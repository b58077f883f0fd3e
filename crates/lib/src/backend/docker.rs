//! [`ContainerBackend`] over the `docker` command line client.

use tracing::{Instrument, debug, debug_span, info};

use super::{BackendError, BuildRequest, ContainerBackend};
use crate::cmd::{CmdRunner, OutputStream, RunOptions};

const DEFAULT_PROGRAM: &str = "docker";

/// Drives a docker daemon through its CLI.
///
/// Image builds run with BuildKit's `rawjson` progress output so failures can
/// be read from structured records rather than from free text. This needs a
/// client whose `docker build` is backed by buildx and accepts
/// `--progress=rawjson`; older clients reject the flag and every build fails.
#[derive(Debug, Clone)]
pub struct DockerCli {
  runner: CmdRunner,
  program: String,
}

impl DockerCli {
  /// Use the `docker` on `PATH`, failing early when no daemon answers.
  ///
  /// The probe only checks the daemon; a client without `rawjson` progress
  /// support is detected by the first build.
  pub async fn connect(runner: CmdRunner) -> Result<Self, BackendError> {
    Self::connect_with_program(runner, DEFAULT_PROGRAM).await
  }

  pub async fn connect_with_program(runner: CmdRunner, program: impl Into<String>) -> Result<Self, BackendError> {
    let docker = Self {
      runner,
      program: program.into(),
    };

    let output = docker
      .runner
      .run(&docker.program, ["version", "--format", "{{.Server.Version}}"], RunOptions::default())
      .await
      .map_err(|source| BackendError::Unavailable { source })?;
    info!(version = %output.stdout_str(), "connected to docker");

    Ok(docker)
  }

  async fn docker<const N: usize>(&self, operation: &'static str, args: [&str; N]) -> Result<String, BackendError> {
    self
      .runner
      .run(&self.program, args, RunOptions::default())
      .await
      .map(|output| output.stdout_str())
      .map_err(|source| BackendError::Command { operation, source })
  }
}

impl ContainerBackend for DockerCli {
  async fn build_image(&self, request: &BuildRequest<'_>, on_line: &mut dyn FnMut(&str)) -> Result<(), BackendError> {
    let mut args = vec!["build".to_string(), "--progress=rawjson".to_string()];
    if let Some(dockerfile) = request.dockerfile {
      args.push("--file".to_string());
      args.push(request.context.join(dockerfile).to_string_lossy().into_owned());
    }
    args.push("--tag".to_string());
    args.push(request.tag.to_string());
    args.push(request.context.to_string_lossy().into_owned());

    self
      .runner
      .stream(&self.program, &args, RunOptions::in_dir(request.context), |stream, line| {
        if stream == OutputStream::Stdout {
          debug!(line, "build output");
        }
        on_line(line)
      })
      .instrument(debug_span!("docker", image = %request.tag))
      .await
      .map_err(|source| BackendError::Command {
        operation: "image build",
        source,
      })
  }

  async fn create_container(&self, image: &str) -> Result<String, BackendError> {
    let id = self.docker("container create", ["create", image]).await?;
    if id.is_empty() || id.contains(char::is_whitespace) {
      return Err(BackendError::UnexpectedOutput {
        operation: "container create",
        output: id,
      });
    }
    debug!(image, id = %id, "created container");
    Ok(id)
  }

  async fn copy_from_container(&self, container_id: &str, path: &str) -> Result<Vec<u8>, BackendError> {
    let source = format!("{}:{}", container_id, path);
    self
      .runner
      .run(&self.program, ["cp", source.as_str(), "-"], RunOptions::default())
      .await
      .map(|output| output.stdout)
      .map_err(|source| BackendError::Command {
        operation: "container copy",
        source,
      })
  }

  async fn list_containers(&self, image: &str) -> Result<Vec<String>, BackendError> {
    let filter = format!("ancestor={}", image);
    let output = self
      .docker("container list", ["ps", "-a", "--filter", filter.as_str(), "--format", "{{.ID}}"])
      .await?;

    Ok(
      output
        .lines()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(String::from)
        .collect(),
    )
  }

  async fn remove_container(&self, container_id: &str) -> Result<(), BackendError> {
    self.docker("container remove", ["rm", container_id]).await.map(|_| ())
  }

  async fn tag_image(&self, source: &str, target: &str) -> Result<(), BackendError> {
    self.docker("image tag", ["tag", source, target]).await.map(|_| ())
  }

  async fn push_image(&self, image: &str) -> Result<(), BackendError> {
    info!(image, "pushing image");
    self.docker("image push", ["push", image]).await.map(|_| ())
  }
}

#[cfg(all(test, unix))]
mod tests {
  use super::*;
  use std::fs;
  use std::os::unix::fs::PermissionsExt;
  use std::path::{Path, PathBuf};
  use tempfile::TempDir;

  /// A stand-in `docker` that records its arguments and prints canned output.
  fn fake_docker(dir: &Path, script_body: &str) -> PathBuf {
    let path = dir.join("docker");
    let script = format!("#!/bin/sh\necho \"$@\" >> \"{}\"\n{}\n", dir.join("calls").display(), script_body);
    fs::write(&path, script).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
  }

  fn calls(dir: &Path) -> Vec<String> {
    fs::read_to_string(dir.join("calls"))
      .unwrap_or_default()
      .lines()
      .map(String::from)
      .collect()
  }

  async fn connect(program: &Path) -> DockerCli {
    DockerCli::connect_with_program(CmdRunner::new(), program.to_string_lossy())
      .await
      .unwrap()
  }

  #[tokio::test]
  async fn connect_probes_version() {
    let temp = TempDir::new().unwrap();
    let program = fake_docker(temp.path(), "echo 24.0.7");

    connect(&program).await;

    assert_eq!(calls(temp.path()), vec!["version --format {{.Server.Version}}"]);
  }

  #[tokio::test]
  async fn connect_fails_without_daemon() {
    let temp = TempDir::new().unwrap();
    let program = fake_docker(temp.path(), "echo 'Cannot connect to the Docker daemon' >&2; exit 1");

    let result = DockerCli::connect_with_program(CmdRunner::new(), program.to_string_lossy()).await;

    assert!(matches!(result, Err(BackendError::Unavailable { .. })));
  }

  #[tokio::test]
  async fn build_streams_lines_and_passes_dockerfile() {
    let temp = TempDir::new().unwrap();
    let program = fake_docker(temp.path(), "echo '{\"stream\":\"Step 1/1\"}'\necho progress >&2");
    let docker = connect(&program).await;
    let context = temp.path().join("ctx");
    fs::create_dir(&context).unwrap();

    let mut lines = Vec::new();
    docker
      .build_image(
        &BuildRequest {
          context: &context,
          dockerfile: Some(Path::new("hack/Dockerfile")),
          tag: "out:latest",
        },
        &mut |line| lines.push(line.to_string()),
      )
      .await
      .unwrap();

    assert_eq!(lines.len(), 2);
    assert!(lines.contains(&"progress".to_string()));
    let build_call = calls(temp.path()).pop().unwrap();
    assert_eq!(
      build_call,
      format!(
        "build --progress=rawjson --file {} --tag out:latest {}",
        context.join("hack/Dockerfile").display(),
        context.display()
      )
    );
  }

  #[tokio::test]
  async fn list_containers_parses_ids() {
    let temp = TempDir::new().unwrap();
    let program = fake_docker(temp.path(), "printf 'abc123\\n\\ndef456\\n'");
    let docker = connect(&program).await;

    let ids = docker.list_containers("nuclio/builder-output").await.unwrap();

    assert_eq!(ids, vec!["abc123", "def456"]);
    assert!(
      calls(temp.path()).contains(&"ps -a --filter ancestor=nuclio/builder-output --format {{.ID}}".to_string())
    );
  }

  #[tokio::test]
  async fn create_container_rejects_garbage() {
    let temp = TempDir::new().unwrap();
    let program = fake_docker(temp.path(), "echo 'two words'");
    let docker = connect(&program).await;

    let result = docker.create_container("img").await;

    assert!(matches!(result, Err(BackendError::UnexpectedOutput { .. })));
  }

  #[tokio::test]
  async fn failed_operation_names_itself() {
    let temp = TempDir::new().unwrap();
    let program = fake_docker(
      temp.path(),
      "case \"$1\" in version) echo 24 ;; *) echo 'no such image' >&2; exit 1 ;; esac",
    );
    let docker = connect(&program).await;

    let err = docker.push_image("registry.local/out:latest").await.unwrap_err();

    assert!(err.to_string().starts_with("image push failed"));
  }
}
