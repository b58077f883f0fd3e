//! Top-level build entry point.
//!
//! [`Builder::build`] resolves the function configuration, prepares the
//! workspace, runs the container build steps and finally delivers the
//! output: an image tag, or the extracted processor binary copied to the
//! requested path.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use crate::backend::ContainerBackend;
use crate::cmd::CmdRunner;
use crate::config::{ConfigError, FunctionConfig, apply_build_descriptor, resolve_config};
use crate::consts::{BUILD_DESCRIPTOR_FILE, FUNCTION_DESCRIPTOR_FILE};
use crate::orchestrate::{CleanupReport, Orchestrator, OrchestratorConfig, StepsFailure, StepsReport};
use crate::util::fs::{CopyError, copy_file};
use crate::workspace::{PlatformSource, Workspace, WorkspaceError, WorkspaceLayout, build_workspace_with_layout};

/// What a build delivers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputKind {
  /// A tagged container image.
  #[default]
  Docker,
  /// The processor binary, copied to a host path.
  Binary,
}

impl OutputKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      OutputKind::Docker => "docker",
      OutputKind::Binary => "binary",
    }
  }
}

impl fmt::Display for OutputKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Error)]
#[error("unknown output kind '{0}', expected 'docker' or 'binary'")]
pub struct ParseOutputKindError(String);

impl FromStr for OutputKind {
  type Err = ParseOutputKindError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "docker" => Ok(OutputKind::Docker),
      "binary" => Ok(OutputKind::Binary),
      other => Err(ParseOutputKindError(other.to_string())),
    }
  }
}

/// A build request.
#[derive(Debug, Clone)]
pub struct BuildOptions {
  /// Function directory, or a single source file inside it.
  pub function_path: PathBuf,
  pub output: OutputKind,
  /// Explicit image name or binary path; derived from the function name when `None`.
  pub output_name: Option<String>,
  pub version: String,
  pub platform_source: PlatformSource,
  /// Registry the output image is pushed to.
  pub push_registry: Option<String>,
  pub verbose: bool,
  /// Leave the workspace on disk after the build.
  pub keep_workspace: bool,
  /// Upper bound for each external command.
  pub command_timeout: Option<Duration>,
}

impl BuildOptions {
  pub fn new(function_path: impl Into<PathBuf>) -> Self {
    Self {
      function_path: function_path.into(),
      output: OutputKind::default(),
      output_name: None,
      version: "latest".to_string(),
      platform_source: PlatformSource::default(),
      push_registry: None,
      verbose: false,
      keep_workspace: false,
      command_timeout: None,
    }
  }

  /// The function directory: the function path itself, or its parent when it names a file.
  pub fn function_dir(&self) -> PathBuf {
    if self.function_path.is_file() {
      match self.function_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
      }
    } else {
      self.function_path.clone()
    }
  }

  /// Reject requests that cannot possibly build.
  pub fn validate(&self) -> Result<(), OptionsError> {
    if self.function_path.as_os_str().is_empty() {
      return Err(OptionsError::NoFunctionPath);
    }
    if !self.function_path.exists() {
      return Err(OptionsError::MissingFunctionPath {
        path: self.function_path.clone(),
      });
    }
    if self.version.trim().is_empty() {
      return Err(OptionsError::EmptyVersion);
    }
    Ok(())
  }
}

#[derive(Debug, Error)]
pub enum OptionsError {
  #[error("no function path given")]
  NoFunctionPath,

  #[error("function path {} does not exist", path.display())]
  MissingFunctionPath { path: PathBuf },

  #[error("version must not be empty")]
  EmptyVersion,
}

/// Errors delivering the final output.
#[derive(Debug, Error)]
pub enum OutputError {
  #[error("build produced no processor binary")]
  MissingBinary,

  #[error("failed to copy processor binary to {}: {source}", to.display())]
  CopyBinary {
    to: PathBuf,
    #[source]
    source: CopyError,
  },
}

/// Any failure of a build. Component errors pass through unchanged.
#[derive(Debug, Error)]
pub enum BuildError {
  #[error("invalid build options: {0}")]
  Options(#[from] OptionsError),

  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error(transparent)]
  Workspace(#[from] WorkspaceError),

  #[error(transparent)]
  Steps(#[from] StepsFailure),

  #[error(transparent)]
  Output(#[from] OutputError),
}

impl BuildError {
  /// Container cleanup results, when the build got as far as the build steps.
  pub fn cleanup(&self) -> Option<&CleanupReport> {
    match self {
      BuildError::Steps(failure) => Some(&failure.cleanup),
      _ => None,
    }
  }

  /// Build log lines leading up to a failed image build.
  pub fn log_tail(&self) -> &[String] {
    match self {
      BuildError::Steps(failure) => failure.error.log_tail(),
      _ => &[],
    }
  }
}

/// What a successful build produced.
#[derive(Debug, Clone)]
pub struct BuildReport {
  pub kind: OutputKind,
  /// Image tag or binary path.
  pub output_name: String,
  pub function_name: String,
  pub handler: String,
  /// Where the binary was delivered, for binary builds.
  pub binary_path: Option<PathBuf>,
  pub pushed: Option<String>,
  /// Steps that ran, in order.
  pub steps: Vec<&'static str>,
  pub cleanup: CleanupReport,
}

/// Builds functions against one container backend.
#[derive(Debug)]
pub struct Builder<B> {
  backend: B,
  orchestrator: OrchestratorConfig,
  layout: WorkspaceLayout,
}

impl<B: ContainerBackend> Builder<B> {
  pub fn new(backend: B) -> Self {
    Self {
      backend,
      orchestrator: OrchestratorConfig::default(),
      layout: WorkspaceLayout::default(),
    }
  }

  pub fn with_orchestrator_config(mut self, config: OrchestratorConfig) -> Self {
    self.orchestrator = config;
    self
  }

  pub fn with_layout(mut self, layout: WorkspaceLayout) -> Self {
    self.layout = layout;
    self
  }

  pub fn backend(&self) -> &B {
    &self.backend
  }

  /// Run one build. The workspace is gone when this returns, unless it was asked to be kept.
  pub async fn build(&self, options: &BuildOptions) -> Result<BuildReport, BuildError> {
    options.validate()?;
    info!(
      function = %options.function_path.display(),
      output = %options.output,
      source = %options.platform_source,
      "building function"
    );

    let config = load_config(&options.function_dir())?;
    let runner = CmdRunner::with_timeout(options.command_timeout);
    let workspace = build_workspace_with_layout(config, options, &runner, &self.layout).await?;

    let orchestrator = Orchestrator::with_config(&self.backend, self.orchestrator.clone());
    let produce_image = options.output == OutputKind::Docker;
    let steps = orchestrator
      .run(&workspace, produce_image, options.push_registry.as_deref())
      .await?;

    let binary_path = match options.output {
      OutputKind::Binary => Some(deliver_binary(&workspace, &steps)?),
      OutputKind::Docker => None,
    };

    info!(kind = %options.output, name = %workspace.output_name(), "build complete");
    Ok(BuildReport {
      kind: options.output,
      output_name: workspace.output_name().to_string(),
      function_name: workspace.config().name.clone(),
      handler: workspace.config().handler.clone(),
      binary_path,
      pushed: steps.pushed,
      steps: steps.completed,
      cleanup: steps.cleanup,
    })
  }
}

/// Resolve the configuration of the function in `function_dir`.
///
/// Without a function descriptor, name and handler are left for discovery,
/// and a build descriptor is still honored.
fn load_config(function_dir: &Path) -> Result<FunctionConfig, ConfigError> {
  let descriptor = function_dir.join(FUNCTION_DESCRIPTOR_FILE);
  let build_descriptor = function_dir.join(BUILD_DESCRIPTOR_FILE);

  if descriptor.is_file() {
    return resolve_config(&descriptor, &build_descriptor);
  }

  debug!(path = %descriptor.display(), "no function descriptor, relying on discovery");
  let mut config = FunctionConfig::default_for_discovery();
  apply_build_descriptor(&mut config, &build_descriptor)?;
  Ok(config)
}

fn deliver_binary(workspace: &Workspace, steps: &StepsReport) -> Result<PathBuf, OutputError> {
  let source = steps.binary_path.as_deref().ok_or(OutputError::MissingBinary)?;
  let target = PathBuf::from(workspace.output_name());

  debug!(from = %source.display(), to = %target.display(), "copying processor binary");
  copy_file(source, &target).map_err(|source| OutputError::CopyBinary {
    to: target.clone(),
    source,
  })?;
  Ok(target)
}
