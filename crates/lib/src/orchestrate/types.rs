//! Types for the container build orchestrator.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::backend::BackendError;
use crate::backend::log::DEFAULT_TAIL_LINES;
use crate::consts::{BINARY_NAME, BUILDER_IMAGE, ONBUILD_IMAGE};
use crate::extract::ExtractionError;
use crate::util::fs::CopyError;

/// Image names and paths the build steps use.
///
/// Paths are relative to the platform source tree unless noted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
  pub onbuild_image: String,
  /// Build context of the on-build image.
  pub onbuild_context: PathBuf,
  /// Constant tag of the builder image; stale containers are swept by it.
  pub builder_image: String,
  pub builder_dockerfile: PathBuf,
  /// Output image Dockerfile used when OS packages were requested.
  pub packages_dockerfile: PathBuf,
  /// Output image Dockerfile used otherwise.
  pub minimal_dockerfile: PathBuf,
  /// Absolute path of the compiled binary inside the builder container.
  pub binary_path_in_container: String,
  /// Absolute path of the compile log inside the builder container.
  pub build_log_in_container: String,
  /// Where the output image build expects the binary.
  pub output_binary_dir: PathBuf,
  /// Build log lines kept for error reports.
  pub log_tail_lines: usize,
}

impl Default for OrchestratorConfig {
  fn default() -> Self {
    let build_dir: PathBuf = ["hack", "processor", "build"].iter().collect();
    Self {
      onbuild_image: ONBUILD_IMAGE.to_string(),
      onbuild_context: build_dir.join("onbuild"),
      builder_image: BUILDER_IMAGE.to_string(),
      builder_dockerfile: build_dir.join("builder").join("Dockerfile"),
      packages_dockerfile: build_dir.join("Dockerfile.jessie"),
      minimal_dockerfile: build_dir.join("Dockerfile.alpine"),
      binary_path_in_container: format!("/go/bin/{}", BINARY_NAME),
      build_log_in_container: "/processor_build.log".to_string(),
      output_binary_dir: PathBuf::from("bin"),
      log_tail_lines: DEFAULT_TAIL_LINES,
    }
  }
}

/// What a build step does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepKind {
  OnBuildImage,
  /// Build the builder image and extract the compiled binary from it.
  BuilderImage,
  OutputImage,
  PushImage { registry: String },
}

impl StepKind {
  pub fn label(&self) -> &'static str {
    match self {
      StepKind::OnBuildImage => "create onbuild image",
      StepKind::BuilderImage => "create builder image",
      StepKind::OutputImage => "create processor image",
      StepKind::PushImage { .. } => "push processor image",
    }
  }
}

/// One entry of the execution plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildStep {
  pub label: &'static str,
  pub kind: StepKind,
}

impl From<StepKind> for BuildStep {
  fn from(kind: StepKind) -> Self {
    Self {
      label: kind.label(),
      kind,
    }
  }
}

/// A container cleanup that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupFailure {
  /// `None` when the containers could not even be listed.
  pub container_id: Option<String>,
  pub message: String,
}

/// Outcome of the best-effort container cleanup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
  pub removed: Vec<String>,
  pub failures: Vec<CleanupFailure>,
}

impl CleanupReport {
  pub fn is_clean(&self) -> bool {
    self.failures.is_empty()
  }

  pub fn merge(&mut self, other: CleanupReport) {
    self.removed.extend(other.removed);
    self.failures.extend(other.failures);
  }
}

impl fmt::Display for CleanupReport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{} container(s) removed, {} cleanup failure(s)",
      self.removed.len(),
      self.failures.len()
    )
  }
}

/// Result of a successful run of the build steps.
#[derive(Debug, Clone, Default)]
pub struct StepsReport {
  /// Labels of the steps that ran, in order.
  pub completed: Vec<&'static str>,
  /// The binary extracted from the builder container.
  pub binary_path: Option<PathBuf>,
  /// Tag of the output image, if one was built.
  pub image: Option<String>,
  /// Registry reference the image was pushed to.
  pub pushed: Option<String>,
  pub cleanup: CleanupReport,
}

/// A build step failed. The label names the step.
#[derive(Debug, Error)]
pub enum BuildStepError {
  #[error("{label}: build of {image} reported an error: {message}{}", format_tail(log_tail))]
  BuildLog {
    label: &'static str,
    image: String,
    message: String,
    log_tail: Vec<String>,
  },

  #[error("{label}: {source}{}", format_tail(log_tail))]
  Backend {
    label: &'static str,
    #[source]
    source: BackendError,
    log_tail: Vec<String>,
  },

  #[error("{label}: {source}")]
  Extraction {
    label: &'static str,
    #[source]
    source: ExtractionError,
  },

  #[error("{label}: failed to prepare build context: {source}")]
  Context {
    label: &'static str,
    #[source]
    source: CopyError,
  },
}

impl BuildStepError {
  pub fn label(&self) -> &'static str {
    match self {
      BuildStepError::BuildLog { label, .. }
      | BuildStepError::Backend { label, .. }
      | BuildStepError::Extraction { label, .. }
      | BuildStepError::Context { label, .. } => label,
    }
  }

  /// The last build log lines seen before the failure.
  pub fn log_tail(&self) -> &[String] {
    match self {
      BuildStepError::BuildLog { log_tail, .. } | BuildStepError::Backend { log_tail, .. } => log_tail,
      _ => &[],
    }
  }
}

fn format_tail(tail: &[String]) -> String {
  if tail.is_empty() {
    return String::new();
  }
  format!("\nlast build log lines:\n  {}", tail.join("\n  "))
}

/// The build steps stopped at a failing step. Cleanup still ran.
#[derive(Debug, Error)]
#[error("build steps failed: {error}")]
pub struct StepsFailure {
  #[source]
  pub error: BuildStepError,
  /// Labels of the steps that completed before the failure.
  pub completed: Vec<&'static str>,
  pub cleanup: CleanupReport,
}
