//! Container build orchestration.
//!
//! Runs the image builds that turn a prepared [`Workspace`] into a compiled
//! processor binary and, optionally, an output image:
//!
//! 1. the on-build image, providing the toolchain
//! 2. the builder image, which compiles the platform source with the user
//!    function; the binary is then copied out of a container created from it
//! 3. the output image, when one is wanted
//! 4. a push of the output image, when a registry is given
//!
//! Steps run strictly in order and the first failure stops the run. Stale
//! containers of the builder image are removed before the builder step and
//! again after the run, whatever its outcome; the results are reported in a
//! [`CleanupReport`] instead of failing the build.

pub mod types;

use std::path::{Path, PathBuf};

use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::backend::{BackendError, BuildLogMonitor, BuildRequest, ContainerBackend};
use crate::extract::extract_binary_or_log;
use crate::util::fs::{copy_file, copy_top_level_files};
use crate::workspace::Workspace;

pub use types::{
  BuildStep, BuildStepError, CleanupFailure, CleanupReport, OrchestratorConfig, StepKind, StepsFailure, StepsReport,
};

/// Drives the build steps against a container backend.
#[derive(Debug)]
pub struct Orchestrator<'a, B> {
  backend: &'a B,
  config: OrchestratorConfig,
}

impl<'a, B: ContainerBackend> Orchestrator<'a, B> {
  pub fn new(backend: &'a B) -> Self {
    Self::with_config(backend, OrchestratorConfig::default())
  }

  pub fn with_config(backend: &'a B, config: OrchestratorConfig) -> Self {
    Self { backend, config }
  }

  pub fn config(&self) -> &OrchestratorConfig {
    &self.config
  }

  /// The ordered steps a run would execute.
  ///
  /// A push registry is ignored unless an image is produced.
  pub fn plan(&self, produce_image: bool, push_registry: Option<&str>) -> Vec<BuildStep> {
    let mut steps = vec![BuildStep::from(StepKind::OnBuildImage), BuildStep::from(StepKind::BuilderImage)];

    if produce_image {
      steps.push(StepKind::OutputImage.into());
      if let Some(registry) = push_registry.filter(|r| !r.is_empty()) {
        steps.push(
          StepKind::PushImage {
            registry: registry.to_string(),
          }
          .into(),
        );
      }
    }

    steps
  }

  /// Execute the plan for `workspace`.
  pub async fn run(
    &self,
    workspace: &Workspace,
    produce_image: bool,
    push_registry: Option<&str>,
  ) -> Result<StepsReport, StepsFailure> {
    let plan = self.plan(produce_image, push_registry);
    info!(steps = plan.len(), "running build steps");

    let mut report = StepsReport::default();
    let mut failure = None;

    for step in &plan {
      info!(step = step.label, "running build step");
      let result = self
        .run_step(step, workspace, &mut report)
        .instrument(info_span!("step", label = step.label))
        .await;

      match result {
        Ok(()) => report.completed.push(step.label),
        Err(err) => {
          error!(step = step.label, error = %err, "build step failed");
          failure = Some(err);
          break;
        }
      }
    }

    let sweep = self.sweep_builder_containers().await;
    report.cleanup.merge(sweep);
    if !report.cleanup.is_clean() {
      warn!(cleanup = %report.cleanup, "container cleanup was incomplete");
    }

    match failure {
      None => Ok(report),
      Some(error) => Err(StepsFailure {
        error,
        completed: report.completed,
        cleanup: report.cleanup,
      }),
    }
  }

  async fn run_step(
    &self,
    step: &BuildStep,
    workspace: &Workspace,
    report: &mut StepsReport,
  ) -> Result<(), BuildStepError> {
    let platform = workspace.platform_dir();

    match &step.kind {
      StepKind::OnBuildImage => {
        let context = platform.join(&self.config.onbuild_context);
        self
          .build(step.label, &context, None, &self.config.onbuild_image)
          .await
      }

      StepKind::BuilderImage => {
        let sweep = self.sweep_builder_containers().await;
        report.cleanup.merge(sweep);

        self
          .build(
            step.label,
            platform,
            Some(self.config.builder_dockerfile.as_path()),
            &self.config.builder_image,
          )
          .await?;

        let binary = self.extract(step.label, workspace, &mut report.cleanup).await?;
        report.binary_path = Some(binary);
        Ok(())
      }

      StepKind::OutputImage => {
        let binary = report.binary_path.clone().unwrap_or_else(|| workspace.binary_path());
        self.stage_output_context(step.label, workspace, &binary)?;

        let dockerfile = if workspace.config().has_packages() {
          &self.config.packages_dockerfile
        } else {
          &self.config.minimal_dockerfile
        };
        self
          .build(step.label, platform, Some(dockerfile.as_path()), workspace.output_name())
          .await?;

        report.image = Some(workspace.output_name().to_string());
        Ok(())
      }

      StepKind::PushImage { registry } => {
        let image = workspace.output_name();
        let target = format!("{}/{}", registry.trim_end_matches('/'), image);
        info!(from = image, to = %target, "pushing image");

        let backend_error = |source: BackendError| BuildStepError::Backend {
          label: step.label,
          source,
          log_tail: Vec::new(),
        };
        self.backend.tag_image(image, &target).await.map_err(backend_error)?;
        self.backend.push_image(&target).await.map_err(backend_error)?;

        report.pushed = Some(target);
        Ok(())
      }
    }
  }

  /// Build one image, failing on a structured error in its log or an unsuccessful exit.
  async fn build(
    &self,
    label: &'static str,
    context: &Path,
    dockerfile: Option<&Path>,
    tag: &str,
  ) -> Result<(), BuildStepError> {
    debug!(image = tag, context = %context.display(), "building image");

    let mut monitor = BuildLogMonitor::with_capacity(self.config.log_tail_lines);
    let request = BuildRequest {
      context,
      dockerfile,
      tag,
    };
    let result = self
      .backend
      .build_image(&request, &mut |line: &str| monitor.feed(line))
      .await;

    if let Some(message) = monitor.error() {
      return Err(BuildStepError::BuildLog {
        label,
        image: tag.to_string(),
        message: message.to_string(),
        log_tail: monitor.tail(),
      });
    }
    result.map_err(|source| BuildStepError::Backend {
      label,
      source,
      log_tail: monitor.tail(),
    })?;

    info!(image = tag, lines = monitor.lines_seen(), "built image");
    Ok(())
  }

  /// Copy the compiled binary out of a fresh builder container, then remove the container.
  async fn extract(
    &self,
    label: &'static str,
    workspace: &Workspace,
    cleanup: &mut CleanupReport,
  ) -> Result<PathBuf, BuildStepError> {
    let container_id = self
      .backend
      .create_container(&self.config.builder_image)
      .await
      .map_err(|source| BuildStepError::Backend {
        label,
        source,
        log_tail: Vec::new(),
      })?;

    let extracted = extract_binary_or_log(
      self.backend,
      &container_id,
      &self.config.binary_path_in_container,
      &self.config.build_log_in_container,
      workspace.root(),
    )
    .await;

    self.remove_container(&container_id, cleanup).await;

    let binary = extracted.map_err(|source| BuildStepError::Extraction { label, source })?;
    info!(binary = %binary.display(), "extracted processor binary");
    Ok(binary)
  }

  /// Put the binary and the function's top-level files where the output Dockerfiles expect them.
  fn stage_output_context(&self, label: &'static str, workspace: &Workspace, binary: &Path) -> Result<(), BuildStepError> {
    let platform = workspace.platform_dir();
    let context_error = |source| BuildStepError::Context { label, source };

    let binary_target = platform
      .join(&self.config.output_binary_dir)
      .join(binary.file_name().unwrap_or_default());
    debug!(from = %binary.display(), to = %binary_target.display(), "staging binary");
    copy_file(binary, &binary_target).map_err(context_error)?;

    let copied = copy_top_level_files(workspace.function_dir(), platform).map_err(context_error)?;
    debug!(files = copied.len(), "staged function files");
    Ok(())
  }

  /// Remove every container created from the builder image. Never fails.
  async fn sweep_builder_containers(&self) -> CleanupReport {
    let image = &self.config.builder_image;
    let mut report = CleanupReport::default();

    let ids = match self.backend.list_containers(image).await {
      Ok(ids) => ids,
      Err(err) => {
        warn!(image = %image, error = %err, "can't list containers");
        report.failures.push(CleanupFailure {
          container_id: None,
          message: err.to_string(),
        });
        return report;
      }
    };

    for id in ids {
      self.remove_container(&id, &mut report).await;
    }
    report
  }

  async fn remove_container(&self, container_id: &str, report: &mut CleanupReport) {
    info!(id = container_id, "deleting container");
    match self.backend.remove_container(container_id).await {
      Ok(()) => report.removed.push(container_id.to_string()),
      Err(err) => {
        warn!(id = container_id, error = %err, "can't delete container");
        report.failures.push(CleanupFailure {
          container_id: Some(container_id.to_string()),
          message: err.to_string(),
        });
      }
    }
  }
}
