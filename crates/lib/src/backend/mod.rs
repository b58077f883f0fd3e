//! Container backend surface.
//!
//! The orchestrator and the extractor only talk to a [`ContainerBackend`],
//! so any implementation offering image builds, container create / copy /
//! list / remove and image tag / push can drive a build. [`DockerCli`] is
//! the production implementation; tests substitute scripted ones.

pub mod docker;
pub mod log;

use std::path::Path;

use thiserror::Error;

use crate::cmd::CmdError;

pub use docker::DockerCli;
pub use log::BuildLogMonitor;

/// Errors reported by a container backend.
#[derive(Debug, Error)]
pub enum BackendError {
  /// The backend cannot be reached at all.
  #[error("no container backend available: {source}")]
  Unavailable {
    #[source]
    source: CmdError,
  },

  /// A backend operation failed.
  #[error("{operation} failed: {source}")]
  Command {
    operation: &'static str,
    #[source]
    source: CmdError,
  },

  /// The backend answered, but not in a shape we understand.
  #[error("unexpected output from {operation}: {output:?}")]
  UnexpectedOutput { operation: &'static str, output: String },
}

/// One image build.
#[derive(Debug, Clone, Copy)]
pub struct BuildRequest<'a> {
  /// Build context directory.
  pub context: &'a Path,
  /// Dockerfile relative to the context; the backend default when `None`.
  pub dockerfile: Option<&'a Path>,
  /// Tag of the resulting image.
  pub tag: &'a str,
}

/// The operations a build needs from a container engine.
#[allow(async_fn_in_trait)]
pub trait ContainerBackend {
  /// Build an image, handing every build log line to `on_line` as it arrives.
  async fn build_image(&self, request: &BuildRequest<'_>, on_line: &mut dyn FnMut(&str)) -> Result<(), BackendError>;

  /// Create (but do not start) a container from `image`. Returns its id.
  async fn create_container(&self, image: &str) -> Result<String, BackendError>;

  /// Read `path` out of a container as a tar archive.
  async fn copy_from_container(&self, container_id: &str, path: &str) -> Result<Vec<u8>, BackendError>;

  /// Ids of all containers, running or not, created from `image`.
  async fn list_containers(&self, image: &str) -> Result<Vec<String>, BackendError>;

  async fn remove_container(&self, container_id: &str) -> Result<(), BackendError>;

  async fn tag_image(&self, source: &str, target: &str) -> Result<(), BackendError>;

  async fn push_image(&self, image: &str) -> Result<(), BackendError>;
}
