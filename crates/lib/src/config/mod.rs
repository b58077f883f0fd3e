//! Function configuration resolution.
//!
//! A function is described by two YAML documents:
//!
//! - the function descriptor (`processor.yaml`), whose fields live under a
//!   `function:` key and may carry a nested `build:` section
//! - the optional build descriptor (`build.yaml`), with `image` and
//!   `packages` at the top level
//!
//! They are merged into one [`FunctionConfig`]: defaults first, then the
//! descriptor's `build` section, then the build descriptor.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::consts::DEFAULT_BUILD_IMAGE;

/// Errors that can occur while resolving a function configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("configuration file not found: {}", path.display())]
  NotFound { path: PathBuf },

  #[error("failed to read {}: {source}", path.display())]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse {}: {source}", path.display())]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_yaml::Error,
  },

  #[error("configuration file {} has no '{key}' section", path.display())]
  MissingSection { path: PathBuf, key: &'static str },
}

/// The resolved configuration of one function build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionConfig {
  /// Function name; also the directory name of the copied function.
  pub name: String,
  /// Entry-point handler identifier. Empty until discovered when not configured.
  pub handler: String,
  /// Base image of the output image.
  pub image: String,
  /// OS packages to install in the output image.
  pub packages: Vec<String>,
}

impl FunctionConfig {
  /// A configuration with nothing known yet except build defaults.
  ///
  /// Used when a function directory has no function descriptor: name and
  /// handler are then taken from handler discovery.
  pub fn default_for_discovery() -> Self {
    Self {
      name: String::new(),
      handler: String::new(),
      image: DEFAULT_BUILD_IMAGE.to_string(),
      packages: Vec::new(),
    }
  }

  /// Whether OS packages were requested.
  pub fn has_packages(&self) -> bool {
    !self.packages.is_empty()
  }

  /// Apply a build section on top of this configuration. Present fields win.
  pub fn apply_build(&mut self, build: &BuildDescriptor) {
    if let Some(image) = build.image.as_deref().filter(|i| !i.is_empty()) {
      self.image = image.to_string();
    }
    if let Some(packages) = &build.packages {
      self.packages = packages.clone();
    }
  }
}

/// The `build` section: either nested in the function descriptor or the whole build descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BuildDescriptor {
  #[serde(default)]
  pub image: Option<String>,
  #[serde(default)]
  pub packages: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct FunctionDescriptor {
  function: Option<FunctionSection>,
}

#[derive(Debug, Deserialize)]
struct FunctionSection {
  #[serde(default)]
  name: String,
  #[serde(default)]
  handler: String,
  #[serde(default)]
  build: Option<BuildDescriptor>,
}

/// Resolve the configuration of a function from its descriptor files.
///
/// The function descriptor must exist and contain a `function` section. The
/// build descriptor is optional; when absent the build image defaults to
/// [`DEFAULT_BUILD_IMAGE`] unless the descriptor's own `build` section sets one.
pub fn resolve_config(function_descriptor: &Path, build_descriptor: &Path) -> Result<FunctionConfig, ConfigError> {
  let descriptor: FunctionDescriptor = read_yaml(function_descriptor)?;
  let section = descriptor.function.ok_or_else(|| ConfigError::MissingSection {
    path: function_descriptor.to_path_buf(),
    key: "function",
  })?;

  let mut config = FunctionConfig::default_for_discovery();
  config.name = section.name;
  config.handler = section.handler;
  if let Some(build) = &section.build {
    config.apply_build(build);
  }

  apply_build_descriptor(&mut config, build_descriptor)?;

  debug!(
    name = %config.name,
    handler = %config.handler,
    image = %config.image,
    packages = config.packages.len(),
    "resolved function configuration"
  );
  Ok(config)
}

/// Apply the build descriptor at `path` to `config` if the file exists.
pub fn apply_build_descriptor(config: &mut FunctionConfig, path: &Path) -> Result<(), ConfigError> {
  if !path.is_file() {
    debug!(path = %path.display(), "no build descriptor");
    return Ok(());
  }

  let build: BuildDescriptor = read_yaml(path)?;
  config.apply_build(&build);
  Ok(())
}

fn read_yaml<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ConfigError> {
  let content = fs::read_to_string(path).map_err(|source| {
    if source.kind() == std::io::ErrorKind::NotFound {
      ConfigError::NotFound {
        path: path.to_path_buf(),
      }
    } else {
      ConfigError::Read {
        path: path.to_path_buf(),
        source,
      }
    }
  })?;

  serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
    path: path.to_path_buf(),
    source,
  })
}
