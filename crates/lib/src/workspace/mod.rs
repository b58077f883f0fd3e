//! The build workspace.
//!
//! A [`Workspace`] is a temporary directory holding a copy of the platform
//! source with the user function placed inside it, ready for the container
//! build. It is created by [`build_workspace`], which runs three steps in
//! order and stops at the first failure:
//!
//! 1. acquire the platform source (local copy or git clone)
//! 2. create the user function path: copy the function, add a placeholder
//!    function descriptor if needed, and generate the registration source
//! 3. write the `.deps` file listing OS packages, if any were requested
//!
//! The directory is deleted when the workspace is dropped, on success and
//! on failure alike, unless the build asked to keep it.

pub mod registry;
pub mod source;

use std::fs;
use std::path::{Component, Path, PathBuf};

use tempfile::TempDir;
use thiserror::Error;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::builder::{BuildOptions, OutputKind};
use crate::cmd::CmdRunner;
use crate::config::FunctionConfig;
use crate::consts::{APP_NAME, BINARY_NAME, DEPS_FILE, FUNCTION_DESCRIPTOR_FILE, OUTPUT_NAME_PREFIX, PLATFORM_MODULE};
use crate::discover::{DiscoveryError, HandlerCandidate, discover_handlers};
use crate::util::fs::{CopyError, copy_dir};

pub use registry::TemplateError;
pub use source::{PlatformSource, SourceError};

use registry::RegistryEntry;

/// Errors that can occur while building the workspace. Each names the step that failed.
#[derive(Debug, Error)]
pub enum WorkspaceError {
  #[error("failed to create workspace directory: {0}")]
  CreateTemp(#[source] std::io::Error),

  #[error("failed to discover handlers: {0}")]
  Discovery(#[from] DiscoveryError),

  #[error("invalid function name {name:?}: must be a single path component")]
  InvalidName { name: String },

  #[error("acquire platform source: {0}")]
  Source(#[from] SourceError),

  #[error("create user function path: failed to create {}: {source}", path.display())]
  CreateFunctionPath {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("create user function path: failed to copy function from {} to {}: {source}", from.display(), to.display())]
  CopyFunction {
    from: PathBuf,
    to: PathBuf,
    #[source]
    source: CopyError,
  },

  #[error("create user function path: failed to create {}: {source}", path.display())]
  Placeholder {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("create user function path: {0}")]
  Template(#[from] TemplateError),

  #[error("generate dependency file: failed to write {}: {source}", path.display())]
  Deps {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// Paths of the platform source tree that the workspace writes into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceLayout {
  /// Name of the platform source directory inside the workspace root.
  pub platform_dir: PathBuf,
  /// Where user functions are copied, relative to the platform root.
  pub user_functions_dir: PathBuf,
  /// Where the registration source is generated, relative to the platform root.
  pub registry_dir: PathBuf,
  /// Go module path of the platform source.
  pub platform_module: String,
}

impl Default for WorkspaceLayout {
  fn default() -> Self {
    Self {
      platform_dir: PathBuf::from("nuclio"),
      user_functions_dir: ["cmd", "processor", "user_functions"].iter().collect(),
      registry_dir: ["cmd", "processor"].iter().collect(),
      platform_module: PLATFORM_MODULE.to_string(),
    }
  }
}

/// A fully prepared build workspace.
#[derive(Debug)]
pub struct Workspace {
  dir: Option<TempDir>,
  keep: bool,
  root: PathBuf,
  platform_dir: PathBuf,
  function_dir: PathBuf,
  output_name: String,
  config: FunctionConfig,
  handler: HandlerCandidate,
}

impl Workspace {
  /// The temporary root directory.
  pub fn root(&self) -> &Path {
    &self.root
  }

  /// The platform source tree inside the root.
  pub fn platform_dir(&self) -> &Path {
    &self.platform_dir
  }

  /// Where the user function was copied inside the platform source.
  pub fn function_dir(&self) -> &Path {
    &self.function_dir
  }

  /// Image tag or binary path the build produces.
  pub fn output_name(&self) -> &str {
    &self.output_name
  }

  pub fn config(&self) -> &FunctionConfig {
    &self.config
  }

  /// The handler the registration source wires in.
  pub fn handler(&self) -> &HandlerCandidate {
    &self.handler
  }

  /// Where the compiled processor binary is extracted to.
  pub fn binary_path(&self) -> PathBuf {
    self.root.join(BINARY_NAME)
  }
}

impl Drop for Workspace {
  fn drop(&mut self) {
    let Some(dir) = self.dir.take() else {
      return;
    };

    if self.keep {
      let path = dir.keep();
      info!(path = %path.display(), "keeping workspace");
      return;
    }

    let path = dir.path().to_path_buf();
    match dir.close() {
      Ok(()) => debug!(path = %path.display(), "removed workspace"),
      Err(err) => warn!(path = %path.display(), error = %err, "failed to remove workspace"),
    }
  }
}

/// Compute the image tag or binary path a build produces.
///
/// An explicit docker name gets `:<version>` unless it already carries a tag;
/// an explicit binary name gets `_<version>`. Without a name one is derived
/// from the function name, and binary outputs are placed under `cwd`.
pub fn output_name(options: &BuildOptions, function_name: &str, cwd: Option<&Path>) -> String {
  let version = &options.version;
  let explicit = options.output_name.as_deref().filter(|name| !name.is_empty());

  match (explicit, options.output) {
    (Some(name), OutputKind::Docker) if name.contains(':') => name.to_string(),
    (Some(name), OutputKind::Docker) => format!("{}:{}", name, version),
    (Some(name), OutputKind::Binary) => format!("{}_{}", name, version),
    (None, OutputKind::Docker) => format!("{}_{}:{}", OUTPUT_NAME_PREFIX, function_name, version),
    (None, OutputKind::Binary) => {
      let name = format!("{}_{}_{}", OUTPUT_NAME_PREFIX, function_name, version);
      match cwd {
        Some(dir) => dir.join(name).to_string_lossy().into_owned(),
        None => name,
      }
    }
  }
}

/// Build a workspace with the default layout.
pub async fn build_workspace(
  config: FunctionConfig,
  options: &BuildOptions,
  runner: &CmdRunner,
) -> Result<Workspace, WorkspaceError> {
  build_workspace_with_layout(config, options, runner, &WorkspaceLayout::default()).await
}

/// Build a workspace.
///
/// Handlers are discovered in the function directory first: an empty
/// handler in `config` is filled with the only discovered handler, and an
/// empty name with that handler's package.
pub async fn build_workspace_with_layout(
  mut config: FunctionConfig,
  options: &BuildOptions,
  runner: &CmdRunner,
  layout: &WorkspaceLayout,
) -> Result<Workspace, WorkspaceError> {
  let function_source = options.function_dir();

  async move {
    let handler = resolve_handler(&mut config, &function_source)?;
    let cwd = std::env::current_dir().ok();
    let output_name = output_name(options, &config.name, cwd.as_deref());

    let dir = tempfile::Builder::new()
      .prefix(&format!("{}-", APP_NAME))
      .tempdir()
      .map_err(WorkspaceError::CreateTemp)?;
    let root = dir.path().to_path_buf();
    let platform_dir = root.join(&layout.platform_dir);
    let function_dir = platform_dir.join(&layout.user_functions_dir).join(&config.name);

    info!(root = %root.display(), output = %output_name, "initializing workspace");

    // from here on a failed step drops the workspace and with it the directory
    let workspace = Workspace {
      dir: Some(dir),
      keep: options.keep_workspace,
      root,
      platform_dir,
      function_dir,
      output_name,
      config,
      handler,
    };

    source::acquire(&options.platform_source, &workspace.platform_dir, runner).await?;
    create_user_function_path(&workspace, &function_source, layout)?;
    create_deps_file(&workspace)?;

    Ok::<_, WorkspaceError>(workspace)
  }
  .instrument(info_span!("env"))
  .await
}

fn resolve_handler(config: &mut FunctionConfig, function_dir: &Path) -> Result<HandlerCandidate, WorkspaceError> {
  let discovery = discover_handlers(function_dir)?;

  let handler = if config.handler.is_empty() {
    let found = discovery.sole_handler()?.clone();
    debug!(handler = %found.name, "using discovered handler");
    config.handler = found.name.clone();
    found
  } else {
    let package = match discovery.package_of(&config.handler) {
      Some(package) => package.to_string(),
      None => {
        warn!(handler = %config.handler, "configured handler was not discovered in the function sources");
        discovery.sole_package()?.to_string()
      }
    };
    HandlerCandidate {
      package,
      name: config.handler.clone(),
    }
  };

  if config.name.is_empty() {
    debug!(name = %handler.package, "using package name as function name");
    config.name = handler.package.clone();
  }
  if !is_plain_name(&config.name) {
    return Err(WorkspaceError::InvalidName {
      name: config.name.clone(),
    });
  }

  Ok(handler)
}

/// The function name becomes a directory and a file name inside the workspace.
fn is_plain_name(name: &str) -> bool {
  let mut components = Path::new(name).components();
  match (components.next(), components.next()) {
    (Some(Component::Normal(part)), None) => part == name,
    _ => false,
  }
}

fn create_user_function_path(
  workspace: &Workspace,
  function_source: &Path,
  layout: &WorkspaceLayout,
) -> Result<(), WorkspaceError> {
  let user_functions = workspace.platform_dir.join(&layout.user_functions_dir);
  debug!(path = %user_functions.display(), "creating user function path");
  create_dir_like(&user_functions, &workspace.platform_dir).map_err(|source| WorkspaceError::CreateFunctionPath {
    path: user_functions.clone(),
    source,
  })?;

  debug!(from = %function_source.display(), to = %workspace.function_dir.display(), "copying user function");
  copy_dir(function_source, &workspace.function_dir).map_err(|source| WorkspaceError::CopyFunction {
    from: function_source.to_path_buf(),
    to: workspace.function_dir.clone(),
    source,
  })?;

  // the output image copies the descriptor unconditionally
  let descriptor = workspace.function_dir.join(FUNCTION_DESCRIPTOR_FILE);
  if !descriptor.exists() {
    debug!(path = %descriptor.display(), "function descriptor missing, creating placeholder");
    fs::File::create(&descriptor).map_err(|source| WorkspaceError::Placeholder {
      path: descriptor.clone(),
      source,
    })?;
  }

  let user_functions_dir = slash_path(&layout.user_functions_dir);
  let entry = RegistryEntry {
    function_name: &workspace.config.name,
    package: &workspace.handler.package,
    handler: &workspace.handler.name,
    platform_module: &layout.platform_module,
    user_functions_dir: &user_functions_dir,
  };
  registry::write_registry(&workspace.platform_dir.join(&layout.registry_dir), &entry)?;

  Ok(())
}

fn create_deps_file(workspace: &Workspace) -> Result<(), WorkspaceError> {
  let packages = &workspace.config.packages;
  if packages.is_empty() {
    return Ok(());
  }

  let path = workspace.platform_dir.join(DEPS_FILE);
  debug!(path = %path.display(), packages = ?packages, "writing deps file");

  let mut content = String::new();
  for package in packages {
    content.push_str(package);
    content.push('\n');
  }
  fs::write(&path, content).map_err(|source| WorkspaceError::Deps { path, source })
}

/// Create `path` and missing parents with the permission bits of `like`.
#[cfg(unix)]
fn create_dir_like(path: &Path, like: &Path) -> std::io::Result<()> {
  use std::os::unix::fs::{DirBuilderExt, PermissionsExt};

  let mode = fs::metadata(like)?.permissions().mode();
  fs::DirBuilder::new().recursive(true).mode(mode).create(path)
}

#[cfg(not(unix))]
fn create_dir_like(path: &Path, like: &Path) -> std::io::Result<()> {
  fs::metadata(like)?;
  fs::create_dir_all(path)
}

/// Render a relative path with `/` separators, as Go import paths need.
fn slash_path(path: &Path) -> String {
  path
    .components()
    .filter_map(|c| match c {
      Component::Normal(part) => Some(part.to_string_lossy()),
      _ => None,
    })
    .collect::<Vec<_>>()
    .join("/")
}
