//! Test utilities for procbuild-lib.
//!
//! Provides an on-disk fixture (platform source plus one function) and a
//! scripted [`ContainerBackend`] that records every call instead of talking
//! to a container engine.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use tempfile::TempDir;

use crate::backend::{BackendError, BuildRequest, ContainerBackend};
use crate::builder::{BuildOptions, OutputKind};
use crate::cmd::{CmdError, CmdRunner};
use crate::config::FunctionConfig;
use crate::workspace::{PlatformSource, Workspace, build_workspace};

pub const HANDLER_SOURCE: &str = r#"package echo

import "github.com/nuclio/nuclio-sdk"

func Echo(context *nuclio.Context, event nuclio.Event) (interface{}, error) {
	return event.GetBody(), nil
}

func echo(context *nuclio.Context, event nuclio.Event) (interface{}, error) {
	return nil, nil
}
"#;

/// A platform source tree and a function directory in one temporary directory.
pub struct Fixture {
  pub temp: TempDir,
}

impl Fixture {
  pub fn new() -> Self {
    let temp = TempDir::new().unwrap();
    let platform = temp.path().join("platform");
    fs::create_dir_all(platform.join("hack/processor/build/onbuild")).unwrap();
    fs::create_dir_all(platform.join("hack/processor/build/builder")).unwrap();
    fs::write(platform.join("go.mod"), "module github.com/nuclio/nuclio\n").unwrap();

    let function = temp.path().join("function");
    fs::create_dir_all(&function).unwrap();
    fs::write(function.join("echo.go"), HANDLER_SOURCE).unwrap();

    Self { temp }
  }

  pub fn platform_dir(&self) -> PathBuf {
    self.temp.path().join("platform")
  }

  pub fn function_dir(&self) -> PathBuf {
    self.temp.path().join("function")
  }

  pub fn options(&self, output: OutputKind) -> BuildOptions {
    let mut options = BuildOptions::new(self.function_dir());
    options.output = output;
    options.platform_source = PlatformSource::LocalDir(self.platform_dir());
    options
  }

  pub async fn workspace(&self, options: &BuildOptions, packages: &[&str]) -> Workspace {
    let config = FunctionConfig {
      name: "echo".to_string(),
      packages: packages.iter().map(|p| p.to_string()).collect(),
      ..FunctionConfig::default_for_discovery()
    };
    build_workspace(config, options, &CmdRunner::new()).await.unwrap()
  }
}

/// A tar archive holding one regular file.
pub fn tar_with_file(name: &str, contents: &[u8], mode: u32) -> Vec<u8> {
  let mut builder = tar::Builder::new(Vec::new());
  let mut header = tar::Header::new_gnu();
  header.set_path(name).unwrap();
  header.set_size(contents.len() as u64);
  header.set_mode(mode);
  header.set_entry_type(tar::EntryType::Regular);
  header.set_cksum();
  builder.append(&header, contents).unwrap();
  builder.into_inner().unwrap()
}

fn failure(operation: &'static str, cmd: String) -> BackendError {
  BackendError::Command {
    operation,
    source: CmdError::Failed {
      cmd,
      code: Some(1),
      output: "scripted failure".to_string(),
    },
  }
}

/// A [`ContainerBackend`] that replays canned answers and records every call.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
  files: HashMap<String, Vec<u8>>,
  build_logs: HashMap<String, Vec<String>>,
  failing_builds: HashSet<String>,
  failing_removals: HashSet<String>,
  list_fails: bool,
  containers: Mutex<Vec<String>>,
  created: Mutex<usize>,
  calls: Mutex<Vec<String>>,
}

impl ScriptedBackend {
  pub fn new() -> Self {
    Self::default()
  }

  /// Answer copies of `path` with `archive`.
  pub fn with_file(mut self, path: &str, archive: Vec<u8>) -> Self {
    self.files.insert(path.to_string(), archive);
    self
  }

  /// Emit `lines` while building `tag`.
  pub fn with_build_log(mut self, tag: &str, lines: &[&str]) -> Self {
    self
      .build_logs
      .insert(tag.to_string(), lines.iter().map(|l| l.to_string()).collect());
    self
  }

  /// Make the build of `tag` exit unsuccessfully.
  pub fn with_failing_build(mut self, tag: &str) -> Self {
    self.failing_builds.insert(tag.to_string());
    self
  }

  /// Pretend these containers already exist.
  pub fn with_containers(self, ids: &[&str]) -> Self {
    self
      .containers
      .lock()
      .unwrap()
      .extend(ids.iter().map(|id| id.to_string()));
    self
  }

  pub fn with_failing_removal(mut self, id: &str) -> Self {
    self.failing_removals.insert(id.to_string());
    self
  }

  pub fn with_failing_list(mut self) -> Self {
    self.list_fails = true;
    self
  }

  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }

  pub fn containers(&self) -> Vec<String> {
    self.containers.lock().unwrap().clone()
  }

  fn record(&self, call: String) {
    self.calls.lock().unwrap().push(call);
  }
}

impl ContainerBackend for ScriptedBackend {
  async fn build_image(&self, request: &BuildRequest<'_>, on_line: &mut dyn FnMut(&str)) -> Result<(), BackendError> {
    let dockerfile = request
      .dockerfile
      .map(|d| d.display().to_string())
      .unwrap_or_else(|| "-".to_string());
    self.record(format!("build {} {}", request.tag, dockerfile));

    for line in self.build_logs.get(request.tag).into_iter().flatten() {
      on_line(line);
    }

    if self.failing_builds.contains(request.tag) {
      return Err(failure("image build", format!("build {}", request.tag)));
    }
    Ok(())
  }

  async fn create_container(&self, image: &str) -> Result<String, BackendError> {
    self.record(format!("create {}", image));
    let mut created = self.created.lock().unwrap();
    *created += 1;
    let id = format!("container-{}", created);
    self.containers.lock().unwrap().push(id.clone());
    Ok(id)
  }

  async fn copy_from_container(&self, container_id: &str, path: &str) -> Result<Vec<u8>, BackendError> {
    self.record(format!("cp {}:{}", container_id, path));
    self
      .files
      .get(path)
      .cloned()
      .ok_or_else(|| failure("container copy", format!("cp {}:{}", container_id, path)))
  }

  async fn list_containers(&self, image: &str) -> Result<Vec<String>, BackendError> {
    self.record(format!("ps {}", image));
    if self.list_fails {
      return Err(failure("container list", format!("ps {}", image)));
    }
    Ok(self.containers())
  }

  async fn remove_container(&self, container_id: &str) -> Result<(), BackendError> {
    self.record(format!("rm {}", container_id));
    if self.failing_removals.contains(container_id) {
      return Err(failure("container remove", format!("rm {}", container_id)));
    }
    self.containers.lock().unwrap().retain(|id| id != container_id);
    Ok(())
  }

  async fn tag_image(&self, source: &str, target: &str) -> Result<(), BackendError> {
    self.record(format!("tag {} {}", source, target));
    Ok(())
  }

  async fn push_image(&self, image: &str) -> Result<(), BackendError> {
    self.record(format!("push {}", image));
    Ok(())
  }
}
