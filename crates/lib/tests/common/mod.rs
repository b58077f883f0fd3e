//! Shared fixtures for the procbuild-lib integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use procbuild_lib::backend::{BackendError, BuildRequest, ContainerBackend};
use procbuild_lib::cmd::CmdError;

pub const ECHO_HANDLER: &str = r#"package echo

import "github.com/nuclio/nuclio-sdk"

// Echo returns the event body.
func Echo(context *nuclio.Context, event nuclio.Event) (interface{}, error) {
	return event.GetBody(), nil
}

func echo(context *nuclio.Context, event nuclio.Event) (interface{}, error) {
	return nil, nil
}
"#;

/// Lay out a platform source tree and a function directory under `root`.
pub fn layout(root: &Path) -> (PathBuf, PathBuf) {
  let platform = root.join("nuclio-src");
  fs::create_dir_all(platform.join("hack/processor/build/onbuild")).unwrap();
  fs::write(platform.join("go.mod"), "module github.com/nuclio/nuclio\n").unwrap();

  let function = root.join("echo");
  fs::create_dir_all(&function).unwrap();
  fs::write(function.join("echo.go"), ECHO_HANDLER).unwrap();

  (platform, function)
}

/// A backend standing in for docker: builds succeed and the builder
/// container holds `binary` at `/go/bin/processor`.
pub struct FakeDocker {
  binary: Vec<u8>,
  mode: u32,
  calls: Mutex<Vec<String>>,
}

impl FakeDocker {
  pub fn new(binary: &[u8], mode: u32) -> Self {
    Self {
      binary: binary.to_vec(),
      mode,
      calls: Mutex::new(Vec::new()),
    }
  }

  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }

  fn record(&self, call: String) {
    self.calls.lock().unwrap().push(call);
  }

  fn archive(&self) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_path("processor").unwrap();
    header.set_size(self.binary.len() as u64);
    header.set_mode(self.mode);
    header.set_entry_type(tar::EntryType::Regular);
    header.set_cksum();
    builder.append(&header, self.binary.as_slice()).unwrap();
    builder.into_inner().unwrap()
  }
}

impl ContainerBackend for FakeDocker {
  async fn build_image(&self, request: &BuildRequest<'_>, on_line: &mut dyn FnMut(&str)) -> Result<(), BackendError> {
    self.record(format!("build {}", request.tag));
    on_line(&format!(r#"{{"stream":"Successfully tagged {}\n"}}"#, request.tag));
    Ok(())
  }

  async fn create_container(&self, image: &str) -> Result<String, BackendError> {
    self.record(format!("create {}", image));
    Ok("c0ffee".to_string())
  }

  async fn copy_from_container(&self, container_id: &str, path: &str) -> Result<Vec<u8>, BackendError> {
    self.record(format!("cp {}:{}", container_id, path));
    if path == "/go/bin/processor" {
      return Ok(self.archive());
    }
    Err(BackendError::Command {
      operation: "container copy",
      source: CmdError::Failed {
        cmd: format!("docker cp {}:{} -", container_id, path),
        code: Some(1),
        output: format!("Could not find the file {} in container {}", path, container_id),
      },
    })
  }

  async fn list_containers(&self, image: &str) -> Result<Vec<String>, BackendError> {
    self.record(format!("ps {}", image));
    Ok(Vec::new())
  }

  async fn remove_container(&self, container_id: &str) -> Result<(), BackendError> {
    self.record(format!("rm {}", container_id));
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
