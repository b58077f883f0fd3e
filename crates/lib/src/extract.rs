//! Artifact extraction from builder containers.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use tar::{Archive, EntryType};
use thiserror::Error;
use tracing::{debug, warn};

use crate::backend::{BackendError, ContainerBackend};

#[derive(Debug, Error)]
pub enum ExtractionError {
  #[error("failed to copy {path} out of container {container_id}: {source}")]
  Copy {
    container_id: String,
    path: String,
    #[source]
    source: BackendError,
  },

  #[error("failed to unpack {path} from container {container_id} into {}: {source}", dest.display())]
  Unpack {
    container_id: String,
    path: String,
    dest: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("refusing archive entry {} of {path} from container {container_id}", entry.display())]
  UnsafeEntry {
    container_id: String,
    path: String,
    entry: PathBuf,
  },

  #[error("archive of {path} from container {container_id} holds no file")]
  Empty { container_id: String, path: String },

  /// The artifact is missing and the container's build log explains why.
  #[error("{source}\nbuild log:\n{log}")]
  WithBuildLog {
    log: String,
    #[source]
    source: Box<ExtractionError>,
  },
}

/// Copy `path` out of a container and unpack it into `dest_dir`.
///
/// Directory entries are recreated with their mode bits, regular files are
/// written with truncation and keep theirs. Returns the first regular file
/// unpacked, which for a single-file `path` is the file itself.
pub async fn extract_binary<B: ContainerBackend>(
  backend: &B,
  container_id: &str,
  path: &str,
  dest_dir: &Path,
) -> Result<PathBuf, ExtractionError> {
  debug!(container = container_id, path, dest = %dest_dir.display(), "copying from container");

  let archive = backend
    .copy_from_container(container_id, path)
    .await
    .map_err(|source| ExtractionError::Copy {
      container_id: container_id.to_string(),
      path: path.to_string(),
      source,
    })?;

  let files = unpack(&archive, dest_dir).map_err(|err| err.located(container_id, path, dest_dir))?;
  files.into_iter().next().ok_or_else(|| ExtractionError::Empty {
    container_id: container_id.to_string(),
    path: path.to_string(),
  })
}

/// Like [`extract_binary`], but when the artifact cannot be extracted, read
/// `log_path` from the same container and attach its contents to the error.
pub async fn extract_binary_or_log<B: ContainerBackend>(
  backend: &B,
  container_id: &str,
  path: &str,
  log_path: &str,
  dest_dir: &Path,
) -> Result<PathBuf, ExtractionError> {
  let err = match extract_binary(backend, container_id, path, dest_dir).await {
    Ok(binary) => return Ok(binary),
    Err(err) => err,
  };

  match read_file(backend, container_id, log_path).await {
    Some(log) => Err(ExtractionError::WithBuildLog {
      log,
      source: Box::new(err),
    }),
    None => Err(err),
  }
}

/// Read a single text file out of a container, if it exists.
pub async fn read_file<B: ContainerBackend>(backend: &B, container_id: &str, path: &str) -> Option<String> {
  let bytes = match backend.copy_from_container(container_id, path).await {
    Ok(bytes) => bytes,
    Err(err) => {
      warn!(container = container_id, path, error = %err, "can't read file from container");
      return None;
    }
  };

  let mut archive = Archive::new(bytes.as_slice());
  let entries = archive.entries().ok()?;
  for entry in entries {
    let mut entry = entry.ok()?;
    if entry.header().entry_type().is_file() {
      let mut content = String::new();
      io::Read::read_to_string(&mut entry, &mut content).ok()?;
      return Some(content);
    }
  }
  None
}

/// Unpack failures before the container and path are attached.
enum UnpackError {
  Io(io::Error),
  Unsafe(PathBuf),
}

impl From<io::Error> for UnpackError {
  fn from(err: io::Error) -> Self {
    UnpackError::Io(err)
  }
}

impl UnpackError {
  fn located(self, container_id: &str, path: &str, dest: &Path) -> ExtractionError {
    match self {
      UnpackError::Io(source) => ExtractionError::Unpack {
        container_id: container_id.to_string(),
        path: path.to_string(),
        dest: dest.to_path_buf(),
        source,
      },
      UnpackError::Unsafe(entry) => ExtractionError::UnsafeEntry {
        container_id: container_id.to_string(),
        path: path.to_string(),
        entry,
      },
    }
  }
}

fn unpack(archive: &[u8], dest: &Path) -> Result<Vec<PathBuf>, UnpackError> {
  let mut archive = Archive::new(archive);
  let mut files = Vec::new();

  for entry in archive.entries()? {
    let mut entry = entry?;
    let relative = entry.path()?.into_owned();
    if relative
      .components()
      .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
      return Err(UnpackError::Unsafe(relative));
    }

    let target = dest.join(&relative);
    let mode = entry.header().mode()?;

    match entry.header().entry_type() {
      EntryType::Directory => {
        fs::create_dir_all(&target)?;
        set_mode(&target, mode)?;
      }
      EntryType::Regular | EntryType::Continuous => {
        if let Some(parent) = target.parent() {
          fs::create_dir_all(parent)?;
        }
        let mut file = fs::OpenOptions::new()
          .write(true)
          .create(true)
          .truncate(true)
          .open(&target)?;
        io::copy(&mut entry, &mut file)?;
        set_mode(&target, mode)?;
        debug!(path = %target.display(), mode = %format!("{:o}", mode), "unpacked file");
        files.push(target);
      }
      other => debug!(entry = %relative.display(), kind = ?other, "skipping archive entry"),
    }
  }

  Ok(files)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
  use std::os::unix::fs::PermissionsExt;
  fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
  Ok(())
}
