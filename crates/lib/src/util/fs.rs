//! Filesystem helpers for staging the build workspace.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum CopyError {
  #[error("failed to walk {}: {source}", path.display())]
  Walk {
    path: PathBuf,
    #[source]
    source: walkdir::Error,
  },

  #[error("failed to create directory {}: {source}", path.display())]
  CreateDir {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to copy {} to {}: {source}", from.display(), to.display())]
  CopyFile {
    from: PathBuf,
    to: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to read {}: {source}", path.display())]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("refusing to copy symlink {}", path.display())]
  Symlink { path: PathBuf },
}

/// Recursively copy `from` into `to`, creating `to` if needed.
///
/// Directories are recreated with the permission bits of their source and
/// regular files keep theirs. Symlinks are recreated as symlinks on unix.
/// Returns the number of regular files copied.
pub fn copy_dir(from: &Path, to: &Path) -> Result<usize, CopyError> {
  let mut copied = 0;

  // contents first, so a read-only source directory gets its mode after its files are in
  for entry in WalkDir::new(from).follow_links(false).contents_first(true) {
    let entry = entry.map_err(|source| CopyError::Walk {
      path: from.to_path_buf(),
      source,
    })?;

    let relative = entry.path().strip_prefix(from).unwrap_or(entry.path());
    let target = to.join(relative);
    let file_type = entry.file_type();

    if file_type.is_dir() {
      fs::create_dir_all(&target).map_err(|source| CopyError::CreateDir {
        path: target.clone(),
        source,
      })?;
      let permissions = entry
        .metadata()
        .map_err(|source| CopyError::Walk {
          path: entry.path().to_path_buf(),
          source,
        })?
        .permissions();
      fs::set_permissions(&target, permissions).map_err(|source| CopyError::CreateDir { path: target, source })?;
    } else if file_type.is_symlink() {
      copy_symlink(entry.path(), &target)?;
    } else {
      copy_file(entry.path(), &target)?;
      copied += 1;
    }
  }

  debug!(from = %from.display(), to = %to.display(), files = copied, "copied directory");
  Ok(copied)
}

/// Copy a single file, truncating the destination and keeping the source's permission bits.
pub fn copy_file(from: &Path, to: &Path) -> Result<(), CopyError> {
  let err = |source| CopyError::CopyFile {
    from: from.to_path_buf(),
    to: to.to_path_buf(),
    source,
  };

  if let Some(parent) = to.parent() {
    fs::create_dir_all(parent).map_err(|source| CopyError::CreateDir {
      path: parent.to_path_buf(),
      source,
    })?;
  }

  // fs::copy carries permissions over, but not onto a pre-existing destination on every platform
  fs::copy(from, to).map_err(err)?;
  let permissions = fs::metadata(from).map_err(err)?.permissions();
  fs::set_permissions(to, permissions).map_err(err)?;

  Ok(())
}

/// Copy only the regular files directly inside `from` into `to`.
///
/// Subdirectories are skipped; a symlink is an error.
pub fn copy_top_level_files(from: &Path, to: &Path) -> Result<Vec<PathBuf>, CopyError> {
  let entries = fs::read_dir(from).map_err(|source| CopyError::Read {
    path: from.to_path_buf(),
    source,
  })?;

  let mut copied = Vec::new();
  for entry in entries {
    let entry = entry.map_err(|source| CopyError::Read {
      path: from.to_path_buf(),
      source,
    })?;
    let path = entry.path();
    let file_type = entry.file_type().map_err(|source| CopyError::Read {
      path: path.clone(),
      source,
    })?;

    if file_type.is_dir() {
      debug!(path = %path.display(), "skipping directory");
      continue;
    }
    if file_type.is_symlink() {
      return Err(CopyError::Symlink { path });
    }

    let target = to.join(entry.file_name());
    copy_file(&path, &target)?;
    copied.push(target);
  }

  copied.sort();
  Ok(copied)
}

#[cfg(unix)]
fn copy_symlink(from: &Path, to: &Path) -> Result<(), CopyError> {
  let link = fs::read_link(from).map_err(|source| CopyError::Read {
    path: from.to_path_buf(),
    source,
  })?;
  if let Some(parent) = to.parent() {
    fs::create_dir_all(parent).map_err(|source| CopyError::CreateDir {
      path: parent.to_path_buf(),
      source,
    })?;
  }
  std::os::unix::fs::symlink(&link, to).map_err(|source| CopyError::CopyFile {
    from: from.to_path_buf(),
    to: to.to_path_buf(),
    source,
  })
}

#[cfg(not(unix))]
fn copy_symlink(from: &Path, _to: &Path) -> Result<(), CopyError> {
  Err(CopyError::Symlink {
    path: from.to_path_buf(),
  })
}
