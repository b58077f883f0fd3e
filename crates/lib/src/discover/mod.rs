//! Handler discovery.
//!
//! Scans the Go sources of a function directory (non-recursively) and
//! reports the package names declared there and every top-level function
//! whose signature makes it usable as an event handler. See
//! [`FuncSignature::is_handler`] for the acceptance rule.

pub mod lexer;
pub mod parser;
pub mod signature;

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, debug_span, trace};

pub use parser::{FuncDecl, ParseError, SourceFile, parse_file};
pub use signature::{FuncSignature, TypeRef};

/// Extension of the files discovery parses.
const SOURCE_EXTENSION: &str = "go";

#[derive(Debug, Error)]
pub enum DiscoveryError {
  #[error("failed to read function directory {}: {source}", dir.display())]
  ReadDir {
    dir: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to read source file {}: {source}", path.display())]
  ReadFile {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse sources in {}: {}: {source}", dir.display(), file.display())]
  Parse {
    dir: PathBuf,
    file: PathBuf,
    #[source]
    source: ParseError,
  },

  #[error("no handler found in {}", dir.display())]
  NoHandler { dir: PathBuf },

  #[error("too many handlers found in {}: {}", dir.display(), handlers.join(", "))]
  TooManyHandlers { dir: PathBuf, handlers: Vec<String> },

  #[error("expected exactly one package in {}, found [{}]", dir.display(), packages.join(", "))]
  PackageCount { dir: PathBuf, packages: Vec<String> },
}

/// A discovered handler function and the package declaring it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerCandidate {
  pub package: String,
  pub name: String,
}

/// Result of scanning one directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovery {
  pub dir: PathBuf,
  /// Package names in first-seen order, without duplicates.
  pub packages: Vec<String>,
  /// Every accepted handler in file order. The same name may appear more than once.
  pub candidates: Vec<HandlerCandidate>,
}

impl Discovery {
  pub fn handler_names(&self) -> Vec<&str> {
    self.candidates.iter().map(|c| c.name.as_str()).collect()
  }

  /// The only handler found, if there is exactly one.
  pub fn sole_handler(&self) -> Result<&HandlerCandidate, DiscoveryError> {
    match self.candidates.as_slice() {
      [single] => Ok(single),
      [] => Err(DiscoveryError::NoHandler { dir: self.dir.clone() }),
      many => Err(DiscoveryError::TooManyHandlers {
        dir: self.dir.clone(),
        handlers: many.iter().map(|c| c.name.clone()).collect(),
      }),
    }
  }

  /// The only package declared, if there is exactly one.
  pub fn sole_package(&self) -> Result<&str, DiscoveryError> {
    match self.packages.as_slice() {
      [single] => Ok(single),
      _ => Err(DiscoveryError::PackageCount {
        dir: self.dir.clone(),
        packages: self.packages.clone(),
      }),
    }
  }

  /// The package declaring `handler`, if it was discovered.
  pub fn package_of(&self, handler: &str) -> Option<&str> {
    self
      .candidates
      .iter()
      .find(|c| c.name == handler)
      .map(|c| c.package.as_str())
  }
}

/// Discover packages and handler functions in the Go sources directly inside `dir`.
///
/// Files are visited in name order. Any file that fails to parse aborts the
/// scan; nothing is returned for the files parsed before it.
pub fn discover_handlers(dir: &Path) -> Result<Discovery, DiscoveryError> {
  let _span = debug_span!("discover", dir = %dir.display()).entered();

  let mut discovery = Discovery {
    dir: dir.to_path_buf(),
    ..Default::default()
  };

  for path in source_files(dir)? {
    let content = fs::read_to_string(&path).map_err(|source| DiscoveryError::ReadFile {
      path: path.clone(),
      source,
    })?;
    let file = parse_file(&content).map_err(|source| DiscoveryError::Parse {
      dir: dir.to_path_buf(),
      file: path.clone(),
      source,
    })?;

    if !discovery.packages.contains(&file.package) {
      discovery.packages.push(file.package.clone());
    }

    for decl in &file.functions {
      if decl.has_receiver {
        trace!(function = %decl.signature.name, "skipping method");
        continue;
      }
      if decl.signature.is_handler() {
        debug!(file = %path.display(), handler = %decl.signature.name, package = %file.package, "found handler");
        discovery.candidates.push(HandlerCandidate {
          package: file.package.clone(),
          name: decl.signature.name.clone(),
        });
      }
    }
  }

  debug!(
    packages = ?discovery.packages,
    handlers = ?discovery.handler_names(),
    "discovery finished"
  );
  Ok(discovery)
}

fn source_files(dir: &Path) -> Result<Vec<PathBuf>, DiscoveryError> {
  let read_dir_err = |source| DiscoveryError::ReadDir {
    dir: dir.to_path_buf(),
    source,
  };

  let mut files = Vec::new();
  for entry in fs::read_dir(dir).map_err(read_dir_err)? {
    let entry = entry.map_err(read_dir_err)?;
    let path = entry.path();
    let is_source = path.extension().is_some_and(|ext| ext == SOURCE_EXTENSION);
    if is_source && entry.file_type().map_err(read_dir_err)?.is_file() {
      files.push(path);
    }
  }

  files.sort();
  Ok(files)
}
