//! Acquisition of the platform source tree.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::cmd::{CmdError, CmdRunner, RunOptions};
use crate::consts::DEFAULT_PLATFORM_URL;
use crate::util::fs::{CopyError, copy_dir};

/// Errors that can occur while acquiring the platform source.
#[derive(Debug, Error)]
pub enum SourceError {
  #[error("failed to copy platform source from {} to {}: {source}", from.display(), to.display())]
  Copy {
    from: PathBuf,
    to: PathBuf,
    #[source]
    source: CopyError,
  },

  #[error("failed to clone platform source '{url}' into {}: {source}", dest.display())]
  Clone {
    url: String,
    dest: PathBuf,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },

  #[error("failed to check out '{reference}' in {}: {source}", dir.display())]
  Checkout {
    reference: String,
    dir: PathBuf,
    #[source]
    source: CmdError,
  },
}

/// Where the platform source comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformSource {
  /// A local checkout, copied recursively.
  LocalDir(PathBuf),
  /// A git URL, cloned and optionally checked out at `reference`.
  Remote { url: String, reference: Option<String> },
}

impl Default for PlatformSource {
  fn default() -> Self {
    PlatformSource::Remote {
      url: DEFAULT_PLATFORM_URL.to_string(),
      reference: None,
    }
  }
}

impl PlatformSource {
  /// Parse `URL[#REF]`. Only a single `#` separates a ref; anything else is taken as the URL.
  pub fn remote(spec: &str) -> Self {
    match spec.split('#').collect::<Vec<_>>().as_slice() {
      [url, reference] => PlatformSource::Remote {
        url: url.to_string(),
        reference: Some(reference.to_string()),
      },
      _ => PlatformSource::Remote {
        url: spec.to_string(),
        reference: None,
      },
    }
  }
}

impl fmt::Display for PlatformSource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      PlatformSource::LocalDir(path) => write!(f, "{}", path.display()),
      PlatformSource::Remote { url, reference: None } => f.write_str(url),
      PlatformSource::Remote {
        url,
        reference: Some(reference),
      } => write!(f, "{}#{}", url, reference),
    }
  }
}

/// Place the platform source at `dest`, which must not exist yet.
pub async fn acquire(source: &PlatformSource, dest: &Path, runner: &CmdRunner) -> Result<(), SourceError> {
  match source {
    PlatformSource::LocalDir(from) => {
      debug!(from = %from.display(), to = %dest.display(), "copying platform source");
      copy_dir(from, dest).map_err(|source| SourceError::Copy {
        from: from.clone(),
        to: dest.to_path_buf(),
        source,
      })?;
    }
    PlatformSource::Remote { url, reference } => {
      info!(url = %url, dest = %dest.display(), "cloning platform source");
      clone(url, dest).await?;

      if let Some(reference) = reference {
        info!(reference = %reference, "checking out platform source");
        runner
          .run("git", ["checkout", reference.as_str()], RunOptions::in_dir(dest))
          .await
          .map_err(|source| SourceError::Checkout {
            reference: reference.clone(),
            dir: dest.to_path_buf(),
            source,
          })?;
      }
    }
  }

  debug!(dest = %dest.display(), "platform source ready");
  Ok(())
}

async fn clone(url: &str, dest: &Path) -> Result<(), SourceError> {
  let clone_err = |source: Box<dyn std::error::Error + Send + Sync>| SourceError::Clone {
    url: url.to_string(),
    dest: dest.to_path_buf(),
    source,
  };

  let (owned_url, owned_dest) = (url.to_string(), dest.to_path_buf());
  tokio::task::spawn_blocking(move || clone_blocking(&owned_url, &owned_dest))
    .await
    .map_err(|e| clone_err(e.into()))?
    .map_err(clone_err)
}

fn clone_blocking(url: &str, dest: &Path) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
  let mut prepared = gix::prepare_clone(url, dest)?;
  let (mut checkout, _outcome) =
    prepared.fetch_then_checkout(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)?;
  let (_repo, _outcome) = checkout.main_worktree(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;
  use tempfile::TempDir;

  #[test]
  fn remote_with_reference() {
    assert_eq!(
      PlatformSource::remote("https://example.com/nuclio.git#v0.1.0"),
      PlatformSource::Remote {
        url: "https://example.com/nuclio.git".to_string(),
        reference: Some("v0.1.0".to_string()),
      }
    );
  }

  #[test]
  fn remote_without_reference() {
    let source = PlatformSource::remote("https://example.com/nuclio.git");
    assert_eq!(source.to_string(), "https://example.com/nuclio.git");
  }

  #[test]
  fn remote_with_several_hashes_is_all_url() {
    let source = PlatformSource::remote("https://example.com/a#b#c");
    assert_eq!(
      source,
      PlatformSource::Remote {
        url: "https://example.com/a#b#c".to_string(),
        reference: None,
      }
    );
  }

  #[test]
  fn default_is_upstream() {
    assert_eq!(PlatformSource::default().to_string(), DEFAULT_PLATFORM_URL);
  }

  #[tokio::test]
  async fn local_dir_is_copied() {
    let temp = TempDir::new().unwrap();
    let from = temp.path().join("nuclio-src");
    fs::create_dir_all(from.join("hack/processor/build")).unwrap();
    fs::write(from.join("hack/processor/build/Dockerfile.alpine"), "FROM alpine").unwrap();
    let dest = temp.path().join("work/nuclio");

    acquire(&PlatformSource::LocalDir(from), &dest, &CmdRunner::new())
      .await
      .unwrap();

    assert!(dest.join("hack/processor/build/Dockerfile.alpine").is_file());
  }

  #[tokio::test]
  async fn missing_local_dir_is_copy_error() {
    let temp = TempDir::new().unwrap();

    let result = acquire(
      &PlatformSource::LocalDir(temp.path().join("missing")),
      &temp.path().join("dest"),
      &CmdRunner::new(),
    )
    .await;

    assert!(matches!(result, Err(SourceError::Copy { .. })));
  }

  async fn git(dir: &Path, args: &[&str]) {
    let mut full = vec![
      "-c",
      "user.name=procbuild",
      "-c",
      "user.email=procbuild@example.com",
      "-c",
      "commit.gpgsign=false",
    ];
    full.extend_from_slice(args);
    CmdRunner::new().run("git", full, RunOptions::in_dir(dir)).await.unwrap();
  }

  /// A repository with `v1` tagged on the first of two commits.
  async fn tagged_repo(dir: &Path) {
    fs::create_dir_all(dir).unwrap();
    git(dir, &["init", "-q"]).await;
    fs::write(dir.join("VERSION"), "1\n").unwrap();
    git(dir, &["add", "VERSION"]).await;
    git(dir, &["commit", "-q", "-m", "first"]).await;
    git(dir, &["tag", "v1"]).await;
    fs::write(dir.join("VERSION"), "2\n").unwrap();
    git(dir, &["commit", "-q", "-a", "-m", "second"]).await;
  }

  #[tokio::test]
  async fn remote_is_cloned_at_head() {
    let temp = TempDir::new().unwrap();
    let repo = temp.path().join("repo");
    tagged_repo(&repo).await;
    let dest = temp.path().join("dest");

    let url = format!("file://{}", repo.display());
    acquire(&PlatformSource::remote(&url), &dest, &CmdRunner::new())
      .await
      .unwrap();

    assert_eq!(fs::read_to_string(dest.join("VERSION")).unwrap(), "2\n");
  }

  #[tokio::test]
  async fn remote_reference_is_checked_out() {
    let temp = TempDir::new().unwrap();
    let repo = temp.path().join("repo");
    tagged_repo(&repo).await;
    let dest = temp.path().join("dest");

    let url = format!("file://{}#v1", repo.display());
    acquire(&PlatformSource::remote(&url), &dest, &CmdRunner::new())
      .await
      .unwrap();

    assert_eq!(fs::read_to_string(dest.join("VERSION")).unwrap(), "1\n");
  }

  #[tokio::test]
  async fn unknown_reference_is_checkout_error() {
    let temp = TempDir::new().unwrap();
    let repo = temp.path().join("repo");
    tagged_repo(&repo).await;

    let url = format!("file://{}#no-such-tag", repo.display());
    let result = acquire(&PlatformSource::remote(&url), &temp.path().join("dest"), &CmdRunner::new()).await;

    match result {
      Err(SourceError::Checkout { reference, .. }) => assert_eq!(reference, "no-such-tag"),
      other => panic!("expected checkout error, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn unreachable_remote_is_clone_error() {
    let temp = TempDir::new().unwrap();
    let url = format!("file://{}", temp.path().join("no-such-repo").display());

    let result = acquire(&PlatformSource::remote(&url), &temp.path().join("dest"), &CmdRunner::new()).await;

    assert!(matches!(result, Err(SourceError::Clone { .. })));
  }
}
