//! Recipe discovery under a source tree.
//!
//! Every file named like the recipe, at any depth, marks its directory as one
//! build target. Entries are visited depth first with siblings sorted by name,
//! which fixes the release order.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum DiscoveryError {
  #[error("{0} is not a directory")]
  NotADirectory(PathBuf),

  #[error("failed to walk source tree: {0}")]
  Walk(#[from] walkdir::Error),
}

/// One directory holding a recipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredTarget {
  /// Path of the directory relative to the source tree, `/` separated.
  /// Empty for a recipe at the root.
  pub repository: String,
  /// The directory itself, used as the build context.
  pub context: PathBuf,
}

impl DiscoveredTarget {
  /// Name for messages and reports: the repository path, or `.` for the root.
  pub fn name(&self) -> &str {
    if self.repository.is_empty() { "." } else { &self.repository }
  }
}

pub fn discover_targets(root: &Path, recipe_name: &OsStr) -> Result<Vec<DiscoveredTarget>, DiscoveryError> {
  if !root.is_dir() {
    return Err(DiscoveryError::NotADirectory(root.to_path_buf()));
  }

  let mut targets = Vec::new();
  for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
    let entry = entry?;
    if !entry.file_type().is_file() || entry.file_name() != recipe_name {
      continue;
    }

    let Some(context) = entry.path().parent() else {
      continue;
    };
    let repository = context
      .strip_prefix(root)
      .unwrap_or(Path::new(""))
      .components()
      .map(|c| c.as_os_str().to_string_lossy())
      .collect::<Vec<_>>()
      .join("/");

    debug!(repository = %repository, context = %context.display(), "found recipe");
    targets.push(DiscoveredTarget {
      repository,
      context: context.to_path_buf(),
    });
  }

  Ok(targets)
}

/// `{base}/{repository}:{tag}`, or `{base}:{tag}` for the root.
pub fn derive_address(base: &str, repository: &str, tag: &str) -> String {
  let base = base.trim_end_matches('/');
  if repository.is_empty() {
    format!("{base}:{tag}")
  } else {
    format!("{base}/{repository}:{tag}")
  }
}
