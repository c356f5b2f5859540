//! Built images and the values that flow between pipeline steps.

pub mod oci;

use std::collections::BTreeSet;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::platform::Platform;

/// A built, architecture-specific image.
///
/// `archive` is the handle the build engine returned for the image; the
/// process toolchain uses an OCI archive on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageVariant {
  pub platform: Platform,
  pub archive: PathBuf,
}

impl ImageVariant {
  pub fn new(platform: Platform, archive: impl Into<PathBuf>) -> Self {
    Self {
      platform,
      archive: archive.into(),
    }
  }
}

/// One variant per requested platform, in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageVariantSet(Vec<ImageVariant>);

impl ImageVariantSet {
  pub fn new(variants: Vec<ImageVariant>) -> Self {
    Self(variants)
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn first(&self) -> Option<&ImageVariant> {
    self.0.first()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, ImageVariant> {
    self.0.iter()
  }

  pub fn as_slice(&self) -> &[ImageVariant] {
    &self.0
  }

  pub fn platforms(&self) -> Vec<&Platform> {
    self.0.iter().map(|v| &v.platform).collect()
  }

  pub fn find(&self, platform: &Platform) -> Option<&ImageVariant> {
    self.0.iter().find(|v| &v.platform == platform)
  }
}

impl<'a> IntoIterator for &'a ImageVariantSet {
  type Item = &'a ImageVariant;
  type IntoIter = std::slice::Iter<'a, ImageVariant>;

  fn into_iter(self) -> Self::IntoIter {
    self.0.iter()
  }
}

/// Content address of a published manifest list, as returned by the registry
/// client (e.g. `registry.example/app@sha256:...`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
  pub fn new(value: impl Into<String>) -> Self {
    Self(value.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for Digest {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Layer compression applied to the layers of an exported layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compression {
  #[default]
  Uncompressed,
  Gzip,
}

impl Compression {
  pub fn as_str(&self) -> &'static str {
    match self {
      Compression::Uncompressed => "Uncompressed",
      Compression::Gzip => "Gzip",
    }
  }
}

impl fmt::Display for Compression {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Compression {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "uncompressed" | "none" => Ok(Compression::Uncompressed),
      "gzip" => Ok(Compression::Gzip),
      other => Err(format!("unknown compression mode: {other}")),
    }
  }
}

/// Default export location for a variant set inside `dir`.
///
/// The export is always a plain tar of an OCI layout; compression applies to
/// the layers inside it.
pub fn export_path(dir: &Path) -> PathBuf {
  dir.join("image.tar")
}

/// Remove the per-run directories holding `variants`' archives.
///
/// Only directories that sit directly in `work_dir` are removed, so archives
/// kept anywhere else are never touched. Already missing directories are fine.
pub fn discard_archives(variants: &ImageVariantSet, work_dir: &Path) -> io::Result<()> {
  let dirs: BTreeSet<&Path> = variants
    .iter()
    .filter_map(|v| v.archive.parent())
    .filter(|dir| dir.parent() == Some(work_dir))
    .collect();

  for dir in dirs {
    match std::fs::remove_dir_all(dir) {
      Ok(()) => debug!(dir = %dir.display(), "removed image archives"),
      Err(e) if e.kind() == io::ErrorKind::NotFound => {}
      Err(e) => return Err(e),
    }
  }
  Ok(())
}
