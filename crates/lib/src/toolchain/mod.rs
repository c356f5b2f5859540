//! External collaborators.
//!
//! The pipeline never builds, scans, pushes or signs anything itself. It
//! sequences calls to the four traits below and moves their results between
//! steps. [`ProcessToolchain`] implements all of them by driving command line
//! tools; tests substitute an in-memory fake.

mod apko;
mod cosign;
mod crane;
mod docker;
mod grype;
pub mod process;

use std::future::Future;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::build::RecipeKind;
use crate::config::ToolsConfig;
use crate::image::oci::OciError;
use crate::image::{Compression, Digest, ImageVariant, ImageVariantSet};
use crate::platform::Platform;
use crate::scan::Severity;
use crate::secret::{RegistryAuth, Secret};

/// Errors raised by a collaborator invocation.
#[derive(Debug, Error)]
pub enum ToolError {
  /// The tool could not be started.
  #[error("failed to launch {program}: {source}")]
  Spawn {
    program: String,
    #[source]
    source: std::io::Error,
  },

  /// The tool ran and reported failure.
  #[error("{program} exited with code {code:?}: {stderr}")]
  Failed {
    program: String,
    code: Option<i32>,
    stderr: String,
  },

  /// The tool succeeded but its output could not be understood.
  #[error("unexpected output from {program}: {message}")]
  Output { program: String, message: String },

  #[error("invalid image layout: {0}")]
  Layout(#[from] OciError),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

/// One per-platform build.
#[derive(Debug, Clone)]
pub struct BuildRequest {
  pub context: PathBuf,
  pub kind: RecipeKind,
  /// Recipe path relative to `context`.
  pub recipe: PathBuf,
  pub target: Option<String>,
  /// `None` builds for the engine's default (host) platform.
  pub platform: Option<Platform>,
  /// Where the engine should write the image archive.
  pub output: PathBuf,
}

/// One per-platform pull of an already published image.
#[derive(Debug, Clone)]
pub struct PullRequest {
  pub address: String,
  /// `None` pulls the host platform.
  pub platform: Option<Platform>,
  /// Where the registry client should write the image archive.
  pub output: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ScanRequest {
  pub variant: ImageVariant,
  /// The exported archive to scan.
  pub archive: PathBuf,
  pub output_format: String,
  /// Vulnerability database cache. The caller holds its lock for the whole scan.
  pub db_cache_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
  pub id: String,
  pub package: String,
  pub severity: Severity,
}

/// Raw scanner output: the formatted report plus the findings it contains.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
  pub text: String,
  pub findings: Vec<Finding>,
}

#[derive(Debug, Clone)]
pub struct SignRequest {
  pub subject: Digest,
  pub key: Secret,
  pub password: Secret,
  pub registry_auth: Option<RegistryAuth>,
  pub docker_config: Option<PathBuf>,
}

/// Turns a build context and recipe into architecture-specific images.
pub trait BuildEngine: Send + Sync + 'static {
  fn build(&self, request: BuildRequest) -> impl Future<Output = Result<ImageVariant, ToolError>> + Send;

  /// Write `variants` to `dest` as a single portable archive.
  fn export(
    &self,
    variants: &[ImageVariant],
    compression: Compression,
    dest: &Path,
  ) -> impl Future<Output = Result<(), ToolError>> + Send;
}

pub trait Scanner: Send + Sync + 'static {
  fn scan(&self, request: ScanRequest) -> impl Future<Output = Result<ScanReport, ToolError>> + Send;
}

pub trait Registry: Send + Sync + 'static {
  fn login(&self, address: &str, auth: &RegistryAuth) -> impl Future<Output = Result<(), ToolError>> + Send;

  /// Push `variants` as one manifest list to `address` and return its digest.
  fn publish(
    &self,
    address: &str,
    variants: &ImageVariantSet,
  ) -> impl Future<Output = Result<Digest, ToolError>> + Send;

  /// Fetch one platform of the image at `request.address` as an OCI archive.
  fn pull(&self, request: PullRequest) -> impl Future<Output = Result<ImageVariant, ToolError>> + Send;
}

pub trait Signer: Send + Sync + 'static {
  /// Attach a detached signature to `request.subject`; returns the signer's output.
  fn sign(&self, request: SignRequest) -> impl Future<Output = Result<String, ToolError>> + Send;
}

/// Everything the pipeline needs.
pub trait Toolchain: BuildEngine + Scanner + Registry + Signer {}

impl<T> Toolchain for T where T: BuildEngine + Scanner + Registry + Signer {}

/// Drives `docker buildx` (or `apko`), `grype`, `crane` and `cosign` as child processes.
#[derive(Debug, Clone)]
pub struct ProcessToolchain {
  tools: ToolsConfig,
}

impl ProcessToolchain {
  pub fn new(tools: ToolsConfig) -> Self {
    Self { tools }
  }

  pub fn tools(&self) -> &ToolsConfig {
    &self.tools
  }
}
