//! Step-by-step pipeline over an immutable [`PipelineState`].
//!
//! Each step takes the current state by reference. Steps that change it
//! (`build`, `import`, `publish`) return a new state; the caller decides
//! whether to keep it. A failed step returns an error and no state, so the
//! previous one stays in force.
//!
//! A successful `build` or `import` supersedes the variant set of the state it
//! was given, and removes that set's archives from the work dir.
//!
//! Omitted inputs resolve as: explicit argument, then the value carried in
//! the state, then a default from [`PipelineConfig`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::build::{BuildTarget, build_variants};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PreconditionError};
use crate::image::{Compression, Digest, ImageVariant, ImageVariantSet, discard_archives, export_path};
use crate::import::pull_variants;
use crate::platform::Platform;
use crate::publish::publish_variants;
use crate::scan::{ScanOptions, ScanVerdict, Severity, scan_variant};
use crate::secret::{RegistryAuth, Secret};
use crate::sign::sign_digest;
use crate::state::PipelineState;
use crate::toolchain::{SignRequest, Toolchain};

/// Inputs for [`Pipeline::scan`] and [`Pipeline::scan_report`].
#[derive(Debug, Clone, Default)]
pub struct ScanArgs {
  /// Variant to scan; defaults to the first of the current set.
  pub variant: Option<ImageVariant>,
  /// Severity floor. Without one the scan never fails.
  pub fail_on: Option<Severity>,
  pub output_format: Option<String>,
}

/// Inputs for [`Pipeline::sign`].
#[derive(Debug, Clone)]
pub struct SignArgs {
  /// Subject digest; defaults to the last published digest.
  pub digest: Option<Digest>,
  pub key: Secret,
  pub password: Secret,
  pub registry_auth: Option<RegistryAuth>,
  pub docker_config: Option<PathBuf>,
}

impl SignArgs {
  pub fn new(key: Secret, password: Secret) -> Self {
    Self {
      digest: None,
      key,
      password,
      registry_auth: None,
      docker_config: None,
    }
  }
}

pub struct Pipeline<T> {
  toolchain: Arc<T>,
  config: PipelineConfig,
}

impl<T: Toolchain> Pipeline<T> {
  pub fn new(toolchain: T, config: PipelineConfig) -> Self {
    Self {
      toolchain: Arc::new(toolchain),
      config,
    }
  }

  pub fn config(&self) -> &PipelineConfig {
    &self.config
  }

  pub fn toolchain(&self) -> &T {
    &self.toolchain
  }

  /// Build `target` and return a state whose variant set is the new one.
  pub async fn build(&self, state: &PipelineState, target: &BuildTarget) -> Result<PipelineState, PipelineError> {
    let variants = build_variants(Arc::clone(&self.toolchain), target, &self.config.paths.work_dir()).await?;
    self.discard(state.variants()).await;
    Ok(state.with_variants(variants))
  }

  /// Pull `address` for each platform (or the host) and return a state whose
  /// variant set is the imported one.
  pub async fn import(
    &self,
    state: &PipelineState,
    address: &str,
    platforms: &[Platform],
  ) -> Result<PipelineState, PipelineError> {
    let variants = pull_variants(Arc::clone(&self.toolchain), address, platforms, &self.config.paths.work_dir()).await?;
    self.discard(state.variants()).await;
    Ok(state.with_variants(variants))
  }

  /// Remove the work-dir archives of a variant set nothing will use again.
  pub(crate) async fn discard(&self, variants: &ImageVariantSet) {
    if variants.is_empty() {
      return;
    }
    let variants = variants.clone();
    let work_dir = self.config.paths.work_dir();
    let result = tokio::task::spawn_blocking(move || discard_archives(&variants, &work_dir)).await;
    match result {
      Ok(Ok(())) => {}
      Ok(Err(e)) => warn!(error = %e, "could not remove image archives"),
      Err(e) => warn!(error = %e, "archive cleanup task failed"),
    }
  }

  /// Scan one variant and gate on `args.fail_on` under the configured policy.
  ///
  /// A breached floor is [`PipelineError::ScanGate`], which still carries the verdict.
  pub async fn scan(&self, state: &PipelineState, args: &ScanArgs) -> Result<ScanVerdict, PipelineError> {
    let variant = resolve_variant(state, args.variant.as_ref())?;
    let options = ScanOptions {
      fail_on: args.fail_on,
      output_format: args
        .output_format
        .clone()
        .unwrap_or_else(|| self.config.scan.output_format.clone()),
      policy: self.config.scan.policy,
    };

    let verdict = scan_variant(self.toolchain.as_ref(), &variant, &options, &self.config.paths.scan_paths()).await?;
    Ok(verdict.enforce(options.policy)?)
  }

  /// Non-gating scan: the report text only. Any floor in `args` is ignored.
  pub async fn scan_report(&self, state: &PipelineState, args: &ScanArgs) -> Result<String, PipelineError> {
    let args = ScanArgs {
      fail_on: None,
      ..args.clone()
    };
    Ok(self.scan(state, &args).await?.report)
  }

  /// Write `variants` (or the current set) to one archive and return its path.
  ///
  /// Without `dest` the archive goes into a fresh `export-*` directory under the work dir.
  pub async fn export(
    &self,
    state: &PipelineState,
    variants: Option<&ImageVariantSet>,
    compression: Compression,
    dest: Option<&Path>,
  ) -> Result<PathBuf, PipelineError> {
    let variants = resolve_variants(state, variants)?;

    let dest = match dest {
      Some(dest) => dest.to_path_buf(),
      None => {
        let work_dir = self.config.paths.work_dir();
        tokio::fs::create_dir_all(&work_dir).await?;
        let dir = tempfile::Builder::new().prefix("export-").tempdir_in(&work_dir)?.keep();
        export_path(&dir)
      }
    };

    self
      .toolchain
      .export(variants.as_slice(), compression, &dest)
      .await
      .map_err(PipelineError::Export)?;

    info!(dest = %dest.display(), compression = %compression, platforms = variants.len(), "exported image");
    Ok(dest)
  }

  /// Push `variants` (or the current set) to every address and record the first digest.
  pub async fn publish(
    &self,
    state: &PipelineState,
    addresses: &[String],
    variants: Option<&ImageVariantSet>,
    auth: Option<&RegistryAuth>,
  ) -> Result<PipelineState, PipelineError> {
    if addresses.is_empty() {
      return Err(PreconditionError::NoAddresses.into());
    }
    let variants = resolve_variants(state, variants)?;

    let digest = publish_variants(self.toolchain.as_ref(), addresses, &variants, auth).await?;
    Ok(state.with_digest(digest))
  }

  /// Sign `args.digest`, or the last published digest, and return the signer's output.
  pub async fn sign(&self, state: &PipelineState, args: SignArgs) -> Result<String, PipelineError> {
    let subject = match args.digest {
      Some(digest) => digest,
      None => state.digest().cloned().ok_or(PreconditionError::NoDigest)?,
    };

    let request = SignRequest {
      subject,
      key: args.key,
      password: args.password,
      registry_auth: args.registry_auth,
      docker_config: args.docker_config,
    };
    Ok(sign_digest(self.toolchain.as_ref(), request).await?)
  }
}

fn resolve_variant(state: &PipelineState, explicit: Option<&ImageVariant>) -> Result<ImageVariant, PreconditionError> {
  explicit
    .or_else(|| state.variants().first())
    .cloned()
    .ok_or(PreconditionError::NoVariants)
}

fn resolve_variants(
  state: &PipelineState,
  explicit: Option<&ImageVariantSet>,
) -> Result<ImageVariantSet, PreconditionError> {
  let variants = explicit.unwrap_or_else(|| state.variants());
  if variants.is_empty() {
    return Err(PreconditionError::NoVariants);
  }
  Ok(variants.clone())
}
