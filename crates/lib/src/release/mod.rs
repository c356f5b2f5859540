//! Batch release over a source tree.
//!
//! Targets are released one after another in discovery order: build, then the
//! scan gate when enabled, then publish, then signing when enabled. Any step
//! failure stops the whole batch; targets already released stay published and
//! are reported alongside the error. Each target's build archives are removed
//! once the target is done with, whether it succeeded or not.

mod discover;

pub use discover::{DiscoveredTarget, DiscoveryError, derive_address, discover_targets};

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

use crate::build::BuildTarget;
use crate::error::{PipelineError, PreconditionError};
use crate::image::Digest;
use crate::pipeline::{Pipeline, ScanArgs, SignArgs};
use crate::platform::Platform;
use crate::scan::{GateFailure, ScanVerdict, Severity};
use crate::secret::{RegistryAuth, Secret};
use crate::state::PipelineState;
use crate::toolchain::Toolchain;

#[derive(Debug, Clone)]
pub struct SigningKeys {
  pub key: Secret,
  pub password: Secret,
}

#[derive(Debug, Clone)]
pub struct ReleaseRequest {
  pub source_tree: PathBuf,
  /// Addresses are `{registry_base}/{repository}:{tag}`.
  pub registry_base: String,
  /// Platforms for every target. Empty builds for the host.
  pub platforms: Vec<Platform>,
  pub auth: Option<RegistryAuth>,
  pub scan: bool,
  /// Floor for the scan gate; defaults to `scan.release_fail_on` from config.
  pub fail_on: Option<Severity>,
  pub sign: bool,
  pub signing: Option<SigningKeys>,
  pub docker_config: Option<PathBuf>,
}

impl ReleaseRequest {
  pub fn new(source_tree: impl Into<PathBuf>, registry_base: impl Into<String>) -> Self {
    Self {
      source_tree: source_tree.into(),
      registry_base: registry_base.into(),
      platforms: Vec::new(),
      auth: None,
      scan: false,
      fail_on: None,
      sign: false,
      signing: None,
      docker_config: None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
  pub passed: bool,
  pub floor: Option<Severity>,
  pub highest: Option<Severity>,
  pub findings: usize,
}

impl From<&ScanVerdict> for ScanSummary {
  fn from(verdict: &ScanVerdict) -> Self {
    Self {
      passed: verdict.passed,
      floor: verdict.floor,
      highest: verdict.highest,
      findings: verdict.finding_count,
    }
  }
}

/// Outcome for one released target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseRecord {
  pub repository: String,
  pub address: String,
  pub digest: Digest,
  /// `None` when scanning was not requested.
  pub scan: Option<ScanSummary>,
  pub signed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReleaseReport {
  pub records: Vec<ReleaseRecord>,
}

impl ReleaseReport {
  /// One digest per target, in discovery order.
  pub fn digests(&self) -> Vec<&Digest> {
    self.records.iter().map(|r| &r.digest).collect()
  }
}

#[derive(Debug, Error)]
pub enum ReleaseError {
  #[error(transparent)]
  Precondition(#[from] PreconditionError),

  #[error("failed to discover recipes under {root}: {source}")]
  Discovery {
    root: PathBuf,
    #[source]
    source: DiscoveryError,
  },

  #[error("release of '{repository}' failed: {source}")]
  Target {
    repository: String,
    /// Targets released before the failure.
    completed: Vec<ReleaseRecord>,
    #[source]
    source: Box<PipelineError>,
  },
}

impl ReleaseError {
  pub fn completed(&self) -> &[ReleaseRecord] {
    match self {
      ReleaseError::Target { completed, .. } => completed,
      _ => &[],
    }
  }

  pub fn is_gate_failure(&self) -> bool {
    matches!(self, ReleaseError::Target { source, .. } if source.is_gate_failure())
  }

  /// The breached gate, with its scan report, when that is what stopped the batch.
  pub fn gate_failure(&self) -> Option<&GateFailure> {
    match self {
      ReleaseError::Target { source, .. } => match source.as_ref() {
        PipelineError::ScanGate(failure) => Some(failure),
        _ => None,
      },
      _ => None,
    }
  }
}

impl<T: Toolchain> Pipeline<T> {
  /// Discover every recipe under the source tree and release each in turn.
  pub async fn release(&self, request: &ReleaseRequest) -> Result<ReleaseReport, ReleaseError> {
    if request.sign && request.signing.is_none() {
      return Err(PreconditionError::MissingSigningKeys.into());
    }

    let recipe = self.recipe_name();
    let targets = discover_targets(&request.source_tree, &recipe).map_err(|source| ReleaseError::Discovery {
      root: request.source_tree.clone(),
      source,
    })?;

    info!(
      source_tree = %request.source_tree.display(),
      targets = targets.len(),
      scan = request.scan,
      sign = request.sign,
      "starting release"
    );

    let mut records = Vec::with_capacity(targets.len());
    for target in &targets {
      match self.release_target(target, request).await {
        Ok(record) => {
          info!(repository = %record.repository, digest = %record.digest, "released");
          records.push(record);
        }
        Err(source) => {
          error!(repository = %target.name(), error = %source, "release stopped");
          return Err(ReleaseError::Target {
            repository: target.name().to_string(),
            completed: records,
            source: Box::new(source),
          });
        }
      }
    }

    Ok(ReleaseReport { records })
  }

  async fn release_target(
    &self,
    target: &DiscoveredTarget,
    request: &ReleaseRequest,
  ) -> Result<ReleaseRecord, PipelineError> {
    let config = self.config();
    let address = derive_address(&request.registry_base, &target.repository, &config.release.tag);
    info!(repository = %target.name(), address = %address, "releasing");

    let build_target = BuildTarget::new(&target.context)
      .with_kind(config.build.kind)
      .with_recipe(self.recipe_name())
      .with_target(Some(config.build.target.clone()))
      .with_platforms(request.platforms.clone());
    let state = self.build(&PipelineState::new(), &build_target).await?;

    let result = self.ship_target(target, request, address, &state).await;
    self.discard(state.variants()).await;
    result
  }

  /// Everything after the build: gate, publish, sign.
  async fn ship_target(
    &self,
    target: &DiscoveredTarget,
    request: &ReleaseRequest,
    address: String,
    state: &PipelineState,
  ) -> Result<ReleaseRecord, PipelineError> {
    let scan = if request.scan {
      let args = ScanArgs {
        fail_on: Some(request.fail_on.unwrap_or(self.config().scan.release_fail_on)),
        ..ScanArgs::default()
      };
      let verdict = self.scan(state, &args).await?;
      Some(ScanSummary::from(&verdict))
    } else {
      None
    };

    let state = self
      .publish(state, std::slice::from_ref(&address), None, request.auth.as_ref())
      .await?;
    let digest = state.digest().cloned().ok_or(PreconditionError::NoDigest)?;

    let signed = match (&request.signing, request.sign) {
      (Some(keys), true) => {
        let args = SignArgs {
          digest: None,
          key: keys.key.clone(),
          password: keys.password.clone(),
          registry_auth: request.auth.clone(),
          docker_config: request.docker_config.clone(),
        };
        self.sign(&state, args).await?;
        true
      }
      (None, true) => return Err(PreconditionError::MissingSigningKeys.into()),
      (_, false) => false,
    };

    Ok(ReleaseRecord {
      repository: target.name().to_string(),
      address,
      digest,
      scan,
      signed,
    })
  }

  /// Recipe filename discovery looks for, following `build.kind` unless `build.recipe` is set.
  fn recipe_name(&self) -> OsString {
    let recipe = self.config().build.recipe();
    match recipe.file_name() {
      Some(name) => name.to_os_string(),
      None => OsString::from(self.config().build.kind.default_recipe()),
    }
  }
}
