//! Pipeline-level errors.

use thiserror::Error;

use crate::build::BuildError;
use crate::publish::PublishError;
use crate::scan::{GateFailure, ScanError};
use crate::sign::SignError;
use crate::toolchain::ToolError;

/// A step was asked to reuse an earlier step's output that does not exist.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PreconditionError {
  #[error("no built image available: run build first or pass a variant")]
  NoVariants,

  #[error("no variant was built for platform {0}")]
  PlatformNotBuilt(String),

  #[error("no digest available: publish first or pass a digest")]
  NoDigest,

  #[error("no publish address given")]
  NoAddresses,

  #[error("signing was requested without a signing key and password")]
  MissingSigningKeys,
}

#[derive(Debug, Error)]
pub enum PipelineError {
  #[error(transparent)]
  Precondition(#[from] PreconditionError),

  #[error(transparent)]
  Build(#[from] BuildError),

  #[error("scan gate failed: {0}")]
  ScanGate(#[from] GateFailure),

  #[error(transparent)]
  ScanTool(#[from] ScanError),

  #[error("export failed: {0}")]
  Export(#[source] ToolError),

  #[error(transparent)]
  Publish(#[from] PublishError),

  #[error(transparent)]
  Sign(#[from] SignError),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

impl PipelineError {
  /// Whether this is a breached severity floor rather than a broken step.
  pub fn is_gate_failure(&self) -> bool {
    matches!(self, PipelineError::ScanGate(_))
  }
}
