//! Vulnerability scan gate.
//!
//! A scan exports one variant to an archive, takes the database cache lock,
//! and hands the archive to the scanner. The scanner only reports findings;
//! whether they fail the release is decided here by comparing them with the
//! requested severity floor.

pub mod cache_lock;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::image::{Compression, ImageVariant};
use crate::toolchain::{BuildEngine, ScanRequest, Scanner, ToolError};

use cache_lock::{CacheLock, CacheLockError};

/// Vulnerability severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
  Unknown,
  Negligible,
  Low,
  Medium,
  High,
  Critical,
}

impl Severity {
  pub fn as_str(&self) -> &'static str {
    match self {
      Severity::Unknown => "unknown",
      Severity::Negligible => "negligible",
      Severity::Low => "low",
      Severity::Medium => "medium",
      Severity::High => "high",
      Severity::Critical => "critical",
    }
  }
}

impl fmt::Display for Severity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Severity {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "unknown" => Ok(Severity::Unknown),
      "negligible" => Ok(Severity::Negligible),
      "low" => Ok(Severity::Low),
      "medium" => Ok(Severity::Medium),
      "high" => Ok(Severity::High),
      "critical" => Ok(Severity::Critical),
      other => Err(format!("unknown severity: {other}")),
    }
  }
}

/// What to do when the severity floor is breached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GatePolicy {
  /// A breach fails the step.
  #[default]
  Enforce,
  /// A breach is logged and the step continues.
  ReportOnly,
}

impl FromStr for GatePolicy {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "enforce" => Ok(GatePolicy::Enforce),
      "report-only" => Ok(GatePolicy::ReportOnly),
      other => Err(format!("unknown gate policy: {other}")),
    }
  }
}

/// Outcome of one scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanVerdict {
  pub report: String,
  pub passed: bool,
  pub floor: Option<Severity>,
  /// Most severe finding, if any.
  pub highest: Option<Severity>,
  pub finding_count: usize,
}

impl ScanVerdict {
  /// Judge `severities` against `floor`. Without a floor every scan passes.
  pub fn evaluate(report: String, severities: &[Severity], floor: Option<Severity>) -> Self {
    let highest = severities.iter().copied().max();
    let passed = match (floor, highest) {
      (Some(floor), Some(highest)) => highest < floor,
      _ => true,
    };
    Self {
      report,
      passed,
      floor,
      highest,
      finding_count: severities.len(),
    }
  }

  /// Apply `policy`, turning a failed verdict into an error when enforcing.
  pub fn enforce(self, policy: GatePolicy) -> Result<Self, GateFailure> {
    if self.passed {
      return Ok(self);
    }
    match policy {
      GatePolicy::Enforce => Err(GateFailure { verdict: self }),
      GatePolicy::ReportOnly => {
        warn!(
          floor = ?self.floor,
          highest = ?self.highest,
          "scan found vulnerabilities at or above the floor; continuing (report-only)"
        );
        Ok(self)
      }
    }
  }
}

/// A scan that breached its severity floor. Carries the full verdict so the
/// report can still be shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateFailure {
  pub verdict: ScanVerdict,
}

impl fmt::Display for GateFailure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let floor = self.verdict.floor.map(|s| s.as_str()).unwrap_or("none");
    let highest = self.verdict.highest.map(|s| s.as_str()).unwrap_or("none");
    write!(
      f,
      "found vulnerabilities at or above severity '{floor}' (highest: {highest}, {} finding(s))",
      self.verdict.finding_count
    )
  }
}

impl std::error::Error for GateFailure {}

/// Errors from running a scan, before any verdict is reached.
#[derive(Debug, Error)]
pub enum ScanError {
  #[error("failed to export image for scanning: {0}")]
  Export(#[source] ToolError),

  #[error("scan cache lock: {0}")]
  Lock(#[from] CacheLockError),

  #[error("scanner failed: {0}")]
  Tool(#[source] ToolError),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
  pub fail_on: Option<Severity>,
  pub output_format: String,
  pub policy: GatePolicy,
}

/// Paths a scan needs on disk.
#[derive(Debug, Clone)]
pub struct ScanPaths {
  pub work_dir: PathBuf,
  pub db_cache_dir: PathBuf,
}

/// Export `variant`, scan it under the cache lock, and judge the findings.
///
/// Returns the verdict whether or not it passed; gating is the caller's call
/// via [`ScanVerdict::enforce`].
pub async fn scan_variant<T>(
  toolchain: &T,
  variant: &ImageVariant,
  options: &ScanOptions,
  paths: &ScanPaths,
) -> Result<ScanVerdict, ScanError>
where
  T: BuildEngine + Scanner,
{
  info!(platform = %variant.platform, fail_on = ?options.fail_on, "scanning image");

  tokio::fs::create_dir_all(&paths.work_dir).await?;
  let scratch = tempfile::Builder::new().prefix("scan-").tempdir_in(&paths.work_dir)?;
  let archive = scratch.path().join(format!("{}.tar", variant.platform.slug()));

  toolchain
    .export(std::slice::from_ref(variant), Compression::Uncompressed, &archive)
    .await
    .map_err(ScanError::Export)?;

  let report = {
    let _lock = CacheLock::acquire(&paths.db_cache_dir).await?;
    toolchain
      .scan(ScanRequest {
        variant: variant.clone(),
        archive: archive.clone(),
        output_format: options.output_format.clone(),
        db_cache_dir: paths.db_cache_dir.clone(),
      })
      .await
      .map_err(ScanError::Tool)?
  };

  let severities: Vec<_> = report.findings.iter().map(|f| f.severity).collect();
  let verdict = ScanVerdict::evaluate(report.text, &severities, options.fail_on);

  info!(
    platform = %variant.platform,
    findings = verdict.finding_count,
    highest = ?verdict.highest,
    passed = verdict.passed,
    "scan complete"
  );

  Ok(verdict)
}
