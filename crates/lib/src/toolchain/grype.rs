//! `grype` vulnerability scanner.
//!
//! The human readable report is written to stdout in the requested format
//! while a JSON copy goes to a scratch file; findings are read from the JSON.

use serde::Deserialize;
use tempfile::TempDir;

use crate::consts::SCAN_DB_CACHE_ENV;
use crate::scan::Severity;

use super::process::Invocation;
use super::{Finding, ProcessToolchain, ScanReport, ScanRequest, Scanner, ToolError};

const FINDINGS_FILE: &str = "findings.json";

#[derive(Debug, Default, Deserialize)]
struct GrypeDocument {
  #[serde(default)]
  matches: Vec<GrypeMatch>,
}

#[derive(Debug, Deserialize)]
struct GrypeMatch {
  vulnerability: GrypeVulnerability,
  #[serde(default)]
  artifact: GrypeArtifact,
}

#[derive(Debug, Deserialize)]
struct GrypeVulnerability {
  id: String,
  #[serde(default)]
  severity: String,
}

#[derive(Debug, Default, Deserialize)]
struct GrypeArtifact {
  #[serde(default)]
  name: String,
  #[serde(default)]
  version: String,
}

impl Scanner for ProcessToolchain {
  async fn scan(&self, request: ScanRequest) -> Result<ScanReport, ToolError> {
    let scratch = TempDir::new()?;
    let findings_path = scratch.path().join(FINDINGS_FILE);

    let output = Invocation::new(&self.tools.grype)
      .arg(format!("oci-archive:{}", request.archive.display()))
      .arg("--output")
      .arg(&request.output_format)
      .arg("--output")
      .arg(format!("json={}", findings_path.display()))
      .env(SCAN_DB_CACHE_ENV, request.db_cache_dir.to_string_lossy())
      .run()
      .await?;

    let json = tokio::fs::read_to_string(&findings_path).await?;
    let findings = parse_findings(&json).map_err(|message| ToolError::Output {
      program: self.tools.grype.clone(),
      message,
    })?;

    Ok(ScanReport {
      text: output.stdout,
      findings,
    })
  }
}

fn parse_findings(json: &str) -> Result<Vec<Finding>, String> {
  let document: GrypeDocument = serde_json::from_str(json).map_err(|e| e.to_string())?;
  Ok(
    document
      .matches
      .into_iter()
      .map(|m| Finding {
        id: m.vulnerability.id,
        package: if m.artifact.version.is_empty() {
          m.artifact.name
        } else {
          format!("{}@{}", m.artifact.name, m.artifact.version)
        },
        severity: m.vulnerability.severity.parse().unwrap_or(Severity::Unknown),
      })
      .collect(),
  )
}
