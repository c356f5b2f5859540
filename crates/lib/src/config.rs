//! Pipeline configuration.
//!
//! Every field has a default, so an absent or partial `dockrel.toml` is valid.
//! Values resolve as: command line flag > config file > default. The file is
//! taken from `--config`, then `$DOCKREL_CONFIG`, then
//! `{config_dir}/dockrel.toml` if it exists.
//!
//! ```toml
//! [tools]
//! docker = "docker"
//! grype = "grype"
//! crane = "crane"
//! cosign = "cosign"
//! apko = "apko"
//!
//! [build]
//! kind = "dockerfile"       # or "apko"
//! recipe = "Dockerfile"     # default follows kind
//!
//! [scan]
//! output_format = "table"
//! release_fail_on = "critical"
//! policy = "enforce"        # or "report-only"
//!
//! [release]
//! tag = "latest"
//!
//! [paths]
//! work_dir = "/var/tmp/dockrel"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::build::RecipeKind;
use crate::consts::{CONFIG_ENV, CONFIG_FILENAME, DEFAULT_RELEASE_TAG, DEFAULT_SCAN_OUTPUT_FORMAT};
use crate::platform::paths;
use crate::scan::{GatePolicy, ScanPaths, Severity};

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse config {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },
}

/// Names or paths of the external tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
  pub docker: String,
  pub grype: String,
  pub crane: String,
  pub cosign: String,
  pub apko: String,
}

impl Default for ToolsConfig {
  fn default() -> Self {
    Self {
      docker: "docker".to_string(),
      grype: "grype".to_string(),
      crane: "crane".to_string(),
      cosign: "cosign".to_string(),
      apko: "apko".to_string(),
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
  pub kind: RecipeKind,
  /// Recipe path relative to the context, and the filename `release` discovers.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub recipe: Option<PathBuf>,
  /// Target stage; empty means the final stage.
  pub target: String,
}

impl BuildConfig {
  /// The configured recipe, or the conventional one for `kind`.
  pub fn recipe(&self) -> PathBuf {
    self
      .recipe
      .clone()
      .unwrap_or_else(|| PathBuf::from(self.kind.default_recipe()))
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
  pub output_format: String,
  /// Floor `release` applies when scanning without an explicit floor.
  pub release_fail_on: Severity,
  pub policy: GatePolicy,
}

impl Default for ScanConfig {
  fn default() -> Self {
    Self {
      output_format: DEFAULT_SCAN_OUTPUT_FORMAT.to_string(),
      release_fail_on: Severity::Critical,
      policy: GatePolicy::Enforce,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseConfig {
  pub tag: String,
}

impl Default for ReleaseConfig {
  fn default() -> Self {
    Self {
      tag: DEFAULT_RELEASE_TAG.to_string(),
    }
  }
}

/// Directory overrides; unset entries fall back to the XDG locations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
  pub work_dir: Option<PathBuf>,
  pub scan_cache_dir: Option<PathBuf>,
  pub state_dir: Option<PathBuf>,
}

impl PathsConfig {
  pub fn work_dir(&self) -> PathBuf {
    self.work_dir.clone().unwrap_or_else(paths::work_dir)
  }

  pub fn scan_cache_dir(&self) -> PathBuf {
    self.scan_cache_dir.clone().unwrap_or_else(paths::scan_cache_dir)
  }

  pub fn state_dir(&self) -> PathBuf {
    self.state_dir.clone().unwrap_or_else(paths::data_dir)
  }

  pub fn scan_paths(&self) -> ScanPaths {
    ScanPaths {
      work_dir: self.work_dir(),
      db_cache_dir: self.scan_cache_dir(),
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
  pub tools: ToolsConfig,
  pub build: BuildConfig,
  pub scan: ScanConfig,
  pub release: ReleaseConfig,
  pub paths: PathsConfig,
}

impl PipelineConfig {
  /// Load from `explicit`, `$DOCKREL_CONFIG`, or the default location, in that order.
  ///
  /// An explicit or environment-provided path must exist; the default
  /// location is optional.
  pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
    if let Some(path) = explicit {
      return Self::from_file(path);
    }
    if let Ok(path) = std::env::var(CONFIG_ENV) {
      return Self::from_file(Path::new(&path));
    }

    let default_path = paths::config_dir().join(CONFIG_FILENAME);
    if default_path.is_file() {
      return Self::from_file(&default_path);
    }

    debug!("no config file found, using defaults");
    Ok(Self::default())
  }

  pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })?;
    debug!(path = %path.display(), "loaded config");
    Ok(config)
  }
}
