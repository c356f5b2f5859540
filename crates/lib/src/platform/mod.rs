pub mod arch;
mod ident;
pub mod os;
pub mod paths;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use arch::Arch;
use os::Os;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlatformError {
  #[error("invalid platform '{input}': {reason}")]
  Invalid { input: String, reason: String },

  #[error("could not detect the host platform (architecture {0} is not supported)")]
  UnknownHost(&'static str),
}

/// Image platform identifier (e.g., "linux/arm64/v8")
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Platform {
  pub os: Os,
  pub arch: Arch,
  pub variant: Option<String>,
}

impl Platform {
  pub fn new(os: Os, arch: Arch) -> Self {
    Self { os, arch, variant: None }
  }

  pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
    self.variant = Some(variant.into());
    self
  }

  /// The platform images are built for when no platform is requested.
  ///
  /// Container images are always Linux images, so only the architecture is detected.
  pub fn host() -> Result<Self, PlatformError> {
    let arch = Arch::current().ok_or(PlatformError::UnknownHost(std::env::consts::ARCH))?;
    Ok(Self::new(Os::linux(), arch))
  }

  /// Filesystem and tag safe form, e.g. "linux-arm-v7".
  pub fn slug(&self) -> String {
    match &self.variant {
      Some(variant) => format!("{}-{}-{}", self.os, self.arch, variant),
      None => format!("{}-{}", self.os, self.arch),
    }
  }
}

impl fmt::Display for Platform {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.os, self.arch)?;
    if let Some(variant) = &self.variant {
      write!(f, "/{}", variant)?;
    }
    Ok(())
  }
}

impl FromStr for Platform {
  type Err = PlatformError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let invalid = |reason: String| PlatformError::Invalid {
      input: s.to_string(),
      reason,
    };

    let parts: Vec<&str> = s.trim().split('/').collect();
    let (os, arch, variant) = match parts.as_slice() {
      [os, arch] => (*os, *arch, None),
      [os, arch, variant] if !variant.is_empty() => (*os, *arch, Some(variant.to_string())),
      _ => return Err(invalid("expected os/arch[/variant]".to_string())),
    };

    Ok(Self {
      os: os.parse().map_err(invalid)?,
      arch: arch.parse().map_err(invalid)?,
      variant,
    })
  }
}

impl TryFrom<String> for Platform {
  type Error = PlatformError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    value.parse()
  }
}

impl From<Platform> for String {
  fn from(value: Platform) -> Self {
    value.to_string()
  }
}

/// Parse a comma-separated platform list.
///
/// Blank entries are ignored and duplicates are dropped, keeping the first occurrence,
/// so the result is an ordered set in request order.
pub fn parse_platforms(csv: &str) -> Result<Vec<Platform>, PlatformError> {
  let mut platforms: Vec<Platform> = Vec::new();
  for entry in csv.split(',').map(str::trim).filter(|e| !e.is_empty()) {
    let platform: Platform = entry.parse()?;
    if !platforms.contains(&platform) {
      platforms.push(platform);
    }
  }
  Ok(platforms)
}
