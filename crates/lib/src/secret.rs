//! Opaque secret values.
//!
//! A [`Secret`] never prints its contents: `Debug` and `Display` render a
//! placeholder, and there is no `Serialize` impl. The only way to read the value
//! is [`Secret::reveal`], which is called where a secret is handed to an
//! external tool and nowhere else.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

const REDACTED: &str = "[redacted]";

#[derive(Debug, Error)]
pub enum SecretError {
  /// The offending text is not echoed; it may be the secret itself.
  #[error("invalid secret reference: expected env:NAME or file:PATH")]
  InvalidReference,

  #[error("environment variable {0} is not set")]
  MissingEnv(String),

  #[error("failed to read secret file {path}: {source}")]
  ReadFile {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
  pub fn new(value: impl Into<String>) -> Self {
    Self(value.into())
  }

  /// Plaintext value. Call only at the point of invoking a collaborator.
  pub fn reveal(&self) -> &str {
    &self.0
  }
}

impl fmt::Debug for Secret {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(REDACTED)
  }
}

impl fmt::Display for Secret {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(REDACTED)
  }
}

/// Where a secret is loaded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretSource {
  Env(String),
  File(PathBuf),
}

impl SecretSource {
  pub fn load(&self) -> Result<Secret, SecretError> {
    match self {
      SecretSource::Env(name) => std::env::var(name)
        .map(Secret::new)
        .map_err(|_| SecretError::MissingEnv(name.clone())),
      SecretSource::File(path) => std::fs::read_to_string(path)
        .map(|content| Secret::new(content.trim_end_matches(['\r', '\n'])))
        .map_err(|source| SecretError::ReadFile {
          path: path.clone(),
          source,
        }),
    }
  }
}

impl FromStr for SecretSource {
  type Err = SecretError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.split_once(':') {
      Some(("env", name)) if !name.is_empty() => Ok(SecretSource::Env(name.to_string())),
      Some(("file", path)) if !path.is_empty() => Ok(SecretSource::File(PathBuf::from(path))),
      _ => Err(SecretError::InvalidReference),
    }
  }
}

/// Username and password for one registry.
#[derive(Debug, Clone)]
pub struct RegistryAuth {
  pub username: String,
  pub password: Secret,
}

impl RegistryAuth {
  pub fn new(username: impl Into<String>, password: Secret) -> Self {
    Self {
      username: username.into(),
      password,
    }
  }
}
