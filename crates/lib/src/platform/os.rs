use std::fmt;
use std::str::FromStr;

use super::ident::{self, Ident};

/// Operating system a container image targets (`linux`, `windows`, `freebsd`, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Os(Ident);

impl Os {
  pub fn linux() -> Self {
    Self(Ident::known("linux"))
  }

  pub fn as_str(&self) -> &str {
    self.0.as_str()
  }
}

impl fmt::Display for Os {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Os {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    ident::parse(s, "operating system").map(Self)
  }
}
