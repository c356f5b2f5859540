use std::fmt;
use std::str::FromStr;

use super::ident::{self, Ident};

/// CPU architecture of an image variant, named the way OCI image indexes name it.
///
/// Any lowercase identifier is accepted so that platforms the registry and build
/// engine understand (`mips64le`, `loong64`, ...) pass through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Arch(Ident);

impl Arch {
  pub fn amd64() -> Self {
    Self(Ident::known("amd64"))
  }

  pub fn arm64() -> Self {
    Self(Ident::known("arm64"))
  }

  /// Detect the architecture of the running system
  pub fn current() -> Option<Self> {
    host_arch(std::env::consts::ARCH, cfg!(target_endian = "little")).map(|name| Self(Ident::known(name)))
  }

  pub fn as_str(&self) -> &str {
    self.0.as_str()
  }
}

/// Map a Rust target architecture onto its OCI name.
fn host_arch(rust_arch: &str, little_endian: bool) -> Option<&'static str> {
  let name = match rust_arch {
    "x86_64" => "amd64",
    "aarch64" => "arm64",
    "arm" => "arm",
    "x86" => "386",
    "powerpc64" if little_endian => "ppc64le",
    "powerpc64" => "ppc64",
    "mips64" if little_endian => "mips64le",
    "mips64" => "mips64",
    "s390x" => "s390x",
    "riscv64" => "riscv64",
    "loongarch64" => "loong64",
    _ => return None,
  };
  Some(name)
}

impl fmt::Display for Arch {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Arch {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    ident::parse(s, "architecture").map(Self)
  }
}
