//! Test utilities for dockrel-lib.
//!
//! [`FakeToolchain`] implements every collaborator trait in memory. Builds
//! and pulls write a small placeholder archive, scans report the findings registered
//! for a path prefix, and every call is recorded for assertions.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use crate::image::{Compression, Digest, ImageVariant, ImageVariantSet};
use crate::platform::Platform;
use crate::platform::arch::Arch;
use crate::platform::os::Os;
use crate::scan::Severity;
use crate::secret::RegistryAuth;
use crate::toolchain::{
  BuildEngine, BuildRequest, Finding, PullRequest, Registry, ScanReport, ScanRequest, SignRequest, Scanner, Signer,
  ToolError,
};

#[derive(Debug, Default)]
struct Calls {
  builds: Vec<BuildRequest>,
  exports: Vec<(Vec<Platform>, Compression, PathBuf)>,
  scans: Vec<ScanRequest>,
  logins: Vec<String>,
  publishes: Vec<String>,
  pulls: Vec<PullRequest>,
  signs: Vec<Digest>,
  /// Archive path to the context it was built from.
  built_from: HashMap<PathBuf, PathBuf>,
}

#[derive(Debug, Default)]
pub struct FakeToolchain {
  build_delays: HashMap<String, Duration>,
  failing_builds: HashSet<String>,
  findings: Vec<(PathBuf, Vec<Severity>)>,
  scan_fails: bool,
  failing_publishes: HashSet<String>,
  failing_pulls: HashSet<String>,
  sign_fails: bool,
  calls: Mutex<Calls>,
}

impl FakeToolchain {
  pub fn new() -> Self {
    Self::default()
  }

  /// Delay the build for `platform` (rendered as `os/arch[/variant]`).
  pub fn with_build_delay(mut self, platform: &str, delay: Duration) -> Self {
    self.build_delays.insert(platform.to_string(), delay);
    self
  }

  pub fn failing_build(mut self, platform: &str) -> Self {
    self.failing_builds.insert(platform.to_string());
    self
  }

  /// Report `severities` for any image whose archive or build context lies under `prefix`.
  pub fn with_findings(mut self, prefix: &str, severities: &[Severity]) -> Self {
    self.findings.push((PathBuf::from(prefix), severities.to_vec()));
    self
  }

  pub fn failing_scan(mut self) -> Self {
    self.scan_fails = true;
    self
  }

  pub fn failing_publish(mut self, address: &str) -> Self {
    self.failing_publishes.insert(address.to_string());
    self
  }

  pub fn failing_pull(mut self, platform: &str) -> Self {
    self.failing_pulls.insert(platform.to_string());
    self
  }

  pub fn failing_sign(mut self) -> Self {
    self.sign_fails = true;
    self
  }

  /// The digest a publish to `address` returns.
  pub fn digest_for(address: &str) -> Digest {
    Digest::new(format!("{address}@sha256:fake"))
  }

  pub fn builds(&self) -> Vec<BuildRequest> {
    self.calls.lock().unwrap().builds.clone()
  }

  pub fn exports(&self) -> Vec<(Vec<Platform>, Compression, PathBuf)> {
    self.calls.lock().unwrap().exports.clone()
  }

  pub fn scans(&self) -> Vec<ScanRequest> {
    self.calls.lock().unwrap().scans.clone()
  }

  pub fn logins(&self) -> Vec<String> {
    self.calls.lock().unwrap().logins.clone()
  }

  pub fn publishes(&self) -> Vec<String> {
    self.calls.lock().unwrap().publishes.clone()
  }

  pub fn pulls(&self) -> Vec<PullRequest> {
    self.calls.lock().unwrap().pulls.clone()
  }

  pub fn signs(&self) -> Vec<Digest> {
    self.calls.lock().unwrap().signs.clone()
  }

  fn severities_for(&self, archive: &Path) -> Vec<Severity> {
    let context = self.calls.lock().unwrap().built_from.get(archive).cloned();
    self
      .findings
      .iter()
      .filter(|(prefix, _)| {
        archive.starts_with(prefix) || context.as_ref().is_some_and(|c| c.starts_with(prefix))
      })
      .flat_map(|(_, severities)| severities.iter().copied())
      .collect()
  }

  fn failed(program: &str, message: &str) -> ToolError {
    ToolError::Failed {
      program: program.to_string(),
      code: Some(1),
      stderr: message.to_string(),
    }
  }
}

impl BuildEngine for FakeToolchain {
  async fn build(&self, request: BuildRequest) -> Result<ImageVariant, ToolError> {
    let platform = match &request.platform {
      Some(platform) => platform.clone(),
      None => Platform::new(Os::linux(), Arch::amd64()),
    };
    let key = platform.to_string();

    self.calls.lock().unwrap().builds.push(request.clone());

    if let Some(delay) = self.build_delays.get(&key) {
      tokio::time::sleep(*delay).await;
    }
    if self.failing_builds.contains(&key) {
      return Err(Self::failed("docker", &format!("build failed for {key}")));
    }

    if let Some(parent) = request.output.parent() {
      tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&request.output, key.as_bytes()).await?;

    self
      .calls
      .lock()
      .unwrap()
      .built_from
      .insert(request.output.clone(), request.context.clone());

    Ok(ImageVariant::new(platform, request.output))
  }

  async fn export(&self, variants: &[ImageVariant], compression: Compression, dest: &Path) -> Result<(), ToolError> {
    if let Some(parent) = dest.parent() {
      tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(dest, b"fake export").await?;

    let platforms = variants.iter().map(|v| v.platform.clone()).collect();
    self
      .calls
      .lock()
      .unwrap()
      .exports
      .push((platforms, compression, dest.to_path_buf()));
    Ok(())
  }
}

impl Scanner for FakeToolchain {
  async fn scan(&self, request: ScanRequest) -> Result<ScanReport, ToolError> {
    self.calls.lock().unwrap().scans.push(request.clone());

    if self.scan_fails {
      return Err(Self::failed("grype", "vulnerability database unavailable"));
    }

    let findings: Vec<Finding> = self
      .severities_for(&request.variant.archive)
      .into_iter()
      .enumerate()
      .map(|(i, severity)| Finding {
        id: format!("CVE-0000-{i:04}"),
        package: "libfake".to_string(),
        severity,
      })
      .collect();

    let text = format!(
      "{} findings for {} ({})",
      findings.len(),
      request.variant.platform,
      request.output_format
    );
    Ok(ScanReport { text, findings })
  }
}

impl Registry for FakeToolchain {
  async fn login(&self, address: &str, _auth: &RegistryAuth) -> Result<(), ToolError> {
    self.calls.lock().unwrap().logins.push(address.to_string());
    Ok(())
  }

  async fn publish(&self, address: &str, _variants: &ImageVariantSet) -> Result<Digest, ToolError> {
    self.calls.lock().unwrap().publishes.push(address.to_string());

    if self.failing_publishes.contains(address) {
      return Err(Self::failed("crane", &format!("push to {address} denied")));
    }
    Ok(Self::digest_for(address))
  }

  async fn pull(&self, request: PullRequest) -> Result<ImageVariant, ToolError> {
    let platform = match &request.platform {
      Some(platform) => platform.clone(),
      None => Platform::new(Os::linux(), Arch::amd64()),
    };
    let key = platform.to_string();

    self.calls.lock().unwrap().pulls.push(request.clone());

    if self.failing_pulls.contains(&key) {
      return Err(Self::failed("crane", &format!("manifest unknown for {key}")));
    }
    if let Some(parent) = request.output.parent() {
      tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&request.output, key.as_bytes()).await?;
    Ok(ImageVariant::new(platform, request.output))
  }
}

impl Signer for FakeToolchain {
  async fn sign(&self, request: SignRequest) -> Result<String, ToolError> {
    self.calls.lock().unwrap().signs.push(request.subject.clone());

    if self.sign_fails {
      return Err(Self::failed("cosign", "signing key rejected"));
    }
    Ok(format!("signed {}", request.subject))
  }
}
