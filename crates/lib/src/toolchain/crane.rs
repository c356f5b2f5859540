//! `crane` registry client.
//!
//! A manifest list is published by pushing each variant under a per-platform
//! tag, assembling an index from those manifests at the target address, and
//! then asking the registry for the index digest. Imports pull one platform
//! at a time as an OCI layout and pack it into an archive.

use std::io;
use std::path::Path;

use crate::image::{Digest, ImageVariant, ImageVariantSet, oci};
use crate::platform::Platform;
use crate::secret::RegistryAuth;

use super::process::Invocation;
use super::{ProcessToolchain, PullRequest, Registry, ToolError};

const DEFAULT_REGISTRY: &str = "index.docker.io";

impl Registry for ProcessToolchain {
  async fn login(&self, address: &str, auth: &RegistryAuth) -> Result<(), ToolError> {
    Invocation::new(&self.tools.crane)
      .args(["auth", "login", registry_host(address)])
      .arg("--username")
      .arg(&auth.username)
      .arg("--password-stdin")
      .secret_stdin(&auth.password)
      .run()
      .await?;
    Ok(())
  }

  async fn publish(&self, address: &str, variants: &ImageVariantSet) -> Result<Digest, ToolError> {
    let mut index = Invocation::new(&self.tools.crane)
      .args(["index", "append"])
      .arg("--tag")
      .arg(address);

    for variant in variants {
      let platform_ref = platform_reference(address, &variant.platform.slug());
      Invocation::new(&self.tools.crane)
        .arg("push")
        .arg(variant.archive.to_string_lossy())
        .arg(&platform_ref)
        .run()
        .await?;
      index = index.arg("--manifest").arg(platform_ref);
    }

    index.run().await?;

    let output = Invocation::new(&self.tools.crane).arg("digest").arg(address).run().await?;
    let sha = output.stdout.lines().last().unwrap_or_default().trim();
    if !sha.contains(':') {
      return Err(ToolError::Output {
        program: self.tools.crane.clone(),
        message: format!("expected a digest for {address}, got '{sha}'"),
      });
    }

    Ok(Digest::new(format!("{}@{}", repository(address), sha)))
  }

  async fn pull(&self, request: PullRequest) -> Result<ImageVariant, ToolError> {
    let platform = match &request.platform {
      Some(platform) => platform.clone(),
      None => Platform::host().map_err(|e| ToolError::Output {
        program: self.tools.crane.clone(),
        message: e.to_string(),
      })?,
    };

    let parent = request.output.parent().unwrap_or(Path::new("."));
    tokio::fs::create_dir_all(parent).await?;
    let scratch = tempfile::Builder::new().prefix(".pull-").tempdir_in(parent)?;
    let layout = scratch.path().join("layout");

    pull_invocation(&self.tools.crane, &request.address, &platform, &layout)
      .run()
      .await?;

    let output = request.output.clone();
    tokio::task::spawn_blocking(move || oci::archive_layout(&layout, &output))
      .await
      .map_err(io::Error::other)??;

    Ok(ImageVariant::new(platform, request.output))
  }
}

fn pull_invocation(crane: &str, address: &str, platform: &Platform, layout: &Path) -> Invocation {
  Invocation::new(crane)
    .arg("pull")
    .arg("--platform")
    .arg(platform.to_string())
    .args(["--format", "oci"])
    .arg(address)
    .arg(layout.to_string_lossy())
}

/// Split `address` into repository and optional tag.
///
/// A colon only starts a tag when it comes after the last slash, so registry
/// ports (`localhost:5000/app`) are left alone.
fn split_tag(address: &str) -> (&str, Option<&str>) {
  let name_start = address.rfind('/').map(|i| i + 1).unwrap_or(0);
  match address[name_start..].rfind(':') {
    Some(i) => (&address[..name_start + i], Some(&address[name_start + i + 1..])),
    None => (address, None),
  }
}

fn repository(address: &str) -> &str {
  let without_digest = address.split('@').next().unwrap_or(address);
  split_tag(without_digest).0
}

/// Tag used for one platform's image before it is folded into the index.
fn platform_reference(address: &str, slug: &str) -> String {
  match split_tag(address) {
    (repo, Some(tag)) => format!("{repo}:{tag}-{slug}"),
    (repo, None) => format!("{repo}:{slug}"),
  }
}

/// Registry host an address lives on, using Docker's rules for the first path segment.
fn registry_host(address: &str) -> &str {
  match address.split_once('/') {
    Some((first, _)) if first.contains('.') || first.contains(':') || first == "localhost" => first,
    _ => DEFAULT_REGISTRY,
  }
}
