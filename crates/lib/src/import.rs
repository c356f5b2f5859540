//! Import of already published images.
//!
//! Pulls one archive per platform from a registry address, using the same
//! fan-out as builds, so an imported set can be scanned, exported, re-published
//! and signed like a built one.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::build::{BuildError, fan_out};
use crate::image::ImageVariantSet;
use crate::platform::Platform;
use crate::toolchain::{PullRequest, Registry};

/// Pull `address` once per platform into a fresh `import-*` directory inside `work_dir`.
pub async fn pull_variants<R>(
  registry: Arc<R>,
  address: &str,
  platforms: &[Platform],
  work_dir: &Path,
) -> Result<ImageVariantSet, BuildError>
where
  R: Registry,
{
  info!(address, platforms = platforms.len().max(1), "starting import");

  fan_out(platforms, work_dir, "import", |platform, output| {
    let request = PullRequest {
      address: address.to_string(),
      platform,
      output,
    };
    let registry = Arc::clone(&registry);
    async move { registry.pull(request).await }
  })
  .await
}
