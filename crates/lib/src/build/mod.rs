//! Multi-platform build fan-out.
//!
//! One engine call per requested platform, all running concurrently on a
//! [`JoinSet`]. Results land in per-platform slots indexed by request order,
//! so the returned set matches the request whatever order calls finish in.
//! The first failure aborts the remaining calls, drains the set, and is
//! returned on its own; no partial set is ever produced.
//!
//! `import` reuses the same fan-out with registry pulls in place of builds.

mod types;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::image::{ImageVariant, ImageVariantSet};
use crate::platform::Platform;
use crate::toolchain::{BuildEngine, BuildRequest, ToolError};

pub use types::{BuildTarget, RecipeKind};

const HOST_LABEL: &str = "host";

#[derive(Debug, Error)]
pub enum BuildError {
  #[error("{step} for {platform} failed: {source}")]
  Platform {
    step: &'static str,
    platform: String,
    #[source]
    source: ToolError,
  },

  #[error("build task failed: {0}")]
  Task(String),

  #[error("failed to prepare build output directory: {0}")]
  Io(#[from] std::io::Error),
}

/// Build `target` once per requested platform and collect the variants in request order.
///
/// Archives are written under a fresh `build-*` directory inside `work_dir`.
pub async fn build_variants<E>(engine: Arc<E>, target: &BuildTarget, work_dir: &Path) -> Result<ImageVariantSet, BuildError>
where
  E: BuildEngine,
{
  info!(
    context = %target.context.display(),
    kind = %target.kind,
    recipe = %target.recipe.display(),
    platforms = target.platforms.len().max(1),
    "starting build"
  );

  fan_out(&target.platforms, work_dir, "build", |platform, output| {
    let request = BuildRequest {
      context: target.context.clone(),
      kind: target.kind,
      recipe: target.recipe.clone(),
      target: target.target.clone(),
      platform,
      output,
    };
    let engine = Arc::clone(&engine);
    async move { engine.build(request).await }
  })
  .await
}

/// Run `start` once per platform (or once for the host when `platforms` is
/// empty) and collect the variants in request order.
///
/// Each call is handed an archive path under a fresh `{step}-*` directory in
/// `work_dir`. On failure that directory is removed.
pub(crate) async fn fan_out<F, Fut>(
  platforms: &[Platform],
  work_dir: &Path,
  step: &'static str,
  mut start: F,
) -> Result<ImageVariantSet, BuildError>
where
  F: FnMut(Option<Platform>, PathBuf) -> Fut,
  Fut: Future<Output = Result<ImageVariant, ToolError>> + Send + 'static,
{
  let requested: Vec<Option<Platform>> = if platforms.is_empty() {
    vec![None]
  } else {
    platforms.iter().cloned().map(Some).collect()
  };

  tokio::fs::create_dir_all(work_dir).await?;
  let out_dir = tempfile::Builder::new()
    .prefix(&format!("{step}-"))
    .tempdir_in(work_dir)?
    .keep();

  let mut join_set = JoinSet::new();
  for (index, platform) in requested.iter().enumerate() {
    let output = out_dir.join(format!("{}.tar", label(platform).replace('/', "-")));
    let call = start(platform.clone(), output);

    debug!(step, platform = %label(platform), "spawning");
    join_set.spawn(async move { (index, call.await) });
  }

  let mut slots: Vec<Option<ImageVariant>> = vec![None; requested.len()];

  while let Some(joined) = join_set.join_next().await {
    let failure = match joined {
      Ok((index, Ok(variant))) => {
        info!(step, platform = %variant.platform, "platform succeeded");
        slots[index] = Some(variant);
        continue;
      }
      Ok((index, Err(source))) => BuildError::Platform {
        step,
        platform: label(&requested[index]),
        source,
      },
      Err(e) => BuildError::Task(e.to_string()),
    };

    error!(error = %failure, "platform failed, cancelling the rest");
    join_set.abort_all();
    while join_set.join_next().await.is_some() {}
    discard(&out_dir).await;
    return Err(failure);
  }

  let variants: Option<Vec<ImageVariant>> = slots.into_iter().collect();
  let variants = variants.ok_or_else(|| BuildError::Task(format!("a {step} finished without a result")))?;

  Ok(ImageVariantSet::new(variants))
}

fn label(platform: &Option<Platform>) -> String {
  platform
    .as_ref()
    .map(ToString::to_string)
    .unwrap_or_else(|| HOST_LABEL.to_string())
}

async fn discard(dir: &Path) {
  if let Err(e) = tokio::fs::remove_dir_all(dir).await {
    debug!(dir = %dir.display(), error = %e, "could not remove partial output");
  }
}
