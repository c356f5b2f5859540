//! `docker buildx` build engine.
//!
//! Each build writes an OCI layout archive to the requested output path.
//! Exports merge those archives into one layout whose index lists every
//! platform (see [`oci::merge`]).

use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::build::RecipeKind;
use crate::image::{Compression, ImageVariant, oci};
use crate::platform::Platform;

use super::process::Invocation;
use super::{BuildEngine, BuildRequest, ProcessToolchain, ToolError, apko};

impl BuildEngine for ProcessToolchain {
  async fn build(&self, request: BuildRequest) -> Result<ImageVariant, ToolError> {
    let program = match request.kind {
      RecipeKind::Dockerfile => &self.tools.docker,
      RecipeKind::Apko => &self.tools.apko,
    };
    let platform = match &request.platform {
      Some(platform) => platform.clone(),
      None => Platform::host().map_err(|e| ToolError::Output {
        program: program.clone(),
        message: e.to_string(),
      })?,
    };

    if let Some(parent) = request.output.parent() {
      tokio::fs::create_dir_all(parent).await?;
    }

    let invocation = match request.kind {
      RecipeKind::Dockerfile => build_invocation(program, &request),
      RecipeKind::Apko => apko::build_invocation(program, &request, &platform),
    };
    invocation.run().await?;

    Ok(ImageVariant::new(platform, request.output))
  }

  async fn export(&self, variants: &[ImageVariant], compression: Compression, dest: &Path) -> Result<(), ToolError> {
    let sources: Vec<(Platform, PathBuf)> = variants
      .iter()
      .map(|v| (v.platform.clone(), v.archive.clone()))
      .collect();
    let dest = dest.to_path_buf();

    debug!(count = sources.len(), %compression, dest = %dest.display(), "exporting variants");

    tokio::task::spawn_blocking(move || oci::merge(&sources, compression, &dest))
      .await
      .map_err(io::Error::other)??;

    Ok(())
  }
}

fn build_invocation(docker: &str, request: &BuildRequest) -> Invocation {
  let mut invocation = Invocation::new(docker)
    .args(["buildx", "build"])
    .arg("--file")
    .arg(request.context.join(&request.recipe).to_string_lossy());

  if let Some(target) = request.target.as_deref().filter(|t| !t.is_empty()) {
    invocation = invocation.arg("--target").arg(target);
  }
  if let Some(platform) = &request.platform {
    invocation = invocation.arg("--platform").arg(platform.to_string());
  }

  invocation
    .arg("--output")
    .arg(format!("type=oci,dest={}", request.output.display()))
    .arg(request.context.to_string_lossy())
}
