//! `apko` build engine.
//!
//! apko assembles an image from an apk-based YAML configuration instead of a
//! Dockerfile. It runs from the configuration's directory and writes one
//! archive per call, so builds for several platforms fan out exactly like
//! `docker buildx` builds. Exports go through the same layout merge.

use std::path::PathBuf;

use crate::platform::Platform;

use super::BuildRequest;
use super::process::Invocation;

/// Tag recorded inside the archive; the published address is chosen later.
const LOCAL_TAG: &str = "image:latest";

pub(super) fn build_invocation(apko: &str, request: &BuildRequest, platform: &Platform) -> Invocation {
  let file_name = request
    .recipe
    .file_name()
    .map(|name| name.to_string_lossy().into_owned())
    .unwrap_or_else(|| request.recipe.to_string_lossy().into_owned());
  // apko runs from another directory, so the output path must not be relative.
  let output = std::path::absolute(&request.output).unwrap_or_else(|_| request.output.clone());

  Invocation::new(apko)
    .arg("build")
    .arg("--arch")
    .arg(arch(platform))
    .arg(file_name)
    .arg(LOCAL_TAG)
    .arg(output.to_string_lossy())
    .current_dir(workdir(request))
}

/// apko names architectures the way OCI does, with the variant appended.
fn arch(platform: &Platform) -> String {
  match &platform.variant {
    Some(variant) => format!("{}/{}", platform.arch, variant),
    None => platform.arch.to_string(),
  }
}

/// Directory apko runs in: the one holding the configuration.
fn workdir(request: &BuildRequest) -> PathBuf {
  let config = request.context.join(&request.recipe);
  config.parent().unwrap_or(request.context.as_path()).to_path_buf()
}
