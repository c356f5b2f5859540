mod build;
mod export;
mod import;
mod publish;
mod release;
mod scan;
mod sign;
mod state;

pub use build::{BuildArgs, cmd_build};
pub use export::{ExportArgs, cmd_export};
pub use import::{ImportArgs, cmd_import};
pub use publish::{PublishArgs, cmd_publish};
pub use release::{ReleaseArgs, cmd_release};
pub use scan::{ScanArgs, ScanReportArgs, cmd_scan, cmd_scan_report};
pub use sign::{SignArgs, cmd_sign};
pub use state::{StateArgs, cmd_state};

use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use dockrel_lib::config::PipelineConfig;
use dockrel_lib::error::PreconditionError;
use dockrel_lib::image::{ImageVariant, ImageVariantSet};
use dockrel_lib::pipeline::Pipeline;
use dockrel_lib::platform::{Platform, parse_platforms};
use dockrel_lib::secret::{RegistryAuth, SecretSource};
use dockrel_lib::state::{PipelineState, StateStore};
use dockrel_lib::toolchain::ProcessToolchain;

/// Everything a command needs: resolved config, the pipeline, and the saved state.
pub struct Session {
  pub pipeline: Pipeline<ProcessToolchain>,
  pub store: StateStore,
}

impl Session {
  pub fn open(config_path: Option<&Path>) -> Result<Self> {
    Self::open_with(config_path, |_| {})
  }

  /// Open with command line overrides applied on top of the loaded config.
  pub fn open_with(config_path: Option<&Path>, overrides: impl FnOnce(&mut PipelineConfig)) -> Result<Self> {
    let mut config = PipelineConfig::load(config_path).context("Failed to load configuration")?;
    overrides(&mut config);
    let store = StateStore::new(config.paths.state_dir());
    debug!(state = %store.path().display(), work_dir = %config.paths.work_dir().display(), "session opened");
    let pipeline = Pipeline::new(ProcessToolchain::new(config.tools.clone()), config);
    Ok(Self { pipeline, store })
  }

  pub fn config(&self) -> &PipelineConfig {
    self.pipeline.config()
  }

  pub fn load_state(&self) -> Result<PipelineState> {
    self
      .store
      .load()
      .with_context(|| format!("Failed to load pipeline state from {}", self.store.path().display()))
  }

  pub fn save_state(&self, state: &PipelineState) -> Result<()> {
    self
      .store
      .save(state)
      .with_context(|| format!("Failed to save pipeline state to {}", self.store.path().display()))
  }
}

pub fn runtime() -> Result<tokio::runtime::Runtime> {
  tokio::runtime::Runtime::new().context("Failed to create async runtime")
}

/// Parse a comma separated platform list; `None` or blank means none.
pub fn platforms(csv: Option<&str>) -> Result<Vec<Platform>> {
  Ok(parse_platforms(csv.unwrap_or_default())?)
}

/// The built variant for `platform`, if one was requested.
pub fn select_variant(state: &PipelineState, platform: Option<&Platform>) -> Result<Option<ImageVariant>> {
  platform.map(|p| built_variant(state, p)).transpose()
}

/// The built variants for `platforms`, in the order given. Empty selects none.
pub fn select_variants(state: &PipelineState, platforms: &[Platform]) -> Result<Option<ImageVariantSet>> {
  if platforms.is_empty() {
    return Ok(None);
  }
  let mut variants = Vec::with_capacity(platforms.len());
  for platform in platforms {
    variants.push(built_variant(state, platform)?);
  }
  Ok(Some(ImageVariantSet::new(variants)))
}

fn built_variant(state: &PipelineState, platform: &Platform) -> Result<ImageVariant> {
  let variant = state
    .variants()
    .find(platform)
    .cloned()
    .ok_or_else(|| PreconditionError::PlatformNotBuilt(platform.to_string()))?;
  Ok(variant)
}

/// Registry credentials from a username and a secret reference.
pub fn registry_auth(username: Option<&str>, password: Option<&SecretSource>) -> Result<Option<RegistryAuth>> {
  match (username, password) {
    (Some(username), Some(password)) => {
      let secret = password.load().context("Failed to load registry password")?;
      Ok(Some(RegistryAuth::new(username, secret)))
    }
    (None, None) => Ok(None),
    _ => anyhow::bail!("registry username and password must be given together"),
  }
}
