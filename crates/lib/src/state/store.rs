//! On-disk persistence for [`PipelineState`].
//!
//! ```text
//! {state_dir}/
//! └── state.json    # { "version": 1, "state": { "variants": [...], "digest": ... } }
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::PipelineState;
use crate::consts::{STATE_FILENAME, STATE_VERSION};
use crate::image::discard_archives;

#[derive(Debug, Error)]
pub enum StateError {
  #[error("failed to create state directory: {0}")]
  CreateDir(#[source] io::Error),

  #[error("failed to read state: {0}")]
  Read(#[source] io::Error),

  #[error("failed to write state: {0}")]
  Write(#[source] io::Error),

  #[error("failed to parse state: {0}")]
  Parse(#[source] serde_json::Error),

  #[error("failed to serialize state: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error("unsupported state version: {0}")]
  UnsupportedVersion(u32),

  #[error("failed to remove image archives: {0}")]
  Discard(#[source] io::Error),
}

#[derive(Serialize, Deserialize)]
struct StateFile {
  version: u32,
  state: PipelineState,
}

/// Reads and writes `state.json` under a directory.
#[derive(Debug, Clone)]
pub struct StateStore {
  dir: PathBuf,
}

impl StateStore {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self { dir: dir.into() }
  }

  pub fn path(&self) -> PathBuf {
    self.dir.join(STATE_FILENAME)
  }

  /// Load the saved state, or an empty one if nothing was saved yet.
  pub fn load(&self) -> Result<PipelineState, StateError> {
    let path = self.path();
    let content = match fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(PipelineState::default()),
      Err(e) => return Err(StateError::Read(e)),
    };

    let file: StateFile = serde_json::from_str(&content).map_err(StateError::Parse)?;
    if file.version != STATE_VERSION {
      return Err(StateError::UnsupportedVersion(file.version));
    }
    Ok(file.state)
  }

  /// Save `state`, replacing what was there. Write to temp, then rename.
  pub fn save(&self, state: &PipelineState) -> Result<(), StateError> {
    fs::create_dir_all(&self.dir).map_err(StateError::CreateDir)?;

    let file = StateFile {
      version: STATE_VERSION,
      state: state.clone(),
    };
    let content = serde_json::to_string_pretty(&file).map_err(StateError::Serialize)?;

    let path = self.path();
    let temp_path = temp_path(&path);
    fs::write(&temp_path, content).map_err(StateError::Write)?;
    fs::rename(&temp_path, &path).map_err(StateError::Write)?;

    debug!(path = %path.display(), "saved pipeline state");
    Ok(())
  }

  /// Remove the saved state and the archives it points into under `work_dir`.
  ///
  /// A missing file is not an error. An unreadable one is removed without
  /// touching any archives.
  pub fn clear(&self, work_dir: &Path) -> Result<(), StateError> {
    if let Ok(state) = self.load() {
      discard_archives(state.variants(), work_dir).map_err(StateError::Discard)?;
    }

    match fs::remove_file(self.path()) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(StateError::Write(e)),
    }
  }
}

fn temp_path(path: &Path) -> PathBuf {
  let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
  name.push(".tmp");
  path.with_file_name(name)
}
