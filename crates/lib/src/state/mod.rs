//! Pipeline state threaded between steps.
//!
//! [`PipelineState`] is an immutable value: every step that changes it returns
//! a new one. [`StateStore`] persists it between command invocations.

mod store;

pub use store::{StateError, StateStore};

use serde::{Deserialize, Serialize};

use crate::image::{Digest, ImageVariantSet};

/// The current variant set and the last published digest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineState {
  #[serde(default)]
  variants: ImageVariantSet,
  #[serde(default)]
  digest: Option<Digest>,
}

impl PipelineState {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn variants(&self) -> &ImageVariantSet {
    &self.variants
  }

  pub fn digest(&self) -> Option<&Digest> {
    self.digest.as_ref()
  }

  /// A copy with the variant set replaced. Earlier variants are dropped, never merged.
  pub fn with_variants(&self, variants: ImageVariantSet) -> Self {
    Self {
      variants,
      digest: self.digest.clone(),
    }
  }

  pub fn with_digest(&self, digest: Digest) -> Self {
    Self {
      variants: self.variants.clone(),
      digest: Some(digest),
    }
  }
}
