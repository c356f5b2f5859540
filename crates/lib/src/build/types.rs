//! Build target definition.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::consts::{DEFAULT_APKO_RECIPE, DEFAULT_RECIPE};
use crate::platform::Platform;

/// Which engine a recipe is written for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipeKind {
  /// A Dockerfile built with `docker buildx`.
  #[default]
  Dockerfile,
  /// An apko YAML configuration.
  Apko,
}

impl RecipeKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      RecipeKind::Dockerfile => "dockerfile",
      RecipeKind::Apko => "apko",
    }
  }

  /// Conventional recipe filename for this kind.
  pub fn default_recipe(&self) -> &'static str {
    match self {
      RecipeKind::Dockerfile => DEFAULT_RECIPE,
      RecipeKind::Apko => DEFAULT_APKO_RECIPE,
    }
  }
}

impl fmt::Display for RecipeKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for RecipeKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "dockerfile" | "docker" => Ok(RecipeKind::Dockerfile),
      "apko" => Ok(RecipeKind::Apko),
      other => Err(format!("unknown recipe kind: {other}")),
    }
  }
}

/// One buildable image definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildTarget {
  /// Build context directory.
  pub context: PathBuf,
  pub kind: RecipeKind,
  /// Recipe path, relative to `context`.
  pub recipe: PathBuf,
  /// Stage to stop at; `None` builds the final stage.
  pub target: Option<String>,
  /// Ordered platform set. Empty means the host platform.
  pub platforms: Vec<Platform>,
}

impl BuildTarget {
  pub fn new(context: impl Into<PathBuf>) -> Self {
    Self {
      context: context.into(),
      kind: RecipeKind::Dockerfile,
      recipe: PathBuf::from(DEFAULT_RECIPE),
      target: None,
      platforms: Vec::new(),
    }
  }

  /// Switch engines. The recipe resets to the kind's conventional filename,
  /// so call [`with_recipe`](Self::with_recipe) afterwards to override it.
  pub fn with_kind(mut self, kind: RecipeKind) -> Self {
    self.kind = kind;
    self.recipe = PathBuf::from(kind.default_recipe());
    self
  }

  pub fn with_recipe(mut self, recipe: impl Into<PathBuf>) -> Self {
    self.recipe = recipe.into();
    self
  }

  /// An empty stage name is the same as no stage.
  pub fn with_target(mut self, target: Option<String>) -> Self {
    self.target = target.filter(|t| !t.is_empty());
    self
  }

  pub fn with_platforms(mut self, platforms: Vec<Platform>) -> Self {
    self.platforms = platforms;
    self
  }
}
