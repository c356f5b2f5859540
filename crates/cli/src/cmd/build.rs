//! Implementation of the `dockrel build` command.
//!
//! Builds one image variant per platform and replaces the saved variant set.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use dockrel_lib::build::{BuildTarget, RecipeKind};

use super::{Session, platforms, runtime};
use crate::output::{OutputFormat, format_duration, print_json, print_stat, print_success};

#[derive(Args, Debug)]
pub struct BuildArgs {
  /// Build context directory
  #[arg(default_value = ".")]
  pub context: PathBuf,

  /// Recipe path relative to the context (default: build.recipe from config)
  #[arg(short = 'f', long = "file")]
  pub recipe: Option<PathBuf>,

  /// Recipe kind, "dockerfile" or "apko" (default: build.kind from config)
  #[arg(short, long)]
  pub kind: Option<RecipeKind>,

  /// Comma separated platforms, e.g. "linux/amd64,linux/arm64" (default: host)
  #[arg(short, long)]
  pub platform: Option<String>,

  /// Stage to build (default: build.target from config, else the final stage)
  #[arg(short, long)]
  pub target: Option<String>,

  /// Output format
  #[arg(short = 'o', long, value_enum, default_value = "text")]
  pub output: OutputFormat,
}

#[derive(Debug, Serialize)]
struct BuiltVariant {
  platform: String,
  archive: PathBuf,
}

pub fn cmd_build(config: Option<&Path>, args: BuildArgs) -> Result<()> {
  let session = Session::open(config)?;
  let context = dunce::canonicalize(&args.context)
    .with_context(|| format!("Build context not found: {}", args.context.display()))?;
  let config = session.config();

  // An explicit kind brings its own conventional recipe unless -f says otherwise.
  let (kind, recipe) = match args.kind {
    Some(kind) => (kind, PathBuf::from(kind.default_recipe())),
    None => (config.build.kind, config.build.recipe()),
  };

  let target = BuildTarget::new(context)
    .with_kind(kind)
    .with_recipe(args.recipe.unwrap_or(recipe))
    .with_target(Some(args.target.unwrap_or_else(|| config.build.target.clone())))
    .with_platforms(platforms(args.platform.as_deref())?);

  let state = session.load_state()?;
  let started = std::time::Instant::now();
  let rt = runtime()?;
  let state = rt
    .block_on(session.pipeline.build(&state, &target))
    .context("Build failed")?;
  session.save_state(&state)?;

  if args.output.is_json() {
    let built: Vec<_> = state
      .variants()
      .iter()
      .map(|v| BuiltVariant {
        platform: v.platform.to_string(),
        archive: v.archive.clone(),
      })
      .collect();
    print_json(&built)?;
  } else {
    print_success(&format!(
      "Built {} variant(s) in {}",
      state.variants().len(),
      format_duration(started.elapsed())
    ));
    for variant in state.variants() {
      print_stat(&variant.platform.to_string(), &variant.archive.display().to_string());
    }
  }

  Ok(())
}
