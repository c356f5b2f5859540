//! Implementation of the `dockrel import` command.
//!
//! Pulls an already published image, one variant per platform, and replaces
//! the saved variant set with it. The saved digest is left alone.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use super::{Session, platforms, runtime};
use crate::output::{OutputFormat, print_json, print_stat, print_success};

#[derive(Args, Debug)]
pub struct ImportArgs {
  /// Image address to pull, e.g. "registry.example/app:1.2"
  pub address: String,

  /// Comma separated platforms to pull (default: host)
  #[arg(short, long)]
  pub platform: Option<String>,

  /// Output format
  #[arg(short = 'o', long, value_enum, default_value = "text")]
  pub output: OutputFormat,
}

#[derive(Debug, Serialize)]
struct ImportedVariant {
  platform: String,
  archive: PathBuf,
}

pub fn cmd_import(config: Option<&Path>, args: ImportArgs) -> Result<()> {
  let session = Session::open(config)?;
  let platforms = platforms(args.platform.as_deref())?;

  let state = session.load_state()?;
  let rt = runtime()?;
  let state = rt
    .block_on(session.pipeline.import(&state, &args.address, &platforms))
    .with_context(|| format!("Import of {} failed", args.address))?;
  session.save_state(&state)?;

  if args.output.is_json() {
    let imported: Vec<_> = state
      .variants()
      .iter()
      .map(|v| ImportedVariant {
        platform: v.platform.to_string(),
        archive: v.archive.clone(),
      })
      .collect();
    return print_json(&imported);
  }

  print_success(&format!("Imported {} variant(s) from {}", state.variants().len(), args.address));
  for variant in state.variants() {
    print_stat(&variant.platform.to_string(), &variant.archive.display().to_string());
  }
  Ok(())
}
