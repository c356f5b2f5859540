//! Implementation of the `dockrel export` command.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;

use dockrel_lib::image::Compression;

use super::{Session, platforms, runtime, select_variants};
use crate::output::print_success;

#[derive(Args, Debug)]
pub struct ExportArgs {
  /// Comma separated platforms to include (default: every built variant)
  #[arg(short, long)]
  pub platform: Option<String>,

  /// Gzip every layer inside the exported layout
  #[arg(long)]
  pub compress: bool,

  /// Destination tar file (default: image.tar in a fresh directory under the work dir)
  #[arg(short, long)]
  pub dest: Option<PathBuf>,
}

pub fn cmd_export(config: Option<&Path>, args: ExportArgs) -> Result<()> {
  let session = Session::open(config)?;
  let state = session.load_state()?;
  let variants = select_variants(&state, &platforms(args.platform.as_deref())?)?;
  let compression = if args.compress { Compression::Gzip } else { Compression::Uncompressed };

  let rt = runtime()?;
  let path = rt
    .block_on(
      session
        .pipeline
        .export(&state, variants.as_ref(), compression, args.dest.as_deref()),
    )
    .context("Export failed")?;

  print_success(&format!("Exported to {}", path.display()));
  Ok(())
}
