//! Implementation of the `dockrel state` command.

use std::path::Path;

use anyhow::Result;
use clap::Args;

use super::Session;
use crate::output::{OutputFormat, print_info, print_json, print_stat, print_success};

#[derive(Args, Debug)]
pub struct StateArgs {
  /// Forget the saved variants and digest
  #[arg(long)]
  pub clear: bool,

  /// Output format
  #[arg(short = 'o', long, value_enum, default_value = "text")]
  pub output: OutputFormat,
}

pub fn cmd_state(config: Option<&Path>, args: StateArgs) -> Result<()> {
  let session = Session::open(config)?;

  if args.clear {
    session.store.clear(&session.config().paths.work_dir())?;
    print_success("Pipeline state cleared");
    return Ok(());
  }

  let state = session.load_state()?;

  if args.output.is_json() {
    return print_json(&state);
  }

  if state.variants().is_empty() && state.digest().is_none() {
    print_info("No pipeline state. Run 'dockrel build' to start.");
    return Ok(());
  }

  println!("Variants:");
  for variant in state.variants() {
    print_stat(&variant.platform.to_string(), &variant.archive.display().to_string());
  }
  println!();
  print_stat("Digest", state.digest().map(|d| d.as_str()).unwrap_or("(none)"));

  Ok(())
}
