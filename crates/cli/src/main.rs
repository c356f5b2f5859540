mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use dockrel_lib::error::PipelineError;
use dockrel_lib::release::ReleaseError;

use cmd::{BuildArgs, ExportArgs, ImportArgs, PublishArgs, ReleaseArgs, ScanArgs, ScanReportArgs, SignArgs, StateArgs};
use output::print_error;

/// Exit code for a scan that breached its severity floor.
const GATE_FAILURE_EXIT: u8 = 3;

/// dockrel - build, scan, publish and sign container images
#[derive(Parser)]
#[command(name = "dockrel")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable debug logging (RUST_LOG takes precedence)
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Config file (default: $DOCKREL_CONFIG, then the user config directory)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build one image variant per platform
  Build(BuildArgs),

  /// Pull a published image as the current variant set
  Import(ImportArgs),

  /// Scan a built variant, optionally failing on a severity floor
  Scan(ScanArgs),

  /// Print the scan report without gating
  ScanReport(ScanReportArgs),

  /// Write the built variants to an archive
  Export(ExportArgs),

  /// Push the built variants as a manifest list
  Publish(PublishArgs),

  /// Sign a published digest
  Sign(SignArgs),

  /// Build, scan, publish and sign every recipe under a source tree
  Release(ReleaseArgs),

  /// Show or clear the saved pipeline state
  State(StateArgs),
}

fn main() -> ExitCode {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "info" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let config = cli.config.as_deref();
  let result = match cli.command {
    Commands::Build(args) => cmd::cmd_build(config, args),
    Commands::Import(args) => cmd::cmd_import(config, args),
    Commands::Scan(args) => cmd::cmd_scan(config, args),
    Commands::ScanReport(args) => cmd::cmd_scan_report(config, args),
    Commands::Export(args) => cmd::cmd_export(config, args),
    Commands::Publish(args) => cmd::cmd_publish(config, args),
    Commands::Sign(args) => cmd::cmd_sign(config, args),
    Commands::Release(args) => cmd::cmd_release(config, args),
    Commands::State(args) => cmd::cmd_state(config, args),
  };

  match result {
    Ok(()) => ExitCode::SUCCESS,
    Err(err) => {
      print_error(&format!("{err:#}"));
      if is_gate_failure(&err) {
        ExitCode::from(GATE_FAILURE_EXIT)
      } else {
        ExitCode::FAILURE
      }
    }
  }
}

fn is_gate_failure(err: &anyhow::Error) -> bool {
  if let Some(err) = err.downcast_ref::<PipelineError>() {
    return err.is_gate_failure();
  }
  err
    .downcast_ref::<ReleaseError>()
    .is_some_and(ReleaseError::is_gate_failure)
}
