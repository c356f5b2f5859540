//! Implementation of the `dockrel scan` and `dockrel scan-report` commands.
//!
//! The scanner's report is the only thing written to stdout; status lines go
//! to stderr.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

use dockrel_lib::error::PipelineError;
use dockrel_lib::pipeline;
use dockrel_lib::platform::Platform;
use dockrel_lib::scan::{GatePolicy, Severity};

use super::{Session, runtime, select_variant};
use crate::output::{eprint_success, print_warning};

#[derive(Args, Debug)]
pub struct ScanArgs {
  /// Platform of the built variant to scan (default: the first one built)
  #[arg(short, long)]
  pub platform: Option<Platform>,

  /// Fail when a finding is at or above this severity
  #[arg(long)]
  pub fail_on: Option<Severity>,

  /// Scanner output format (default: scan.output_format from config)
  #[arg(long)]
  pub format: Option<String>,

  /// Override scan.policy from config ("enforce" or "report-only")
  #[arg(long)]
  pub policy: Option<GatePolicy>,
}

#[derive(Args, Debug)]
pub struct ScanReportArgs {
  /// Platform of the built variant to scan (default: the first one built)
  #[arg(short, long)]
  pub platform: Option<Platform>,

  /// Scanner output format (default: scan.output_format from config)
  #[arg(long)]
  pub format: Option<String>,
}

pub fn cmd_scan(config: Option<&Path>, args: ScanArgs) -> Result<()> {
  let session = Session::open_with(config, |c| {
    if let Some(policy) = args.policy {
      c.scan.policy = policy;
    }
  })?;

  let state = session.load_state()?;
  let scan_args = pipeline::ScanArgs {
    variant: select_variant(&state, args.platform.as_ref())?,
    fail_on: args.fail_on,
    output_format: args.format,
  };

  let rt = runtime()?;
  match rt.block_on(session.pipeline.scan(&state, &scan_args)) {
    Ok(verdict) => {
      print_report(&verdict.report);
      if verdict.passed {
        eprint_success(&format!("Scan passed ({} finding(s))", verdict.finding_count));
      } else {
        print_warning("Scan found vulnerabilities at or above the floor (report-only)");
      }
      Ok(())
    }
    Err(PipelineError::ScanGate(failure)) => {
      print_report(&failure.verdict.report);
      Err(PipelineError::ScanGate(failure)).context("Scan gate failed")
    }
    Err(e) => Err(e).context("Scan failed"),
  }
}

pub fn cmd_scan_report(config: Option<&Path>, args: ScanReportArgs) -> Result<()> {
  let session = Session::open(config)?;
  let state = session.load_state()?;
  let scan_args = pipeline::ScanArgs {
    variant: select_variant(&state, args.platform.as_ref())?,
    fail_on: None,
    output_format: args.format,
  };

  let rt = runtime()?;
  let report = rt
    .block_on(session.pipeline.scan_report(&state, &scan_args))
    .context("Scan failed")?;
  print_report(&report);

  Ok(())
}

/// Print a report, ending it with exactly one newline.
pub(super) fn print_report(report: &str) {
  println!("{}", report.trim_end_matches('\n'));
}
