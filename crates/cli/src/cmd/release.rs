//! Implementation of the `dockrel release` command.
//!
//! Releases every recipe under a source tree: build, optional scan gate,
//! publish, optional signing. Stops at the first failing target.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;

use dockrel_lib::release::{ReleaseRecord, ReleaseReport, ReleaseRequest, SigningKeys};
use dockrel_lib::scan::Severity;
use dockrel_lib::secret::SecretSource;

use super::scan::print_report as print_scan_report;
use super::{Session, platforms, registry_auth, runtime};
use crate::output::{self, OutputFormat, format_duration, print_json, print_stat, print_success};

#[derive(Args, Debug)]
pub struct ReleaseArgs {
  /// Directory searched for recipes at any depth
  pub source_tree: PathBuf,

  /// Address prefix; each target goes to "{base}/{repository}:{tag}"
  pub registry_base: String,

  /// Comma separated platforms for every target (default: host)
  #[arg(short, long)]
  pub platform: Option<String>,

  /// Registry username
  #[arg(long, requires = "password")]
  pub username: Option<String>,

  /// Registry password reference: "env:NAME" or "file:PATH"
  #[arg(long, requires = "username")]
  pub password: Option<SecretSource>,

  /// Scan each target before publishing it
  #[arg(long)]
  pub scan: bool,

  /// Severity floor for the scan gate (default: scan.release_fail_on from config)
  #[arg(long, requires = "scan")]
  pub fail_on: Option<Severity>,

  /// Sign each published digest
  #[arg(long, requires_all = ["key", "key_password"])]
  pub sign: bool,

  /// Signing key reference: "env:NAME" or "file:PATH"
  #[arg(long)]
  pub key: Option<SecretSource>,

  /// Signing key password reference: "env:NAME" or "file:PATH"
  #[arg(long)]
  pub key_password: Option<SecretSource>,

  /// Docker config.json to hand to the signer
  #[arg(long)]
  pub docker_config: Option<PathBuf>,

  /// Output format
  #[arg(short = 'o', long, value_enum, default_value = "text")]
  pub output: OutputFormat,
}

pub fn cmd_release(config: Option<&Path>, args: ReleaseArgs) -> Result<()> {
  let session = Session::open(config)?;
  let source_tree = dunce::canonicalize(&args.source_tree)
    .with_context(|| format!("Source tree not found: {}", args.source_tree.display()))?;

  let signing = match (&args.key, &args.key_password) {
    (Some(key), Some(password)) => Some(SigningKeys {
      key: key.load().context("Failed to load signing key")?,
      password: password.load().context("Failed to load signing password")?,
    }),
    _ => None,
  };

  let request = ReleaseRequest {
    platforms: platforms(args.platform.as_deref())?,
    auth: registry_auth(args.username.as_deref(), args.password.as_ref())?,
    scan: args.scan,
    fail_on: args.fail_on,
    sign: args.sign,
    signing,
    docker_config: args.docker_config,
    ..ReleaseRequest::new(source_tree, args.registry_base)
  };

  let started = std::time::Instant::now();
  let rt = runtime()?;
  match rt.block_on(session.pipeline.release(&request)) {
    Ok(report) => {
      if args.output.is_json() {
        print_json(&report)?;
      } else {
        print_report(&report);
        print_success(&format!(
          "Released {} target(s) in {}",
          report.records.len(),
          format_duration(started.elapsed())
        ));
      }
      Ok(())
    }
    Err(err) => {
      let completed = ReleaseReport {
        records: err.completed().to_vec(),
      };
      if args.output.is_json() {
        print_json(&completed)?;
      } else if !completed.records.is_empty() {
        print_report(&completed);
      }
      if let Some(failure) = err.gate_failure() {
        if args.output.is_json() {
          eprintln!("{}", failure.verdict.report.trim_end_matches('\n'));
        } else {
          print_scan_report(&failure.verdict.report);
        }
      }
      Err(err).context("Release failed")
    }
  }
}

fn print_report(report: &ReleaseReport) {
  for record in &report.records {
    print_record(record);
  }
}

fn print_record(record: &ReleaseRecord) {
  println!("{} {}", output::symbols::INFO, record.repository);
  print_stat("Address", &record.address);
  print_stat("Digest", record.digest.as_str());
  if let Some(scan) = &record.scan {
    let highest = scan.highest.map(|s| s.to_string()).unwrap_or_else(|| "none".to_string());
    let outcome = if scan.passed { "passed" } else { "failed (report-only)" };
    print_stat("Scan", &format!("{outcome}, {} finding(s), highest {highest}", scan.findings));
  }
  if record.signed {
    print_stat("Signed", "yes");
  }
}
