//! Implementation of the `dockrel sign` command.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;

use dockrel_lib::image::Digest;
use dockrel_lib::pipeline;
use dockrel_lib::secret::SecretSource;

use super::{Session, registry_auth, runtime};
use crate::output::print_success;

#[derive(Args, Debug)]
pub struct SignArgs {
  /// Signing key reference: "env:NAME" or "file:PATH"
  #[arg(long)]
  pub key: SecretSource,

  /// Signing key password reference: "env:NAME" or "file:PATH"
  #[arg(long)]
  pub password: SecretSource,

  /// Digest to sign (default: the last published digest)
  #[arg(long)]
  pub digest: Option<String>,

  /// Registry username for the signer
  #[arg(long, requires = "registry_password")]
  pub registry_username: Option<String>,

  /// Registry password reference for the signer
  #[arg(long, requires = "registry_username")]
  pub registry_password: Option<SecretSource>,

  /// Docker config.json to hand to the signer
  #[arg(long)]
  pub docker_config: Option<PathBuf>,
}

pub fn cmd_sign(config: Option<&Path>, args: SignArgs) -> Result<()> {
  let session = Session::open(config)?;
  let state = session.load_state()?;

  let sign_args = pipeline::SignArgs {
    digest: args.digest.map(Digest::new),
    key: args.key.load().context("Failed to load signing key")?,
    password: args.password.load().context("Failed to load signing password")?,
    registry_auth: registry_auth(args.registry_username.as_deref(), args.registry_password.as_ref())?,
    docker_config: args.docker_config,
  };

  let rt = runtime()?;
  let output = rt
    .block_on(session.pipeline.sign(&state, sign_args))
    .context("Signing failed")?;

  if !output.trim().is_empty() {
    println!("{}", output.trim_end());
  }
  print_success("Signed");
  Ok(())
}
