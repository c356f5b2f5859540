//! Implementation of the `dockrel publish` command.
//!
//! Pushes the built variants as one manifest list to every address and saves
//! the first address's digest for `sign`.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

use dockrel_lib::secret::SecretSource;

use super::{Session, platforms, registry_auth, runtime, select_variants};
use crate::output::{print_stat, print_success};

#[derive(Args, Debug)]
pub struct PublishArgs {
  /// Destination addresses, e.g. "registry.example/app:1.2.3"
  #[arg(required = true)]
  pub addresses: Vec<String>,

  /// Comma separated platforms to include (default: every built variant)
  #[arg(short, long)]
  pub platform: Option<String>,

  /// Registry username
  #[arg(long, requires = "password")]
  pub username: Option<String>,

  /// Registry password reference: "env:NAME" or "file:PATH"
  #[arg(long, requires = "username")]
  pub password: Option<SecretSource>,
}

pub fn cmd_publish(config: Option<&Path>, args: PublishArgs) -> Result<()> {
  let session = Session::open(config)?;
  let state = session.load_state()?;
  let variants = select_variants(&state, &platforms(args.platform.as_deref())?)?;
  let auth = registry_auth(args.username.as_deref(), args.password.as_ref())?;

  let rt = runtime()?;
  let state = rt
    .block_on(
      session
        .pipeline
        .publish(&state, &args.addresses, variants.as_ref(), auth.as_ref()),
    )
    .context("Publish failed")?;
  session.save_state(&state)?;

  print_success(&format!("Published to {} address(es)", args.addresses.len()));
  if let Some(digest) = state.digest() {
    print_stat("Digest", digest.as_str());
  }
  Ok(())
}
