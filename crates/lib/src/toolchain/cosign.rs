//! `cosign` signer.

use tempfile::TempDir;

use crate::consts::{SIGNING_KEY_ENV, SIGNING_PASSWORD_ENV};

use super::process::Invocation;
use super::{ProcessToolchain, SignRequest, Signer, ToolError};

impl Signer for ProcessToolchain {
  async fn sign(&self, request: SignRequest) -> Result<String, ToolError> {
    let mut invocation = Invocation::new(&self.tools.cosign)
      .arg("sign")
      .arg(request.subject.as_str())
      .arg("--key")
      .arg(format!("env://{SIGNING_KEY_ENV}"))
      .env("COSIGN_YES", "true")
      .secret_env(SIGNING_PASSWORD_ENV, &request.password)
      .secret_env(SIGNING_KEY_ENV, &request.key);

    if let Some(auth) = &request.registry_auth {
      invocation = invocation
        .arg("--registry-username")
        .arg(&auth.username)
        .arg("--registry-password")
        .secret_arg(&auth.password);
    }

    // Held until the signer exits.
    let _docker_config_dir = match &request.docker_config {
      Some(config) => {
        let dir = TempDir::new()?;
        tokio::fs::copy(config, dir.path().join("config.json")).await?;
        invocation = invocation.env("DOCKER_CONFIG", dir.path().to_string_lossy());
        Some(dir)
      }
      None => None,
    };

    let output = invocation.run().await?;

    Ok(match (output.stdout.is_empty(), output.stderr.is_empty()) {
      (false, false) => format!("{}\n{}", output.stderr, output.stdout),
      (true, _) => output.stderr,
      (false, true) => output.stdout,
    })
  }
}
