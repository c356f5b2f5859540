//! Detached signatures for published digests.

use thiserror::Error;
use tracing::info;

use crate::image::Digest;
use crate::toolchain::{SignRequest, Signer, ToolError};

#[derive(Debug, Error)]
#[error("signing {subject} failed: {source}")]
pub struct SignError {
  pub subject: Digest,
  #[source]
  pub source: ToolError,
}

/// Hand `request` to the signer and return its acknowledgement.
///
/// The signature is not verified here.
pub async fn sign_digest<S>(signer: &S, request: SignRequest) -> Result<String, SignError>
where
  S: Signer,
{
  let subject = request.subject.clone();
  info!(
    digest = %subject,
    registry_auth = request.registry_auth.is_some(),
    docker_config = request.docker_config.is_some(),
    "signing image"
  );

  let output = signer
    .sign(request)
    .await
    .map_err(|source| SignError {
      subject: subject.clone(),
      source,
    })?;

  info!(digest = %subject, "signed");
  Ok(output)
}
