//! Manifest list publishing.
//!
//! Addresses are handled strictly in order. Each one gets a login (when
//! credentials are supplied) and a push of the whole variant set. The first
//! address's digest is the one returned; the rest are pushed for their side
//! effect only, on the assumption that every address receives identical
//! content. A failure stops the loop; earlier pushes are not rolled back.

use thiserror::Error;
use tracing::{debug, info};

use crate::image::{Digest, ImageVariantSet};
use crate::secret::RegistryAuth;
use crate::toolchain::{Registry, ToolError};

#[derive(Debug, Error)]
pub enum PublishError {
  #[error("no publish address given")]
  NoAddresses,

  #[error("login for {address} failed: {source}")]
  Login {
    address: String,
    #[source]
    source: ToolError,
  },

  #[error("push to {address} failed: {source}")]
  Push {
    address: String,
    #[source]
    source: ToolError,
  },
}

pub async fn publish_variants<R>(
  registry: &R,
  addresses: &[String],
  variants: &ImageVariantSet,
  auth: Option<&RegistryAuth>,
) -> Result<Digest, PublishError>
where
  R: Registry,
{
  let mut first: Option<Digest> = None;

  for address in addresses {
    if let Some(auth) = auth {
      debug!(address = %address, username = %auth.username, "logging in");
      registry
        .login(address, auth)
        .await
        .map_err(|source| PublishError::Login {
          address: address.clone(),
          source,
        })?;
    }

    let digest = registry
      .publish(address, variants)
      .await
      .map_err(|source| PublishError::Push {
        address: address.clone(),
        source,
      })?;

    info!(address = %address, digest = %digest, platforms = variants.len(), "published manifest list");

    first.get_or_insert(digest);
  }

  first.ok_or(PublishError::NoAddresses)
}
