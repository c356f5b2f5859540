//! Shared constants.

pub const APP_NAME: &str = "dockrel";

/// Canonical recipe filename searched for during discovery.
pub const DEFAULT_RECIPE: &str = "Dockerfile";

/// Recipe filename used when building with apko.
pub const DEFAULT_APKO_RECIPE: &str = "apko.yaml";

/// Tag applied to every address derived by `release`.
pub const DEFAULT_RELEASE_TAG: &str = "latest";

pub const DEFAULT_SCAN_OUTPUT_FORMAT: &str = "table";

/// Severity floor used by `release` when scanning is enabled and no floor is given.
pub const DEFAULT_RELEASE_FAIL_ON: &str = "critical";

pub const CONFIG_FILENAME: &str = "dockrel.toml";
pub const CONFIG_ENV: &str = "DOCKREL_CONFIG";

pub const STATE_FILENAME: &str = "state.json";
pub const STATE_VERSION: u32 = 1;

/// Environment bindings the signer reads its key material from.
pub const SIGNING_KEY_ENV: &str = "COSIGN_PRIVATE_KEY";
pub const SIGNING_PASSWORD_ENV: &str = "COSIGN_PASSWORD";

pub const SCAN_DB_CACHE_ENV: &str = "GRYPE_DB_CACHE_DIR";
