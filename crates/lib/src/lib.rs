//! dockrel-lib: container image release pipeline
//!
//! This crate sequences external tools into a release pipeline:
//! - `build`: one image variant per platform, built concurrently
//! - `import`: the same per-platform set, pulled from a registry
//! - `scan`: vulnerability scan gated on a severity floor
//! - `publish`: manifest list pushed to one or more registries
//! - `sign`: detached signature over the published digest
//! - `release`: discover every recipe under a source tree and release each

pub mod build;
pub mod config;
pub mod consts;
pub mod error;
pub mod image;
pub mod import;
pub mod pipeline;
pub mod platform;
pub mod publish;
pub mod release;
pub mod scan;
pub mod secret;
pub mod sign;
pub mod state;
pub mod toolchain;
pub mod util;
