//! CLI integration tests driving the binary against stub tools.

#![cfg(unix)]

mod common;
mod pipeline_tests;
mod release_tests;
