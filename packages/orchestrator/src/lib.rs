//! Library half of the LiquiDOT orchestrator: chain adapters, contract
//! wrappers, the position store and the pool analytics client. The
//! `orchestrator` binary wires these into supervised tasks.

#![deny(clippy::as_conversions)]

pub mod chain;
pub mod config;
pub mod contracts;
pub mod db;
pub mod engine;
pub mod pools;

/// Get the Git SHA from CI env vars
pub fn build_version() -> &'static str {
    const BUILD_VERSION: Option<&str> = option_env!("GITHUB_SHA");
    BUILD_VERSION.unwrap_or("Local build")
}
