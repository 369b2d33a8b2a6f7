//! Library entrypoint for builder-cli.
//!
//! The primary interface is the `builder` binary. This lib target exposes the
//! build driver's modules to the binary and to integration tests.

pub mod config;
pub mod dist;
pub mod driver;
pub mod env_snapshot;
pub mod matrix;
pub mod output;
pub mod toolchain;
