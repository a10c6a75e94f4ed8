#![forbid(unsafe_code)]

//! Library half of the `edgectl` binary: CLI parsing, TOML configuration
//! and tracing setup.

pub mod cli;
pub mod config;
pub mod telemetry;
