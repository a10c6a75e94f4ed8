#![forbid(unsafe_code)]

//! Seeds are the local capabilities a Ghost exposes to Mirage.
//!
//! A seed names itself through [`SeedMetadata`], advertises its operations
//! and runs one operation at a time through [`Seed::execute`]. The Ghost
//! pipeline only ever sees the trait; [`SeedRegistry`] owns the instances
//! and [`catalog`] builds one from configured ids.

pub mod catalog;
pub mod flow;
pub mod fs;
pub mod kv;
pub mod mongod;
mod registry;
mod seed;

pub use catalog::{CatalogOptions, builtin_registry};
pub use registry::SeedRegistry;
pub use seed::{
    OperationSpec, Seed, SeedError, SeedFailure, SeedMetadata, SeedOutput, SeedStatus,
    validate_seed_id,
};
