//! Builds a registry from the seed ids a Ghost is configured with.

use std::path::PathBuf;
use std::sync::Arc;

use crate::flow::{self, FlowSeed};
use crate::fs::{self, FsSeed};
use crate::kv::{self, KvSeed};
use crate::mongod::{self, MongodSeed};
use crate::registry::SeedRegistry;
use crate::seed::{Seed, SeedError};

/// Ids every Ghost knows how to build.
pub const BUILTIN_SEED_IDS: &[&str] = &[
    flow::SEED_ID,
    kv::SEED_ID,
    fs::SEED_ID,
    mongod::SEED_ID,
];

#[derive(Clone, Debug, Default)]
pub struct CatalogOptions {
    /// Root for `seed.fs`; empty uses its default.
    pub fs_root: PathBuf,
}

/// Blank ids are skipped; unknown ids and duplicates fail the whole build.
pub fn builtin_registry<S: AsRef<str>>(
    ids: &[S],
    options: &CatalogOptions,
) -> Result<SeedRegistry, SeedError> {
    let mut registry = SeedRegistry::new();
    for id in ids {
        let id = id.as_ref().trim();
        if id.is_empty() {
            continue;
        }
        let seed: Arc<dyn Seed> = match id {
            flow::SEED_ID => Arc::new(FlowSeed::new()),
            kv::SEED_ID => Arc::new(KvSeed::new()),
            fs::SEED_ID => Arc::new(FsSeed::with_root(options.fs_root.clone())),
            mongod::SEED_ID => Arc::new(MongodSeed::new()),
            other => {
                return Err(SeedError::Unknown {
                    id: other.to_string(),
                });
            }
        };
        registry.register(seed)?;
    }
    Ok(registry)
}
