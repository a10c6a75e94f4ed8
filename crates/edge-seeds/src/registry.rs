use std::collections::BTreeMap;
use std::sync::Arc;

use crate::seed::{Seed, SeedError, SeedMetadata};

/// Seeds keyed by id. Built once at startup, then shared read-only.
#[derive(Clone, Default)]
pub struct SeedRegistry {
    seeds: BTreeMap<String, Arc<dyn Seed>>,
}

impl std::fmt::Debug for SeedRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeedRegistry")
            .field("seeds", &self.seeds.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SeedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, seed: Arc<dyn Seed>) -> Result<(), SeedError> {
        let meta = seed.metadata();
        meta.validate()?;
        if self.seeds.contains_key(&meta.id) {
            return Err(SeedError::Exists { id: meta.id });
        }
        tracing::debug!(seed_id = %meta.id, "seed registered");
        self.seeds.insert(meta.id, seed);
        Ok(())
    }

    pub fn resolve(&self, seed_id: &str) -> Option<Arc<dyn Seed>> {
        self.seeds.get(seed_id.trim()).cloned()
    }

    /// Sorted by id.
    pub fn list_metadata(&self) -> Vec<SeedMetadata> {
        self.seeds.values().map(|seed| seed.metadata()).collect()
    }

    pub fn len(&self) -> usize {
        self.seeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seeds.is_empty()
    }
}
