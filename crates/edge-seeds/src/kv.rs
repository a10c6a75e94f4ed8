//! `seed.kv`: process-local key/value state. Nothing survives a restart.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use edge_core::Args;

use crate::seed::{OperationSpec, Seed, SeedError, SeedFailure, SeedMetadata, SeedOutput};

pub const SEED_ID: &str = "seed.kv";

#[derive(Debug, Default)]
pub struct KvSeed {
    store: RwLock<BTreeMap<String, String>>,
}

impl KvSeed {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, String>> {
        match self.store.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, String>> {
        match self.store.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Seed for KvSeed {
    fn metadata(&self) -> SeedMetadata {
        SeedMetadata {
            id: SEED_ID.into(),
            name: "KV (temporary in-memory)".into(),
            description: "Temporary key-value state storage seed for control-plane persistence"
                .into(),
        }
    }

    fn operations(&self) -> Vec<OperationSpec> {
        vec![
            OperationSpec::idempotent("put", "upsert key=value"),
            OperationSpec::idempotent("get", "get value by key"),
            OperationSpec::idempotent("delete", "delete key"),
            OperationSpec::idempotent("list", "list keys (optional prefix)"),
        ]
    }

    fn execute(&self, operation: &str, args: &Args) -> Result<SeedOutput, SeedFailure> {
        match operation.trim() {
            "put" => {
                let key = required_key(args)?;
                let value = args.get("value").cloned().unwrap_or_default();
                self.write().insert(key.clone(), value);
                Ok(SeedOutput::ok(format!("ok put key={key}\n")))
            }
            "get" => {
                let key = required_key(args)?;
                match self.read().get(&key) {
                    Some(value) => Ok(SeedOutput::ok(format!("{value}\n"))),
                    None => Err(failure(
                        &format!("missing key={key}"),
                        SeedError::MissingKey { seed: SEED_ID, key },
                    )),
                }
            }
            "delete" => {
                let key = required_key(args)?;
                self.write().remove(&key);
                Ok(SeedOutput::ok(format!("ok delete key={key}\n")))
            }
            "list" => {
                let prefix = args.get("prefix").map(|p| p.trim()).unwrap_or_default();
                let keys: Vec<String> = self
                    .read()
                    .keys()
                    .filter(|key| key.starts_with(prefix))
                    .cloned()
                    .collect();
                Ok(SeedOutput::ok(format!("{}\n", keys.join("\n"))))
            }
            _ => Err(failure(
                "unknown action",
                SeedError::UnknownAction {
                    seed: SEED_ID,
                    action: operation.to_string(),
                },
            )),
        }
    }
}

fn required_key(args: &Args) -> Result<String, SeedFailure> {
    let key = args.get("key").map(|k| k.trim()).unwrap_or_default();
    if key.is_empty() {
        return Err(failure(
            "missing key",
            SeedError::MissingArg {
                seed: SEED_ID,
                arg: "key",
            },
        ));
    }
    Ok(key.to_string())
}

fn failure(message: &str, error: SeedError) -> SeedFailure {
    SeedFailure::new(SeedOutput::error(message, 1), error)
}
