use std::io;
use std::path::PathBuf;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use edge_core::{Args, enum_str};

/// Identity a seed advertises at registration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedMetadata {
    pub id: String,
    pub name: String,
    pub description: String,
}

impl SeedMetadata {
    pub fn validate(&self) -> Result<(), SeedError> {
        validate_seed_id(&self.id)?;
        if self.name.trim().is_empty() {
            return Err(SeedError::MissingName {
                id: self.id.clone(),
            });
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationSpec {
    pub name: String,
    pub description: String,
    pub idempotent: bool,
}

impl OperationSpec {
    pub fn idempotent(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            idempotent: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedStatus {
    Ok,
    Error,
}

enum_str! {
    impl SeedStatus {
        pub fn as_str(&self) -> &'static str;
        pub fn parse_str(raw: &str) -> Option<Self>;
        variants {
            Ok => ["ok"],
            Error => ["error"],
        }
    }
}

/// Raw result of one operation. `status` may be left unset; the Ghost
/// pipeline infers it from the exit code.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SeedOutput {
    pub status: Option<SeedStatus>,
    pub stdout: Bytes,
    pub stderr: Bytes,
    pub exit_code: i32,
}

impl SeedOutput {
    pub fn ok(stdout: impl Into<Bytes>) -> Self {
        Self {
            status: Some(SeedStatus::Ok),
            stdout: stdout.into(),
            stderr: Bytes::new(),
            exit_code: 0,
        }
    }

    /// Error status with `message` plus a newline on stderr.
    pub fn error(message: &str, exit_code: i32) -> Self {
        Self {
            status: Some(SeedStatus::Error),
            stdout: Bytes::new(),
            stderr: Bytes::from(format!("{message}\n")),
            exit_code,
        }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SeedError {
    #[error("invalid seed id {id:?}")]
    InvalidId { id: String },
    #[error("seed {id} missing name")]
    MissingName { id: String },
    #[error("seed already exists: {id}")]
    Exists { id: String },
    #[error("unknown seed: {id}")]
    Unknown { id: String },
    #[error("{seed}: unknown action={action:?}")]
    UnknownAction { seed: &'static str, action: String },
    #[error("seed.flow: unknown step {name:?}")]
    UnknownStep { name: String },
    #[error("{seed}: missing {arg}")]
    MissingArg { seed: &'static str, arg: &'static str },
    #[error("{seed}: missing key={key}")]
    MissingKey { seed: &'static str, key: String },
    #[error("{seed}: {reason}")]
    PathRejected {
        seed: &'static str,
        reason: &'static str,
    },
    #[error("{seed}: {program} failed: {reason}")]
    CommandFailed {
        seed: &'static str,
        program: String,
        reason: String,
    },
    #[error("{seed}: {path}: {source}")]
    Io {
        seed: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A failed operation still carries the output the seed produced.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct SeedFailure {
    pub output: SeedOutput,
    #[source]
    pub error: SeedError,
}

impl SeedFailure {
    pub fn new(output: SeedOutput, error: SeedError) -> Self {
        Self { output, error }
    }
}

/// A local capability. Implementations are shared across connection
/// threads, so interior state needs its own lock.
pub trait Seed: Send + Sync {
    fn metadata(&self) -> SeedMetadata;

    fn operations(&self) -> Vec<OperationSpec>;

    fn execute(&self, operation: &str, args: &Args) -> Result<SeedOutput, SeedFailure>;
}

/// Accepts ids shaped like `^[a-z0-9]+([._-][a-z0-9]+)*$`.
pub fn validate_seed_id(id: &str) -> Result<(), SeedError> {
    let invalid = || SeedError::InvalidId { id: id.to_string() };
    let mut prev_separator = true;
    for byte in id.bytes() {
        match byte {
            b'a'..=b'z' | b'0'..=b'9' => prev_separator = false,
            b'.' | b'_' | b'-' if !prev_separator => prev_separator = true,
            _ => return Err(invalid()),
        }
    }
    if prev_separator {
        return Err(invalid());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn seed_id_shapes() {
        for ok in ["seed.flow", "seed.kv", "a", "a1-b2_c3.d4", "0"] {
            validate_seed_id(ok).unwrap();
        }
        for bad in ["", ".", "seed.", ".seed", "seed..flow", "Seed.flow", "seed flow", "seed/fs"] {
            assert!(
                matches!(validate_seed_id(bad), Err(SeedError::InvalidId { .. })),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn metadata_requires_name() {
        let meta = SeedMetadata {
            id: "seed.flow".into(),
            name: "  ".into(),
            description: String::new(),
        };
        assert!(matches!(meta.validate(), Err(SeedError::MissingName { .. })));
    }

    #[test]
    fn error_output_appends_newline() {
        let out = SeedOutput::error("missing key", 1);
        assert_eq!(out.status, Some(SeedStatus::Error));
        assert_eq!(&out.stderr[..], b"missing key\n");
        assert_eq!(out.exit_code, 1);
    }

    proptest! {
        #[test]
        fn generated_ids_validate(
            head in "[a-z0-9]{1,8}",
            tail in proptest::collection::vec(("[._-]", "[a-z0-9]{1,8}"), 0..4),
        ) {
            let mut id = head;
            for (sep, part) in tail {
                id.push_str(&sep);
                id.push_str(&part);
            }
            prop_assert!(validate_seed_id(&id).is_ok());
        }
    }
}
