//! `seed.fs`: file persistence confined to one root directory.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use edge_core::Args;

use crate::seed::{OperationSpec, Seed, SeedError, SeedFailure, SeedMetadata, SeedOutput};

pub const SEED_ID: &str = "seed.fs";
pub const DEFAULT_ROOT: &str = "local/dir";

#[derive(Clone, Debug)]
pub struct FsSeed {
    root: PathBuf,
}

impl Default for FsSeed {
    fn default() -> Self {
        Self::with_root(DEFAULT_ROOT)
    }
}

impl FsSeed {
    /// A blank root falls back to [`DEFAULT_ROOT`]. Relative roots resolve
    /// against the working directory at execution time.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        if root.as_os_str().is_empty() {
            return Self {
                root: PathBuf::from(DEFAULT_ROOT),
            };
        }
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn absolute_root(&self) -> Result<PathBuf, SeedError> {
        std::path::absolute(&self.root).map_err(|source| SeedError::Io {
            seed: SEED_ID,
            path: self.root.clone(),
            source,
        })
    }

    /// Joins a relative path onto the root, rejecting anything that would
    /// leave it.
    fn resolve(&self, raw: Option<&String>) -> Result<PathBuf, SeedError> {
        let rel = raw.map(|p| p.trim()).unwrap_or_default();
        if rel.is_empty() {
            return Err(SeedError::MissingArg {
                seed: SEED_ID,
                arg: "path",
            });
        }
        let rejected = |reason| SeedError::PathRejected {
            seed: SEED_ID,
            reason,
        };
        let rel = Path::new(rel);
        if rel.is_absolute() {
            return Err(rejected("absolute path not allowed"));
        }

        let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
        for component in rel.components() {
            match component {
                Component::Normal(part) => parts.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if parts.pop().is_none() {
                        return Err(rejected("path escapes root"));
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(rejected("absolute path not allowed"));
                }
            }
        }
        if parts.is_empty() {
            return Err(rejected("path escapes root"));
        }

        let mut path = self.absolute_root()?;
        path.extend(parts);
        Ok(path)
    }

    fn write(&self, args: &Args) -> Result<SeedOutput, SeedError> {
        let path = self.resolve(args.get("path"))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| io_error(parent, source))?;
        }
        let content = args.get("content").map(String::as_str).unwrap_or_default();
        fs::write(&path, content).map_err(|source| io_error(&path, source))?;
        Ok(SeedOutput::ok("ok\n"))
    }

    fn read(&self, args: &Args) -> Result<SeedOutput, SeedError> {
        let path = self.resolve(args.get("path"))?;
        let bytes = fs::read(&path).map_err(|source| io_error(&path, source))?;
        Ok(SeedOutput::ok(bytes))
    }

    fn delete(&self, args: &Args) -> Result<SeedOutput, SeedError> {
        let path = self.resolve(args.get("path"))?;
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(io_error(&path, source)),
        }
        Ok(SeedOutput::ok("ok\n"))
    }

    fn list(&self, args: &Args) -> Result<SeedOutput, SeedError> {
        let root = self.absolute_root()?;
        let prefix = args.get("prefix").map(|p| p.trim()).unwrap_or_default();
        let mut files = Vec::new();
        collect_files(&root, &root, &mut files);
        files.retain(|rel| rel.starts_with(prefix));
        files.sort();
        Ok(SeedOutput::ok(format!("{}\n", files.join("\n"))))
    }
}

impl Seed for FsSeed {
    fn metadata(&self) -> SeedMetadata {
        SeedMetadata {
            id: SEED_ID.into(),
            name: "Filesystem (local/dir)".into(),
            description: "Temporary file persistence seed scoped to local/dir".into(),
        }
    }

    fn operations(&self) -> Vec<OperationSpec> {
        vec![
            OperationSpec::idempotent("write", "write content to relative path under local/dir"),
            OperationSpec::idempotent("read", "read content from relative path under local/dir"),
            OperationSpec::idempotent("delete", "delete file path under local/dir"),
            OperationSpec::idempotent("list", "list file paths under local/dir (optional prefix)"),
        ]
    }

    fn execute(&self, operation: &str, args: &Args) -> Result<SeedOutput, SeedFailure> {
        let result = match operation.trim() {
            "write" => self.write(args),
            "read" => self.read(args),
            "delete" => self.delete(args),
            "list" => self.list(args),
            _ => Err(SeedError::UnknownAction {
                seed: SEED_ID,
                action: operation.to_string(),
            }),
        };
        result.map_err(|error| SeedFailure::new(SeedOutput::error(&error.to_string(), 1), error))
    }
}

fn io_error(path: &Path, source: io::Error) -> SeedError {
    SeedError::Io {
        seed: SEED_ID,
        path: path.to_path_buf(),
        source,
    }
}

/// Unreadable entries are skipped, as is a missing root.
fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            collect_files(root, &path, out);
        } else if let Ok(rel) = path.strip_prefix(root) {
            let rel: Vec<String> = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            out.push(rel.join("/"));
        }
    }
}
