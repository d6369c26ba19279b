//! Lock file reading.
//!
//! Only the specifier table is used: it pins each requested package
//! constraint to the exact version chosen when the lock was written.

use crate::error::LoaderError;
use serde_json::Value;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

/// Pinned versions from a lock file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lockfile {
    path: PathBuf,
    /// Package requirement (e.g. `jsr:@std/path@^0.213`) to pinned value.
    specifiers: HashMap<String, String>,
}

impl Lockfile {
    /// Read a lock file.
    ///
    /// # Errors
    /// Returns an error if the file can't be read or isn't a lock file.
    pub async fn read(path: &Path) -> Result<Self, LoaderError> {
        let source = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| LoaderError::fs(path, &e))?;
        let value: Value = serde_json::from_str(&source).map_err(|e| {
            LoaderError::config(path.display().to_string(), format!("Invalid lock file: {e}"))
        })?;
        Self::from_value(path, &value)
    }

    /// Read a lock file, treating a missing file as no lock file.
    ///
    /// # Errors
    /// Returns an error if the file exists but can't be read or parsed.
    pub async fn read_optional(path: &Path) -> Result<Option<Self>, LoaderError> {
        match tokio::fs::metadata(path).await {
            Ok(_) => Self::read(path).await.map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LoaderError::fs(path, &e)),
        }
    }

    /// Interpret a parsed lock file.
    ///
    /// Version 3 keeps the table under `packages.specifiers`; later
    /// versions keep it at the top level.
    ///
    /// # Errors
    /// Returns an error if the specifier table has the wrong shape.
    pub fn from_value(path: &Path, value: &Value) -> Result<Self, LoaderError> {
        let invalid = |reason: &str| LoaderError::config(path.display().to_string(), reason);

        let table = value
            .get("specifiers")
            .or_else(|| value.get("packages").and_then(|p| p.get("specifiers")));

        let specifiers: HashMap<String, String> = match table {
            None | Some(Value::Null) => HashMap::new(),
            Some(Value::Object(map)) => map
                .iter()
                .map(|(req, pinned)| {
                    pinned
                        .as_str()
                        .map(|p| (req.clone(), p.to_string()))
                        .ok_or_else(|| invalid("specifier values must be strings"))
                })
                .collect::<Result<_, _>>()?,
            Some(_) => return Err(invalid("'specifiers' must be an object")),
        };

        Ok(Self {
            path: path.to_path_buf(),
            specifiers,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The pinned version for a package requirement like
    /// `jsr:@std/path@^0.213` or `jsr:@std/path`.
    ///
    /// Unconstrained requirements are also looked up as `<req>@*`.
    #[must_use]
    pub fn package_version(&self, req: &str) -> Option<String> {
        let pinned = self.specifiers.get(req).or_else(|| {
            let (scheme, name) = req.split_once(':')?;
            let name = name.strip_prefix('/').unwrap_or(name);
            // `@scope/name` has no version unless there's a second `@`.
            let has_version = name.get(1..).is_some_and(|rest| rest.contains('@'));
            if has_version {
                return None;
            }
            self.specifiers.get(&format!("{scheme}:{name}@*"))
        })?;

        Some(version_of(pinned).to_string())
    }
}

/// Reduce a pinned value to its version.
///
/// Values are either a bare version (`0.213.1`) or a full reference
/// (`jsr:@std/path@0.213.1`). npm peer suffixes (`_react@18.2.0`) are dropped.
fn version_of(pinned: &str) -> &str {
    let version = if let Some((_, rest)) = pinned.split_once(':') {
        let rest = rest.strip_prefix('/').unwrap_or(rest);
        match rest.get(1..).and_then(|r| r.find('@')) {
            Some(at) => &rest[at + 2..],
            None => rest,
        }
    } else {
        pinned
    };
    version.split('_').next().unwrap_or(version)
}
