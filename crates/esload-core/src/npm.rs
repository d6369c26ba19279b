//! npm package materialization.
//!
//! Packages downloaded by the oracle live in a global cache keyed by name and
//! version. Each package gets a private `node_modules/<name>` directory of
//! hard links, scoped by package id, so the bundler's node resolution sees
//! exactly the dependency graph the oracle resolved.

use crate::error::LoaderError;
use crate::oracle::NpmPackage;
use data_encoding::BASE32_NOPAD;
use esload_util::fs::{link_tree_atomic, Commit};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Registry host directory inside the global npm cache.
pub const NPM_REGISTRY_HOST: &str = "registry.npmjs.org";

/// Where package metadata comes from.
pub trait NpmPackageSource: Send + Sync {
    /// Look up a package by id (e.g. `preact@10.19.2`).
    fn package(&self, id: &str) -> Option<NpmPackage>;
}

impl NpmPackageSource for HashMap<String, NpmPackage> {
    fn package(&self, id: &str) -> Option<NpmPackage> {
        self.get(id).cloned()
    }
}

/// Encode a package name for use as a directory name.
///
/// Names with uppercase letters would collide on case-insensitive
/// filesystems, so they become `_` followed by lowercase base32 of the name.
#[must_use]
pub fn encode_package_name(name: &str) -> String {
    if name.chars().any(char::is_uppercase) {
        format!("_{}", BASE32_NOPAD.encode(name.as_bytes()).to_ascii_lowercase())
    } else {
        name.to_string()
    }
}

/// Reverse [`encode_package_name`].
#[must_use]
pub fn decode_package_name(encoded: &str) -> Option<String> {
    let Some(b32) = encoded.strip_prefix('_') else {
        return Some(encoded.to_string());
    };
    let bytes = BASE32_NOPAD
        .decode(b32.to_ascii_uppercase().as_bytes())
        .ok()?;
    String::from_utf8(bytes).ok()
}

type LinkFuture = Shared<BoxFuture<'static, Result<PathBuf, LoaderError>>>;

/// Links cached npm packages into per-package `node_modules` directories.
pub struct PackageMaterializer {
    cache_root: PathBuf,
    namespace: String,
    source: Arc<dyn NpmPackageSource>,
    /// One link per package id; callers of an unfinished link share it.
    links: Mutex<HashMap<String, LinkFuture>>,
}

impl std::fmt::Debug for PackageMaterializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageMaterializer")
            .field("cache_root", &self.cache_root)
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl PackageMaterializer {
    #[must_use]
    pub fn new(cache_root: PathBuf, namespace: String, source: Arc<dyn NpmPackageSource>) -> Self {
        Self {
            cache_root,
            namespace,
            source,
            links: Mutex::new(HashMap::new()),
        }
    }

    /// Global cache directory of a package version.
    #[must_use]
    pub fn package_dir(&self, package: &NpmPackage) -> PathBuf {
        self.cache_root
            .join("npm")
            .join(NPM_REGISTRY_HOST)
            .join(encode_package_name(&package.name))
            .join(&package.version)
    }

    /// The link directory of a package, whether or not it exists yet.
    #[must_use]
    pub fn link_dir(&self, id: &str, package: &NpmPackage) -> PathBuf {
        self.cache_root
            .join(&self.namespace)
            .join(id)
            .join("node_modules")
            .join(encode_package_name(&package.name))
    }

    /// Return the package's link directory, creating it on first use.
    ///
    /// Concurrent calls for one id share a single link. Other processes may
    /// link the same package: the tree is built in a staging directory and
    /// renamed into place, and losing that race counts as success.
    ///
    /// # Errors
    /// Returns an error if the package is unknown or linking fails. Failed
    /// links are not remembered, so a later call tries again.
    pub async fn directory_for(&self, id: &str) -> Result<PathBuf, LoaderError> {
        let link = {
            let mut links = self.lock();
            if let Some(link) = links.get(id) {
                link.clone()
            } else {
                let package = self
                    .source
                    .package(id)
                    .ok_or_else(|| LoaderError::PackageNotFound(id.to_string()))?;
                let link = link_package(
                    id.to_string(),
                    self.package_dir(&package),
                    self.link_dir(id, &package),
                )
                .boxed()
                .shared();
                links.insert(id.to_string(), link.clone());
                link
            }
        };

        let result = link.await;
        if result.is_err() {
            self.lock().remove(id);
        }
        result
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, LinkFuture>> {
        self.links
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// The id of the package named `name` as seen from inside `parent_id`.
    ///
    /// A package importing its own name resolves to itself.
    ///
    /// # Errors
    /// Returns `PackageNotFound` if the parent is unknown or has no such
    /// dependency.
    pub fn package_id_from_name_in_package(
        &self,
        name: &str,
        parent_id: &str,
    ) -> Result<String, LoaderError> {
        let parent = self
            .source
            .package(parent_id)
            .ok_or_else(|| LoaderError::PackageNotFound(parent_id.to_string()))?;
        if parent.name == name {
            return Ok(parent_id.to_string());
        }

        for dep in &parent.dependencies {
            let package = self
                .source
                .package(dep)
                .ok_or_else(|| LoaderError::PackageNotFound(dep.clone()))?;
            if package.name == name {
                return Ok(dep.clone());
            }
        }

        Err(LoaderError::PackageNotFound(format!("{name} (from {parent_id})")))
    }

    /// The id of the package whose link directory contains `path`.
    #[must_use]
    pub fn package_id_from_path(&self, path: &Path) -> Option<String> {
        let rest = path.strip_prefix(self.cache_root.join(&self.namespace)).ok()?;
        let mut parts = Vec::new();
        for component in rest.components() {
            match component {
                Component::Normal(part) if part == "node_modules" => break,
                Component::Normal(part) => parts.push(part.to_str()?),
                _ => return None,
            }
        }
        // Scoped ids span two components: `@scope` and `name@version`.
        match parts.as_slice() {
            [id] => Some((*id).to_string()),
            [scope, id] if scope.starts_with('@') => Some(format!("{scope}/{id}")),
            _ => None,
        }
    }
}

async fn link_package(
    id: String,
    package_dir: PathBuf,
    link_dir: PathBuf,
) -> Result<PathBuf, LoaderError> {
    let present = tokio::fs::try_exists(&link_dir)
        .await
        .map_err(|e| LoaderError::fs(&link_dir, &e))?;
    if present {
        return Ok(link_dir);
    }

    let (from, to) = (package_dir.clone(), link_dir.clone());
    let commit = tokio::task::spawn_blocking(move || link_tree_atomic(&from, &to))
        .await
        .map_err(|e| LoaderError::fs(&link_dir, &std::io::Error::other(e)))?
        .map_err(|e| LoaderError::fs(&package_dir, &e))?;

    match commit {
        Commit::Committed => debug!(id = %id, dir = %link_dir.display(), "linked npm package"),
        Commit::AlreadyPresent => debug!(id = %id, "npm package linked by another process"),
    }
    Ok(link_dir)
}
