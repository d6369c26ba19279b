//! Loaders: turn resolved URLs into module kinds and module contents.
//!
//! Two backends exist. The native loader asks the module-graph oracle and
//! reads what it cached; the portable loader only uses the network and the
//! local filesystem.

mod native;
mod portable;

pub use native::NativeLoader;
pub use portable::PortableLoader;

use crate::error::LoaderError;
use crate::media_type::{LoaderTag, MediaType};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use url::Url;

/// What a resolved URL turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoaderResolution {
    /// An ECMAScript (or JSON) module with loadable source.
    Esm { specifier: Url },
    /// A file inside an npm package.
    Npm {
        /// Graph-scoped package id, when the backend knows it.
        package_id: Option<String>,
        package_name: String,
        /// Subpath inside the package, with leading `/`, or empty.
        path: String,
    },
    /// A runtime built-in, by module name (e.g. `fs`).
    Node { path: String },
}

/// Module contents handed back to the bundler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadResult {
    pub contents: Bytes,
    pub loader: LoaderTag,
    /// Local files the bundler should watch for changes.
    pub watch_files: Vec<PathBuf>,
}

impl LoadResult {
    /// Build a result, rejecting media types the bundler can't consume.
    ///
    /// # Errors
    /// Returns `UnsupportedMediaType` if the media type has no loader tag.
    pub fn new(specifier: &Url, media_type: MediaType, contents: Bytes) -> Result<Self, LoaderError> {
        let loader = media_type
            .loader_tag()
            .ok_or_else(|| LoaderError::UnsupportedMediaType {
                specifier: specifier.to_string(),
                media_type: media_type.to_string(),
            })?;

        let watch_files = if specifier.scheme() == "file" {
            specifier.to_file_path().into_iter().collect()
        } else {
            Vec::new()
        };

        Ok(Self {
            contents,
            loader,
            watch_files,
        })
    }
}

/// Loader backends.
#[derive(Debug)]
pub enum Loader {
    Native(NativeLoader),
    Portable(PortableLoader),
}

impl Loader {
    /// Classify a fully resolved URL.
    ///
    /// # Errors
    /// Returns an error if the URL can't be resolved by this backend.
    pub async fn resolve(&self, specifier: &Url) -> Result<LoaderResolution, LoaderError> {
        match self {
            Self::Native(loader) => loader.resolve(specifier).await,
            Self::Portable(loader) => loader.resolve(specifier).await,
        }
    }

    /// Load the source of an ESM resolution.
    ///
    /// # Errors
    /// Returns an error if the module can't be read or has an unsupported
    /// media type.
    pub async fn load_esm(&self, specifier: &Url) -> Result<LoadResult, LoaderError> {
        match self {
            Self::Native(loader) => loader.load_esm(specifier).await,
            Self::Portable(loader) => loader.load_esm(specifier).await,
        }
    }

    /// The directory holding the package of an npm resolution.
    ///
    /// `referrer_dir` is where a local `node_modules` lookup starts.
    ///
    /// # Errors
    /// Returns `PackageNotFound` if the package has no directory.
    pub async fn node_modules_dir(
        &self,
        resolution: &LoaderResolution,
        referrer_dir: Option<&Path>,
    ) -> Result<PathBuf, LoaderError> {
        let LoaderResolution::Npm {
            package_id,
            package_name,
            ..
        } = resolution
        else {
            return Err(LoaderError::Unreachable(format!(
                "not an npm resolution: {resolution:?}"
            )));
        };

        if let (Self::Native(loader), Some(id)) = (self, package_id) {
            if loader.uses_global_cache() {
                return loader.directory_for(id).await;
            }
        }

        referrer_dir
            .and_then(|dir| find_in_node_modules(dir, package_name))
            .ok_or_else(|| LoaderError::PackageNotFound(package_name.clone()))
    }

    /// The id of the dependency named `name` of package `parent_id`.
    ///
    /// Only the native loader tracks package ids.
    ///
    /// # Errors
    /// Returns `PackageNotFound` if the dependency is unknown.
    pub fn package_id_from_name_in_package(
        &self,
        name: &str,
        parent_id: &str,
    ) -> Option<Result<String, LoaderError>> {
        match self {
            Self::Native(loader) => Some(loader.package_id_from_name_in_package(name, parent_id)),
            Self::Portable(_) => None,
        }
    }

    /// The package id owning a materialized path.
    #[must_use]
    pub fn package_id_from_path(&self, path: &Path) -> Option<String> {
        match self {
            Self::Native(loader) => loader.package_id_from_path(path),
            Self::Portable(_) => None,
        }
    }
}

/// Walk up from `start` looking for `node_modules/<name>`.
#[must_use]
pub fn find_in_node_modules(start: &Path, name: &str) -> Option<PathBuf> {
    start
        .ancestors()
        .filter(|dir| dir.file_name().map_or(true, |n| n != "node_modules"))
        .map(|dir| dir.join("node_modules").join(name))
        .find(|candidate| candidate.is_dir())
}
