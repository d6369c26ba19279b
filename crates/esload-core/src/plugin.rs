//! The bundler-facing plugin: `resolve` and `load` hooks.
//!
//! The host calls [`ModuleLoaderPlugin::resolve`] for every import it sees
//! and [`ModuleLoaderPlugin::load`] for every location the plugin claimed.
//! Locations outside the `file` namespace are remote modules the host
//! can't read itself.

use crate::config::{BuildOptions, LoaderKind, PluginOptions};
use crate::error::LoaderError;
use crate::fetch::RemoteFetchCache;
use crate::info::ModuleInfoCache;
use crate::loader::{Loader, LoaderResolution, NativeLoader, PortableLoader};
use crate::npm::PackageMaterializer;
use crate::oracle::{OracleOptions, ProcessOracle};
use crate::paths;
use crate::workspace::{parse_jsonc, ExternalPatterns, ImportMap, Workspace};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

pub use crate::loader::LoadResult;

/// Namespace of modules the host reads from disk.
pub const FILE_NAMESPACE: &str = "file";

/// A module address in the host's terms.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    pub namespace: String,
    pub path: String,
}

impl Location {
    /// Split a URL into a location. `file:` URLs become filesystem paths;
    /// other URLs keep everything after the scheme as the path.
    #[must_use]
    pub fn from_url(url: &Url) -> Self {
        if url.scheme() == FILE_NAMESPACE {
            if let Ok(path) = url.to_file_path() {
                return Self::file(&path);
            }
        }
        let scheme = url.scheme();
        Self {
            namespace: scheme.to_string(),
            path: url.as_str()[scheme.len() + 1..].to_string(),
        }
    }

    #[must_use]
    pub fn file(path: &Path) -> Self {
        Self {
            namespace: FILE_NAMESPACE.to_string(),
            path: path.display().to_string(),
        }
    }

    /// Reassemble the URL this location came from.
    ///
    /// # Errors
    /// Returns a parse error if the location doesn't form a valid URL.
    pub fn to_url(&self) -> Result<Url, LoaderError> {
        if self.namespace == FILE_NAMESPACE {
            return Url::from_file_path(&self.path)
                .map_err(|()| LoaderError::parse(&self.path, "file location must be absolute"));
        }
        let raw = format!("{}:{}", self.namespace, self.path);
        Url::parse(&raw).map_err(|e| LoaderError::parse(raw, e.to_string()))
    }
}

/// Arguments of a `resolve` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveArgs {
    /// The specifier as written in the import.
    pub path: String,
    /// Path of the importing module, empty for entry points.
    pub importer: String,
    /// Namespace of the importing module.
    pub namespace: String,
    /// Directory the host would resolve relative paths against.
    pub resolve_dir: Option<PathBuf>,
}

impl ResolveArgs {
    /// An import of `path` from the module at `importer`.
    #[must_use]
    pub fn new(path: impl Into<String>, importer: &Location) -> Self {
        let resolve_dir = (importer.namespace == FILE_NAMESPACE)
            .then(|| Path::new(&importer.path).parent().map(Path::to_path_buf))
            .flatten();
        Self {
            path: path.into(),
            importer: importer.path.clone(),
            namespace: importer.namespace.clone(),
            resolve_dir,
        }
    }

    /// An entry point, resolved against `dir`.
    #[must_use]
    pub fn entry(path: impl Into<String>, dir: &Path) -> Self {
        Self {
            path: path.into(),
            importer: String::new(),
            namespace: FILE_NAMESPACE.to_string(),
            resolve_dir: Some(dir.to_path_buf()),
        }
    }
}

/// Outcome of a claimed `resolve` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveIdResult {
    pub location: Location,
    /// The host should leave the import untouched.
    pub external: bool,
}

impl ResolveIdResult {
    /// An external import. `reference` is emitted as written, so it is kept
    /// whole in `location.path` and the namespace is left empty.
    #[must_use]
    pub fn external(reference: impl Into<String>) -> Self {
        Self {
            location: Location {
                namespace: String::new(),
                path: reference.into(),
            },
            external: true,
        }
    }
}

/// A hook failure, tagged with where it happened.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("[{plugin}] {hook} failed for '{specifier}': {source}")]
pub struct PluginError {
    pub plugin: String,
    pub hook: &'static str,
    pub specifier: String,
    #[source]
    pub source: LoaderError,
}

/// The plugin instance for one build.
#[derive(Debug)]
pub struct ModuleLoaderPlugin {
    name: String,
    cwd: PathBuf,
    workspace: Workspace,
    externals: ExternalPatterns,
    loader: Loader,
}

impl ModuleLoaderPlugin {
    /// Set up the plugin at build start.
    ///
    /// Discovers the workspace, applies an explicit import map and lock file,
    /// and builds the selected loader.
    ///
    /// # Errors
    /// Returns an error if configuration can't be read or is invalid.
    pub async fn start(build: BuildOptions, options: PluginOptions) -> Result<Self, PluginError> {
        let fail = |source: LoaderError| PluginError {
            plugin: options.namespace.clone(),
            hook: "start",
            specifier: build.cwd.display().to_string(),
            source,
        };

        let mut workspace = Workspace::discover_blocking(
            build.cwd.clone(),
            build.entry_points.clone(),
            options.config_path.clone(),
        )
        .await
        .map_err(fail)?;
        let fetch = RemoteFetchCache::new().map_err(fail)?;

        if let Some(ref url) = options.import_map_url {
            let import_map = load_import_map(&fetch, url).await.map_err(fail)?;
            workspace.set_import_map(import_map);
        }
        if let Some(ref lock) = options.lock_path {
            workspace.set_lock_path(Some(lock.clone()));
        }

        let externals = ExternalPatterns::new(&build.external).map_err(fail)?;
        let node_modules_dir = options
            .node_modules_dir
            .or_else(|| workspace.node_modules_dir());

        let loader = match options.loader {
            LoaderKind::Native => {
                let oracle = ProcessOracle::new(OracleOptions {
                    config: workspace.root_config().map(|c| c.path.clone()),
                    import_map: options.import_map_url.as_ref().map(ToString::to_string),
                    lock: workspace.lock_path().map(Path::to_path_buf),
                    node_modules_dir,
                    cwd: Some(build.cwd.clone()),
                });
                let info = ModuleInfoCache::with_debounce(Arc::new(oracle), options.batch_debounce);
                let materializer = PackageMaterializer::new(
                    options.cache_root.clone().unwrap_or_else(paths::cache_root),
                    options.namespace.clone(),
                    Arc::new(info.clone()),
                );
                Loader::Native(
                    NativeLoader::new(info, materializer, fetch)
                        .with_node_modules_dir(node_modules_dir),
                )
            }
            LoaderKind::Portable => Loader::Portable(PortableLoader::new(
                fetch,
                options.jsr_registry(),
                workspace.lock_path().map(Path::to_path_buf),
            )),
        };

        info!(
            loader = options.loader.as_str(),
            root = ?workspace.root_config().map(|c| c.path.display().to_string()),
            "module loader plugin started"
        );

        Ok(Self::new(
            options.namespace,
            build.cwd,
            workspace,
            externals,
            loader,
        ))
    }

    /// Assemble a plugin from already-built parts.
    #[must_use]
    pub fn new(
        name: String,
        cwd: PathBuf,
        workspace: Workspace,
        externals: ExternalPatterns,
        loader: Loader,
    ) -> Self {
        Self {
            name,
            cwd,
            workspace,
            externals,
            loader,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// The `resolve` hook.
    ///
    /// Returns `Ok(None)` for imports the host should resolve itself.
    ///
    /// # Errors
    /// Returns an error if the specifier can't be resolved.
    pub async fn resolve(&self, args: &ResolveArgs) -> Result<Option<ResolveIdResult>, PluginError> {
        self.resolve_inner(args).await.map_err(|source| PluginError {
            plugin: self.name.clone(),
            hook: "resolve",
            specifier: args.path.clone(),
            source,
        })
    }

    /// The `load` hook.
    ///
    /// # Errors
    /// Returns an error if the module can't be loaded.
    pub async fn load(&self, location: &Location) -> Result<LoadResult, PluginError> {
        let fail = |source: LoaderError| PluginError {
            plugin: self.name.clone(),
            hook: "load",
            specifier: format!("{}:{}", location.namespace, location.path),
            source,
        };
        let url = location.to_url().map_err(fail)?;
        self.loader.load_esm(&url).await.map_err(fail)
    }

    async fn resolve_inner(
        &self,
        args: &ResolveArgs,
    ) -> Result<Option<ResolveIdResult>, LoaderError> {
        if args.namespace == FILE_NAMESPACE
            && args
                .resolve_dir
                .as_deref()
                .is_some_and(paths::is_in_node_modules)
        {
            return self.resolve_in_package(args).await;
        }

        let referrer = self.referrer(args)?;
        let resolved = self.workspace.resolve(&args.path, &referrer)?;

        if self.externals.matches(resolved.as_str()) {
            debug!(specifier = %args.path, %resolved, "external");
            return Ok(Some(ResolveIdResult::external(resolved.as_str())));
        }

        let resolution = self.loader.resolve(&resolved).await?;
        let result = match resolution {
            LoaderResolution::Esm { ref specifier } => ResolveIdResult {
                location: Location::from_url(specifier),
                external: false,
            },
            LoaderResolution::Npm { ref path, .. } => {
                let referrer_dir = args.resolve_dir.as_deref().unwrap_or(&self.cwd);
                let dir = self
                    .loader
                    .node_modules_dir(&resolution, Some(referrer_dir))
                    .await?;
                ResolveIdResult {
                    location: Location::file(&join_subpath(&dir, path)),
                    external: false,
                }
            }
            LoaderResolution::Node { path } => ResolveIdResult::external(format!("node:{path}")),
        };

        debug!(specifier = %args.path, %resolved, location = ?result.location, "resolved");
        Ok(Some(result))
    }

    /// Imports from inside a `node_modules` tree are the host's business,
    /// except bare imports from a materialized package: those go to the
    /// dependency's own link directory.
    async fn resolve_in_package(
        &self,
        args: &ResolveArgs,
    ) -> Result<Option<ResolveIdResult>, LoaderError> {
        let Some((name, subpath)) = split_bare(&args.path) else {
            return Ok(None);
        };
        let Some(parent_id) = self.loader.package_id_from_path(Path::new(&args.importer)) else {
            return Ok(None);
        };
        let Some(id) = self.loader.package_id_from_name_in_package(name, &parent_id) else {
            return Ok(None);
        };

        let resolution = LoaderResolution::Npm {
            package_id: Some(id?),
            package_name: name.to_string(),
            path: subpath.to_string(),
        };
        let dir = self.loader.node_modules_dir(&resolution, None).await?;
        debug!(specifier = %args.path, parent = %parent_id, dir = %dir.display(), "package-internal import");

        Ok(Some(ResolveIdResult {
            location: Location::file(&join_subpath(&dir, subpath)),
            external: false,
        }))
    }

    fn referrer(&self, args: &ResolveArgs) -> Result<Url, LoaderError> {
        if !args.importer.is_empty() && !args.namespace.is_empty() {
            return Location {
                namespace: args.namespace.clone(),
                path: args.importer.clone(),
            }
            .to_url();
        }
        let dir = args.resolve_dir.as_deref().unwrap_or(&self.cwd);
        paths::dir_url(dir)
            .ok_or_else(|| LoaderError::parse(dir.display().to_string(), "directory must be absolute"))
    }
}

/// Fetch and parse an explicit import map document.
async fn load_import_map(fetch: &RemoteFetchCache, url: &Url) -> Result<ImportMap, LoaderError> {
    let module = fetch.load(url).await?;
    let source = std::str::from_utf8(&module.bytes)
        .map_err(|e| LoaderError::config(url.as_str(), e.to_string()))?;
    let value = parse_jsonc(source).map_err(|e| LoaderError::config(url.as_str(), e.to_string()))?;
    ImportMap::from_value(&module.specifier, &value)
}

/// Split a bare package import into package name and subpath (with its
/// leading `/`, or empty). Relative, absolute and URL imports yield `None`.
fn split_bare(specifier: &str) -> Option<(&str, &str)> {
    if specifier.is_empty()
        || specifier.starts_with('.')
        || specifier.starts_with('/')
        || specifier.contains(':')
    {
        return None;
    }
    let mut slashes = specifier.match_indices('/').map(|(i, _)| i);
    let end = if specifier.starts_with('@') {
        slashes.nth(1)
    } else {
        slashes.next()
    };
    Some(end.map_or((specifier, ""), |i| specifier.split_at(i)))
}

fn join_subpath(dir: &Path, subpath: &str) -> PathBuf {
    let subpath = subpath.trim_start_matches('/');
    if subpath.is_empty() {
        dir.to_path_buf()
    } else {
        dir.join(subpath)
    }
}
