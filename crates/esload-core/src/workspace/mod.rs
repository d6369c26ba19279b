//! Workspace discovery and specifier resolution.
//!
//! Finds the project configuration governing a build, follows it up to the
//! workspace root, and builds the import map every specifier is resolved
//! through.

mod external;
mod import_map;
mod project;

pub use external::ExternalPatterns;
pub use import_map::ImportMap;
pub use project::{find_config_in, parse_jsonc, LockSetting, ProjectConfig, CONFIG_FILE_NAMES};

use crate::config::NodeModulesDir;
use crate::error::LoaderError;
use std::path::{Path, PathBuf};
use tracing::debug;
use url::Url;

/// The resolved project layout for one build.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: Option<ProjectConfig>,
    members: Vec<ProjectConfig>,
    import_map: ImportMap,
    lock_path: Option<PathBuf>,
}

impl Workspace {
    /// [`Workspace::discover`] on the blocking pool, for use from async code.
    ///
    /// # Errors
    /// Returns an error if a configuration file is invalid.
    pub async fn discover_blocking(
        cwd: PathBuf,
        entry_points: Vec<String>,
        config_path: Option<PathBuf>,
    ) -> Result<Self, LoaderError> {
        let at = cwd.clone();
        tokio::task::spawn_blocking(move || {
            Self::discover(&cwd, &entry_points, config_path.as_deref())
        })
        .await
        .map_err(|e| LoaderError::fs(&at, &std::io::Error::other(e)))?
    }

    /// Discover the workspace for a build.
    ///
    /// Discovery starts at `config_path` if given (it must be absolute),
    /// otherwise at the directories of the local entry points, otherwise at
    /// `cwd`. Finding no configuration at all is not an error.
    ///
    /// # Errors
    /// Returns an error if a configuration file is invalid.
    pub fn discover(
        cwd: &Path,
        entry_points: &[String],
        config_path: Option<&Path>,
    ) -> Result<Self, LoaderError> {
        let found = match config_path {
            Some(path) => {
                if !path.is_absolute() {
                    return Err(LoaderError::config(
                        path.display().to_string(),
                        "config path must be absolute",
                    ));
                }
                Some(path.to_path_buf())
            }
            None => start_dirs(cwd, entry_points)
                .iter()
                .find_map(|dir| find_config_upwards(dir)),
        };

        let Some(found) = found else {
            debug!(cwd = %cwd.display(), "no configuration file found");
            return Ok(Self::empty());
        };

        let config = ProjectConfig::read(&found)?;
        let root = match find_workspace_root(config.dir())? {
            Some(root) => root,
            None => config,
        };
        debug!(root = %root.path.display(), "workspace root");

        let members = root
            .member_dirs()
            .iter()
            .filter_map(|dir| find_config_in(dir))
            .filter(|path| *path != root.path)
            .map(|path| ProjectConfig::read(&path))
            .collect::<Result<Vec<_>, _>>()?;

        let import_map = build_import_map(&root, &members)?;
        let lock_path = root.lock_path();

        Ok(Self {
            root: Some(root),
            members,
            import_map,
            lock_path,
        })
    }

    /// A workspace without configuration: only URL-like specifiers resolve.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            root: None,
            members: Vec::new(),
            import_map: ImportMap::empty(),
            lock_path: None,
        }
    }

    /// Replace the configured mappings with an explicit import map.
    pub fn set_import_map(&mut self, import_map: ImportMap) {
        self.import_map = import_map;
    }

    /// Override the lock file.
    pub fn set_lock_path(&mut self, lock_path: Option<PathBuf>) {
        self.lock_path = lock_path;
    }

    /// Resolve `specifier` imported from `referrer` to an absolute URL.
    ///
    /// # Errors
    /// Returns an error if the specifier is bare and unmapped, or blocked
    /// by the import map.
    pub fn resolve(&self, specifier: &str, referrer: &Url) -> Result<Url, LoaderError> {
        self.import_map.resolve(specifier, referrer)
    }

    #[must_use]
    pub fn import_map(&self) -> &ImportMap {
        &self.import_map
    }

    #[must_use]
    pub fn lock_path(&self) -> Option<&Path> {
        self.lock_path.as_deref()
    }

    /// The root configuration file, if one was found.
    #[must_use]
    pub fn root_config(&self) -> Option<&ProjectConfig> {
        self.root.as_ref()
    }

    #[must_use]
    pub fn members(&self) -> &[ProjectConfig] {
        &self.members
    }

    /// The root's `nodeModulesDir` setting.
    #[must_use]
    pub fn node_modules_dir(&self) -> Option<NodeModulesDir> {
        self.root.as_ref().and_then(|c| c.node_modules_dir)
    }
}

/// Directories of entry points that are local files, or `cwd`.
fn start_dirs(cwd: &Path, entry_points: &[String]) -> Vec<PathBuf> {
    let Ok(cwd_url) = Url::from_directory_path(cwd) else {
        return vec![cwd.to_path_buf()];
    };

    let mut dirs: Vec<PathBuf> = entry_points
        .iter()
        .filter_map(|entry| {
            let url = if Path::new(entry).is_absolute() {
                Url::from_file_path(entry).ok()?
            } else {
                cwd_url.join(entry).ok()?
            };
            if url.scheme() != "file" {
                return None;
            }
            url.to_file_path().ok()?.parent().map(Path::to_path_buf)
        })
        .collect();
    dirs.dedup();

    if dirs.is_empty() {
        dirs.push(cwd.to_path_buf());
    }
    dirs
}

/// Walk up from `dir` to the nearest configuration file.
fn find_config_upwards(dir: &Path) -> Option<PathBuf> {
    dir.ancestors().find_map(find_config_in)
}

/// Find an ancestor config that lists `member_dir` as a workspace member.
fn find_workspace_root(member_dir: &Path) -> Result<Option<ProjectConfig>, LoaderError> {
    for ancestor in member_dir.ancestors().skip(1) {
        let Some(path) = find_config_in(ancestor) else {
            continue;
        };
        let config = ProjectConfig::read(&path)?;
        if config.is_workspace_root() && config.member_dirs().iter().any(|d| d == member_dir) {
            return Ok(Some(config));
        }
    }
    Ok(None)
}

fn file_url(path: &Path) -> Result<Url, LoaderError> {
    Url::from_file_path(path)
        .map_err(|()| LoaderError::config(path.display().to_string(), "path is not absolute"))
}

/// Root mappings (or the root's `importMap` file) plus member `imports`
/// scoped to each member directory.
fn build_import_map(root: &ProjectConfig, members: &[ProjectConfig]) -> Result<ImportMap, LoaderError> {
    let root_url = file_url(&root.path)?;

    let mut map = if let Some(ref reference) = root.import_map {
        let url = root_url.join(reference).map_err(|e| {
            LoaderError::config(root.path.display().to_string(), format!("invalid importMap: {e}"))
        })?;
        let path = url.to_file_path().map_err(|()| {
            LoaderError::config(
                root.path.display().to_string(),
                format!("importMap '{url}' must be a local file"),
            )
        })?;
        let source = std::fs::read_to_string(&path).map_err(|e| LoaderError::fs(&path, &e))?;
        let value = parse_jsonc(&source)
            .map_err(|e| LoaderError::config(path.display().to_string(), e.to_string()))?;
        ImportMap::from_value(&url, &value)?
    } else {
        let mut map = ImportMap::empty();
        if let Some(ref imports) = root.imports {
            map.extend_imports(&root_url, imports)?;
        }
        if let Some(ref scopes) = root.scopes {
            map.extend_scopes(&root_url, scopes)?;
        }
        map
    };

    for member in members {
        let Some(ref imports) = member.imports else {
            continue;
        };
        let member_url = file_url(&member.path)?;
        let scope = Url::from_directory_path(member.dir()).map_err(|()| {
            LoaderError::config(member.path.display().to_string(), "path is not absolute")
        })?;
        map.add_scope(&scope, &member_url, imports)?;
    }

    Ok(map)
}
