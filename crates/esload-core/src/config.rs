use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Environment variable to override the JSR registry URL.
pub const JSR_REGISTRY_ENV: &str = "JSR_REGISTRY_URL";

/// Registry override honored when `JSR_REGISTRY_URL` is unset, for
/// environments already configured for the deno CLI.
pub const DENO_REGISTRY_ENV: &str = "DENO_REGISTRY_URL";

/// Default JSR registry.
pub const DEFAULT_JSR_REGISTRY: &str = "https://jsr.io/";

/// Directory name under the cache root that holds materialized packages.
pub const DEFAULT_NAMESPACE: &str = "esload";

/// Default window during which module info lookups are batched together.
pub const DEFAULT_BATCH_DEBOUNCE: Duration = Duration::from_millis(5);

/// Which loader backs `load` requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LoaderKind {
    /// Ask the module-graph oracle and read from its cache.
    #[default]
    Native,
    /// Fetch over the network only.
    Portable,
}

impl LoaderKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Portable => "portable",
        }
    }
}

impl std::str::FromStr for LoaderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "native" => Ok(Self::Native),
            "portable" => Ok(Self::Portable),
            other => Err(format!("Invalid loader: {other}")),
        }
    }
}

/// How npm packages are laid out on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeModulesDir {
    /// A local `node_modules` managed by the oracle.
    Auto,
    /// A `node_modules` directory managed by the user.
    Manual,
    /// Packages are materialized from the global cache.
    None,
}

impl NodeModulesDir {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
            Self::None => "none",
        }
    }
}

impl std::str::FromStr for NodeModulesDir {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "manual" => Ok(Self::Manual),
            "none" => Ok(Self::None),
            other => Err(format!("Invalid nodeModulesDir mode: {other}")),
        }
    }
}

/// Options consumed from the bundler host at build start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildOptions {
    /// Absolute working directory of the build.
    pub cwd: PathBuf,

    /// Entry point specifiers, relative to `cwd` or absolute URLs.
    pub entry_points: Vec<String>,

    /// External patterns; `*` matches any run of non-`/` characters.
    pub external: Vec<String>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            entry_points: Vec::new(),
            external: Vec::new(),
        }
    }
}

impl BuildOptions {
    /// Create build options for the given working directory.
    #[must_use]
    pub fn new(cwd: PathBuf) -> Self {
        Self {
            cwd,
            ..Default::default()
        }
    }

    /// Set entry points.
    #[must_use]
    pub fn with_entry_points(mut self, entry_points: Vec<String>) -> Self {
        self.entry_points = entry_points;
        self
    }

    /// Set external patterns.
    #[must_use]
    pub fn with_external(mut self, external: Vec<String>) -> Self {
        self.external = external;
        self
    }
}

/// Plugin configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginOptions {
    /// Loader backing `load` requests.
    pub loader: LoaderKind,

    /// Explicit project configuration file. Must be absolute.
    pub config_path: Option<PathBuf>,

    /// Import map document to use instead of the config's mappings.
    pub import_map_url: Option<Url>,

    /// Lock file path, overriding the config's `lock`.
    pub lock_path: Option<PathBuf>,

    /// npm package layout, overriding the config's `nodeModulesDir`.
    pub node_modules_dir: Option<NodeModulesDir>,

    /// JSR registry used by the portable loader.
    pub jsr_registry_url: Option<Url>,

    /// Root of the shared package cache. Defaults to [`crate::paths::cache_root`].
    pub cache_root: Option<PathBuf>,

    /// Directory name under the cache root for materialized packages.
    pub namespace: String,

    /// Batching window for module info lookups.
    #[serde(skip, default = "default_debounce")]
    pub batch_debounce: Duration,
}

fn default_debounce() -> Duration {
    DEFAULT_BATCH_DEBOUNCE
}

impl Default for PluginOptions {
    fn default() -> Self {
        Self {
            loader: LoaderKind::default(),
            config_path: None,
            import_map_url: None,
            lock_path: None,
            node_modules_dir: None,
            jsr_registry_url: None,
            cache_root: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
            batch_debounce: DEFAULT_BATCH_DEBOUNCE,
        }
    }
}

impl PluginOptions {
    /// Set the loader.
    #[must_use]
    pub fn with_loader(mut self, loader: LoaderKind) -> Self {
        self.loader = loader;
        self
    }

    /// Set the configuration file.
    #[must_use]
    pub fn with_config_path(mut self, path: PathBuf) -> Self {
        self.config_path = Some(path);
        self
    }

    /// Set the import map URL.
    #[must_use]
    pub fn with_import_map_url(mut self, url: Url) -> Self {
        self.import_map_url = Some(url);
        self
    }

    /// Set the lock file.
    #[must_use]
    pub fn with_lock_path(mut self, path: PathBuf) -> Self {
        self.lock_path = Some(path);
        self
    }

    /// Set the npm package layout.
    #[must_use]
    pub fn with_node_modules_dir(mut self, mode: NodeModulesDir) -> Self {
        self.node_modules_dir = Some(mode);
        self
    }

    /// Set the JSR registry.
    #[must_use]
    pub fn with_jsr_registry_url(mut self, url: Url) -> Self {
        self.jsr_registry_url = Some(url);
        self
    }

    /// Set the cache root.
    #[must_use]
    pub fn with_cache_root(mut self, root: PathBuf) -> Self {
        self.cache_root = Some(root);
        self
    }

    /// Set the batching window.
    #[must_use]
    pub fn with_batch_debounce(mut self, debounce: Duration) -> Self {
        self.batch_debounce = debounce;
        self
    }

    /// The JSR registry: explicit option, then `JSR_REGISTRY_URL`, then
    /// `DENO_REGISTRY_URL`, then the public registry. Always ends with `/`
    /// so paths join beneath it. Unparseable values are skipped.
    #[must_use]
    pub fn jsr_registry(&self) -> Url {
        let mut url = self
            .jsr_registry_url
            .clone()
            .or_else(|| {
                [JSR_REGISTRY_ENV, DENO_REGISTRY_ENV]
                    .into_iter()
                    .find_map(|name| std::env::var(name).ok().and_then(|v| Url::parse(&v).ok()))
            })
            .unwrap_or_else(|| Url::parse(DEFAULT_JSR_REGISTRY).expect("valid default registry"));
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_loader_kind_parse() {
        assert_eq!("native".parse::<LoaderKind>(), Ok(LoaderKind::Native));
        assert_eq!("portable".parse::<LoaderKind>(), Ok(LoaderKind::Portable));
        assert!("fast".parse::<LoaderKind>().is_err());
    }

    #[test]
    fn test_node_modules_dir_roundtrip_names() {
        for mode in [NodeModulesDir::Auto, NodeModulesDir::Manual, NodeModulesDir::None] {
            assert_eq!(mode.as_str().parse::<NodeModulesDir>(), Ok(mode));
        }
    }

    #[test]
    fn test_options_deserialize_camel_case() {
        let options: PluginOptions = serde_json::from_value(serde_json::json!({
            "loader": "portable",
            "configPath": null,
            "importMapUrl": "file:///proj/import_map.json",
            "lockPath": null,
            "nodeModulesDir": "manual",
            "jsrRegistryUrl": null,
            "cacheRoot": null,
            "namespace": "custom"
        }))
        .unwrap();

        assert_eq!(options.loader, LoaderKind::Portable);
        assert_eq!(options.node_modules_dir, Some(NodeModulesDir::Manual));
        assert_eq!(options.namespace, "custom");
        assert_eq!(options.batch_debounce, DEFAULT_BATCH_DEBOUNCE);
    }

    #[test]
    #[serial]
    fn test_jsr_registry_precedence() {
        std::env::remove_var(JSR_REGISTRY_ENV);
        std::env::remove_var(DENO_REGISTRY_ENV);
        let options = PluginOptions::default();
        assert_eq!(options.jsr_registry().as_str(), DEFAULT_JSR_REGISTRY);

        std::env::set_var(JSR_REGISTRY_ENV, "http://localhost:4000/registry");
        assert_eq!(
            options.jsr_registry().as_str(),
            "http://localhost:4000/registry/"
        );

        let explicit = options.with_jsr_registry_url(Url::parse("https://mirror.test/").unwrap());
        assert_eq!(explicit.jsr_registry().as_str(), "https://mirror.test/");
        std::env::remove_var(JSR_REGISTRY_ENV);
    }

    #[test]
    #[serial]
    fn test_deno_registry_env_fallback() {
        std::env::remove_var(JSR_REGISTRY_ENV);
        std::env::set_var(DENO_REGISTRY_ENV, "http://localhost:4545");
        let options = PluginOptions::default();
        assert_eq!(options.jsr_registry().as_str(), "http://localhost:4545/");

        // The esload-specific variable wins when both are set.
        std::env::set_var(JSR_REGISTRY_ENV, "http://localhost:4000/");
        assert_eq!(options.jsr_registry().as_str(), "http://localhost:4000/");

        std::env::remove_var(JSR_REGISTRY_ENV);
        std::env::remove_var(DENO_REGISTRY_ENV);
    }
}
