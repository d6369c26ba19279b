//! The module-graph oracle.
//!
//! An external process (`<bin> info --json <specifier>`) that knows how to
//! resolve, download and cache a whole module graph. Its JSON output is the
//! source of truth for the native loader.

use crate::config::NodeModulesDir;
use crate::error::LoaderError;
use crate::media_type::MediaType;
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ffi::OsString;
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use tracing::debug;

/// Environment variable to override the oracle binary.
pub const ORACLE_BIN_ENV: &str = "ESLOAD_ORACLE_BIN";

/// Oracle binary used when no override is given.
pub const DEFAULT_ORACLE_BIN: &str = "deno";

/// One module of the oracle's graph.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "WireEntry")]
pub enum ModuleEntry {
    Esm {
        specifier: String,
        /// Cached source on disk, if downloaded.
        local: Option<PathBuf>,
        emit: Option<PathBuf>,
        map: Option<PathBuf>,
        media_type: MediaType,
        size: u64,
    },
    Json {
        specifier: String,
        local: Option<PathBuf>,
        media_type: MediaType,
        size: u64,
    },
    Npm {
        specifier: String,
        /// Key into [`OracleResponse::npm_packages`].
        package_id: String,
    },
    Node {
        specifier: String,
        module_name: String,
    },
    Error {
        specifier: String,
        message: String,
    },
}

impl ModuleEntry {
    /// The canonical specifier of this module.
    #[must_use]
    pub fn specifier(&self) -> &str {
        match self {
            Self::Esm { specifier, .. }
            | Self::Json { specifier, .. }
            | Self::Npm { specifier, .. }
            | Self::Node { specifier, .. }
            | Self::Error { specifier, .. } => specifier,
        }
    }
}

/// An npm package in the resolved graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NpmPackage {
    pub name: String,
    pub version: String,
    /// Package ids of direct dependencies.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// Parsed `info --json` output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OracleResponse {
    #[serde(default)]
    pub roots: Vec<String>,
    #[serde(default)]
    pub modules: Vec<ModuleEntry>,
    #[serde(default)]
    pub redirects: HashMap<String, String>,
    #[serde(default)]
    pub npm_packages: HashMap<String, NpmPackage>,
}

// Entries that failed carry `error` and may lack `kind`, so they are matched first.
// Kinds this crate doesn't know fall through to `Unknown` and fail alone.
#[derive(Deserialize)]
#[serde(untagged)]
enum WireEntry {
    Failed {
        specifier: String,
        error: String,
    },
    Module(TaggedEntry),
    Unknown {
        specifier: String,
        #[serde(default)]
        kind: String,
    },
}

#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum TaggedEntry {
    #[serde(rename_all = "camelCase")]
    Esm {
        specifier: String,
        local: Option<PathBuf>,
        emit: Option<PathBuf>,
        map: Option<PathBuf>,
        media_type: Option<MediaType>,
        #[serde(default)]
        size: u64,
    },
    #[serde(rename_all = "camelCase")]
    Json {
        specifier: String,
        local: Option<PathBuf>,
        media_type: Option<MediaType>,
        #[serde(default)]
        size: u64,
    },
    #[serde(rename_all = "camelCase")]
    Npm {
        specifier: String,
        npm_package: String,
    },
    #[serde(rename_all = "camelCase")]
    Node {
        specifier: String,
        module_name: String,
    },
}

impl From<WireEntry> for ModuleEntry {
    fn from(wire: WireEntry) -> Self {
        match wire {
            WireEntry::Failed { specifier, error } => Self::Error {
                specifier,
                message: error,
            },
            WireEntry::Module(TaggedEntry::Esm {
                specifier,
                local,
                emit,
                map,
                media_type,
                size,
            }) => Self::Esm {
                specifier,
                local,
                emit,
                map,
                media_type: media_type.unwrap_or(MediaType::Unknown),
                size,
            },
            WireEntry::Module(TaggedEntry::Json {
                specifier,
                local,
                media_type,
                size,
            }) => Self::Json {
                specifier,
                local,
                media_type: media_type.unwrap_or(MediaType::Json),
                size,
            },
            WireEntry::Module(TaggedEntry::Npm {
                specifier,
                npm_package,
            }) => Self::Npm {
                specifier,
                package_id: npm_package,
            },
            WireEntry::Module(TaggedEntry::Node {
                specifier,
                module_name,
            }) => Self::Node {
                specifier,
                module_name,
            },
            WireEntry::Unknown { specifier, kind } => Self::Error {
                specifier,
                message: format!("Unsupported module kind '{kind}'"),
            },
        }
    }
}

/// Something that can answer module graph queries.
pub trait Oracle: Send + Sync {
    /// Query the graph rooted at `specifier`.
    fn info(&self, specifier: &str) -> BoxFuture<'static, Result<OracleResponse, LoaderError>>;
}

impl<F, Fut> Oracle for F
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<OracleResponse, LoaderError>> + Send + 'static,
{
    fn info(&self, specifier: &str) -> BoxFuture<'static, Result<OracleResponse, LoaderError>> {
        self(specifier.to_string()).boxed()
    }
}

/// Flags forwarded to every oracle invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OracleOptions {
    pub config: Option<PathBuf>,
    pub import_map: Option<String>,
    pub lock: Option<PathBuf>,
    pub node_modules_dir: Option<NodeModulesDir>,
    /// Working directory for the process.
    pub cwd: Option<PathBuf>,
}

/// Runs the oracle as a child process.
#[derive(Debug, Clone)]
pub struct ProcessOracle {
    bin: PathBuf,
    options: OracleOptions,
}

impl ProcessOracle {
    /// Create an oracle using `ESLOAD_ORACLE_BIN`, or `deno` on `PATH`.
    #[must_use]
    pub fn new(options: OracleOptions) -> Self {
        let bin = std::env::var_os(ORACLE_BIN_ENV)
            .filter(|v| !v.is_empty())
            .map_or_else(|| PathBuf::from(DEFAULT_ORACLE_BIN), PathBuf::from);
        Self::with_bin(bin, options)
    }

    /// Create an oracle that runs a specific binary.
    #[must_use]
    pub fn with_bin(bin: PathBuf, options: OracleOptions) -> Self {
        Self { bin, options }
    }

    /// The binary this oracle runs.
    #[must_use]
    pub fn bin(&self) -> &std::path::Path {
        &self.bin
    }

    /// Command line arguments for a query rooted at `specifier`.
    #[must_use]
    pub fn args(&self, specifier: &str) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["info".into(), "--json".into()];
        if let Some(ref config) = self.options.config {
            args.push("--config".into());
            args.push(config.into());
        }
        if let Some(ref import_map) = self.options.import_map {
            args.push("--import-map".into());
            args.push(import_map.into());
        }
        if let Some(ref lock) = self.options.lock {
            args.push("--lock".into());
            args.push(lock.into());
        }
        if let Some(mode) = self.options.node_modules_dir {
            args.push(format!("--node-modules-dir={}", mode.as_str()).into());
        }
        args.push(specifier.into());
        args
    }

    async fn run(
        bin: PathBuf,
        args: Vec<OsString>,
        cwd: Option<PathBuf>,
        specifier: String,
    ) -> Result<OracleResponse, LoaderError> {
        let mut command = tokio::process::Command::new(&bin);
        command
            .args(&args)
            .env("NO_COLOR", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }

        debug!(bin = %bin.display(), specifier = %specifier, "invoking oracle");
        let output = command.output().await.map_err(|e| {
            LoaderError::oracle(&specifier, format!("Failed to run '{}': {e}", bin.display()))
        })?;

        if !output.status.success() {
            return Err(LoaderError::oracle(
                &specifier,
                format!("'{} info' exited with {}", bin.display(), output.status),
            ));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| LoaderError::oracle(&specifier, format!("Invalid oracle output: {e}")))
    }
}

impl Oracle for ProcessOracle {
    fn info(&self, specifier: &str) -> BoxFuture<'static, Result<OracleResponse, LoaderError>> {
        Self::run(
            self.bin.clone(),
            self.args(specifier),
            self.options.cwd.clone(),
            specifier.to_string(),
        )
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const SAMPLE: &str = r#"{
        "roots": ["file:///proj/main.ts"],
        "modules": [
            {
                "kind": "esm",
                "specifier": "file:///proj/main.ts",
                "local": "/proj/main.ts",
                "emit": null,
                "map": null,
                "size": 42,
                "mediaType": "TypeScript",
                "dependencies": []
            },
            {
                "kind": "json",
                "specifier": "file:///proj/data.json",
                "local": "/proj/data.json",
                "size": 7,
                "mediaType": "Json"
            },
            {
                "kind": "npm",
                "specifier": "npm:/preact@10.19.2/hooks",
                "npmPackage": "preact@10.19.2"
            },
            {
                "kind": "node",
                "specifier": "node:fs",
                "moduleName": "fs"
            },
            {
                "specifier": "https://example.com/gone.ts",
                "error": "Module not found"
            }
        ],
        "redirects": {
            "https://example.com/latest.ts": "https://example.com/v2.ts"
        },
        "npmPackages": {
            "preact@10.19.2": {
                "name": "preact",
                "version": "10.19.2",
                "dependencies": []
            }
        }
    }"#;

    #[test]
    fn test_deserialize_all_entry_kinds() {
        let response: OracleResponse = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(response.modules.len(), 5);

        assert!(matches!(
            &response.modules[0],
            ModuleEntry::Esm { media_type: MediaType::TypeScript, size: 42, local: Some(_), .. }
        ));
        assert!(matches!(&response.modules[1], ModuleEntry::Json { .. }));
        assert_eq!(
            response.modules[2],
            ModuleEntry::Npm {
                specifier: "npm:/preact@10.19.2/hooks".to_string(),
                package_id: "preact@10.19.2".to_string(),
            }
        );
        assert_eq!(
            response.modules[3],
            ModuleEntry::Node {
                specifier: "node:fs".to_string(),
                module_name: "fs".to_string(),
            }
        );
        assert_eq!(
            response.modules[4],
            ModuleEntry::Error {
                specifier: "https://example.com/gone.ts".to_string(),
                message: "Module not found".to_string(),
            }
        );

        assert_eq!(
            response.redirects.get("https://example.com/latest.ts").map(String::as_str),
            Some("https://example.com/v2.ts")
        );
        assert_eq!(response.npm_packages["preact@10.19.2"].version, "10.19.2");
    }

    #[test]
    fn test_unknown_kind_fails_only_that_module() {
        let response: OracleResponse = serde_json::from_str(
            r#"{
                "roots": ["https://example.com/a.ts"],
                "modules": [
                    {"kind":"esm","specifier":"https://example.com/a.ts","mediaType":"TypeScript"},
                    {"kind":"external","specifier":"https://example.com/x"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(response.modules.len(), 2);
        assert!(matches!(
            &response.modules[0],
            ModuleEntry::Esm { media_type: MediaType::TypeScript, .. }
        ));
        assert_eq!(
            response.modules[1],
            ModuleEntry::Error {
                specifier: "https://example.com/x".to_string(),
                message: "Unsupported module kind 'external'".to_string(),
            }
        );
    }

    #[test]
    fn test_unknown_media_type_name() {
        let entry: ModuleEntry = serde_json::from_str(
            r#"{"kind":"esm","specifier":"https://x/a.foo","mediaType":"Brainfuck"}"#,
        )
        .unwrap();
        assert!(matches!(entry, ModuleEntry::Esm { media_type: MediaType::Unknown, .. }));
    }

    #[test]
    fn test_args_forward_options() {
        let oracle = ProcessOracle::with_bin(
            PathBuf::from("deno"),
            OracleOptions {
                config: Some(PathBuf::from("/proj/deno.json")),
                import_map: Some("file:///proj/map.json".to_string()),
                lock: Some(PathBuf::from("/proj/deno.lock")),
                node_modules_dir: Some(NodeModulesDir::Manual),
                cwd: None,
            },
        );

        let args: Vec<String> = oracle
            .args("file:///proj/main.ts")
            .into_iter()
            .map(|a| a.into_string().unwrap())
            .collect();
        assert_eq!(
            args,
            [
                "info",
                "--json",
                "--config",
                "/proj/deno.json",
                "--import-map",
                "file:///proj/map.json",
                "--lock",
                "/proj/deno.lock",
                "--node-modules-dir=manual",
                "file:///proj/main.ts",
            ]
        );
    }

    #[test]
    #[serial]
    fn test_bin_env_override() {
        std::env::set_var(ORACLE_BIN_ENV, "/opt/bin/oracle");
        let oracle = ProcessOracle::new(OracleOptions::default());
        assert_eq!(oracle.bin(), std::path::Path::new("/opt/bin/oracle"));
        std::env::remove_var(ORACLE_BIN_ENV);

        let oracle = ProcessOracle::new(OracleOptions::default());
        assert_eq!(oracle.bin(), std::path::Path::new(DEFAULT_ORACLE_BIN));
    }

    #[tokio::test]
    async fn test_closure_oracle() {
        let oracle = |specifier: String| async move {
            Ok(OracleResponse {
                roots: vec![specifier],
                ..Default::default()
            })
        };
        let response = Oracle::info(&oracle, "file:///a.ts").await.unwrap();
        assert_eq!(response.roots, ["file:///a.ts"]);
    }

    #[cfg(unix)]
    fn write_script(dir: &std::path::Path, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_oracle_parses_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            "ok.sh",
            r#"echo '{"roots":["'"$3"'"],"modules":[],"redirects":{}}'"#,
        );

        let oracle = ProcessOracle::with_bin(script, OracleOptions::default());
        let response = oracle.info("file:///proj/main.ts").await.unwrap();
        assert_eq!(response.roots, ["file:///proj/main.ts"]);
        assert!(response.npm_packages.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_oracle_failure() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "exit.sh", "exit 3");

        let oracle = ProcessOracle::with_bin(script, OracleOptions::default());
        let err = oracle.info("file:///proj/main.ts").await.unwrap_err();
        assert_eq!(err.code(), crate::error::codes::ORACLE_FAILED);

        let script = write_script(dir.path(), "garbage.sh", "echo not json");
        let oracle = ProcessOracle::with_bin(script, OracleOptions::default());
        let err = oracle.info("file:///proj/main.ts").await.unwrap_err();
        assert!(err.to_string().contains("Invalid oracle output"), "{err}");
    }
}
