use super::{LoadResult, LoaderResolution};
use crate::config::NodeModulesDir;
use crate::error::LoaderError;
use crate::fetch::RemoteFetchCache;
use crate::info::ModuleInfoCache;
use crate::npm::PackageMaterializer;
use crate::oracle::ModuleEntry;
use crate::specifier::RegistrySpecifier;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tracing::trace;
use url::Url;

/// Loader backed by the module-graph oracle.
///
/// Remote modules are whatever the oracle already downloaded; npm packages
/// come from the shared package cache unless a local `node_modules` is in use.
#[derive(Debug)]
pub struct NativeLoader {
    info: ModuleInfoCache,
    materializer: PackageMaterializer,
    data_urls: RemoteFetchCache,
    node_modules_dir: Option<NodeModulesDir>,
}

impl NativeLoader {
    #[must_use]
    pub fn new(
        info: ModuleInfoCache,
        materializer: PackageMaterializer,
        data_urls: RemoteFetchCache,
    ) -> Self {
        Self {
            info,
            materializer,
            data_urls,
            node_modules_dir: None,
        }
    }

    #[must_use]
    pub fn with_node_modules_dir(mut self, mode: Option<NodeModulesDir>) -> Self {
        self.node_modules_dir = mode;
        self
    }

    /// Whether npm packages are linked out of the shared cache rather than
    /// found in a project `node_modules`.
    #[must_use]
    pub fn uses_global_cache(&self) -> bool {
        matches!(self.node_modules_dir, None | Some(NodeModulesDir::None))
    }

    pub(super) async fn resolve(&self, specifier: &Url) -> Result<LoaderResolution, LoaderError> {
        let entry = self.info.get(specifier.as_str()).await?;
        trace!(%specifier, canonical = entry.specifier(), "oracle entry");

        match entry {
            ModuleEntry::Error { specifier, message } => {
                Err(LoaderError::oracle(specifier, message))
            }
            ModuleEntry::Npm {
                specifier,
                package_id,
            } => {
                let parsed = RegistrySpecifier::parse_npm(&specifier)?;
                Ok(LoaderResolution::Npm {
                    package_id: Some(package_id),
                    package_name: parsed.name,
                    path: parsed.path.unwrap_or_default(),
                })
            }
            ModuleEntry::Node { module_name, .. } => Ok(LoaderResolution::Node { path: module_name }),
            ModuleEntry::Esm { specifier, .. } | ModuleEntry::Json { specifier, .. } => {
                let specifier = Url::parse(&specifier)
                    .map_err(|e| LoaderError::oracle(specifier.as_str(), e.to_string()))?;
                Ok(LoaderResolution::Esm { specifier })
            }
        }
    }

    pub(super) async fn load_esm(&self, specifier: &Url) -> Result<LoadResult, LoaderError> {
        if specifier.scheme() == "data" {
            let module = self.data_urls.load_remote(specifier).await?;
            return LoadResult::new(specifier, module.media_type, module.bytes);
        }

        let entry = self.info.get(specifier.as_str()).await?;
        let (local, media_type) = match entry {
            ModuleEntry::Esm {
                local, media_type, ..
            }
            | ModuleEntry::Json {
                local, media_type, ..
            } => (local, media_type),
            ModuleEntry::Error { specifier, message } => {
                return Err(LoaderError::oracle(specifier, message));
            }
            other => {
                return Err(LoaderError::Unreachable(format!(
                    "'{}' is not an ECMAScript module",
                    other.specifier()
                )));
            }
        };

        let local = local
            .ok_or_else(|| LoaderError::fetch(specifier.as_str(), "Module not downloaded yet"))?;
        let contents = tokio::fs::read(&local)
            .await
            .map_err(|e| LoaderError::fs(&local, &e))?;

        LoadResult::new(specifier, media_type, Bytes::from(contents))
    }

    pub(super) async fn directory_for(&self, id: &str) -> Result<PathBuf, LoaderError> {
        self.materializer.directory_for(id).await
    }

    pub(super) fn package_id_from_name_in_package(
        &self,
        name: &str,
        parent_id: &str,
    ) -> Result<String, LoaderError> {
        self.materializer
            .package_id_from_name_in_package(name, parent_id)
    }

    pub(super) fn package_id_from_path(&self, path: &Path) -> Option<String> {
        self.materializer.package_id_from_path(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::Loader;
    use crate::media_type::LoaderTag;
    use crate::oracle::{Oracle, OracleResponse};
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;

    struct FixedOracle(serde_json::Value);

    impl Oracle for FixedOracle {
        fn info(&self, _specifier: &str) -> BoxFuture<'static, Result<OracleResponse, LoaderError>> {
            let response = serde_json::from_value(self.0.clone()).map_err(LoaderError::from);
            async move { response }.boxed()
        }
    }

    fn loader(root: &Path, graph: serde_json::Value) -> Loader {
        let info = ModuleInfoCache::with_debounce(Arc::new(FixedOracle(graph)), Duration::ZERO);
        let materializer =
            PackageMaterializer::new(root.to_path_buf(), "esload".into(), Arc::new(info.clone()));
        let fetch = RemoteFetchCache::new().unwrap();
        Loader::Native(NativeLoader::new(info, materializer, fetch))
    }

    fn graph(local: &Path) -> serde_json::Value {
        json!({
            "roots": ["https://deno.land/x/mod.ts"],
            "modules": [
                {
                    "kind": "esm",
                    "specifier": "https://deno.land/x/mod.ts",
                    "local": local,
                    "mediaType": "TypeScript",
                    "size": 16
                },
                {
                    "kind": "esm",
                    "specifier": "https://deno.land/x/gone.ts",
                    "mediaType": "TypeScript",
                    "size": 0
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
                    "specifier": "https://deno.land/x/broken.ts",
                    "error": "Module not found"
                }
            ],
            "redirects": {},
            "npmPackages": {
                "preact@10.19.2": { "name": "preact", "version": "10.19.2", "dependencies": [] }
            }
        })
    }

    #[tokio::test]
    async fn test_resolve_kinds() {
        let dir = tempdir().unwrap();
        let loader = loader(dir.path(), graph(&dir.path().join("mod.ts")));

        let esm = Url::parse("https://deno.land/x/mod.ts").unwrap();
        assert_eq!(
            loader.resolve(&esm).await.unwrap(),
            LoaderResolution::Esm { specifier: esm }
        );

        let npm = Url::parse("npm:/preact@10.19.2/hooks").unwrap();
        assert_eq!(
            loader.resolve(&npm).await.unwrap(),
            LoaderResolution::Npm {
                package_id: Some("preact@10.19.2".into()),
                package_name: "preact".into(),
                path: "/hooks".into(),
            }
        );

        let node = Url::parse("node:fs").unwrap();
        assert_eq!(
            loader.resolve(&node).await.unwrap(),
            LoaderResolution::Node { path: "fs".into() }
        );

        let broken = Url::parse("https://deno.land/x/broken.ts").unwrap();
        let err = loader.resolve(&broken).await.unwrap_err();
        assert_eq!(err.code(), crate::error::codes::ORACLE_FAILED);
        assert!(err.to_string().contains("Module not found"));
    }

    #[tokio::test]
    async fn test_load_reads_cached_source() {
        let dir = tempdir().unwrap();
        let local = dir.path().join("mod.ts");
        std::fs::write(&local, "export const x: number = 1;").unwrap();
        let loader = loader(dir.path(), graph(&local));

        let result = loader
            .load_esm(&Url::parse("https://deno.land/x/mod.ts").unwrap())
            .await
            .unwrap();
        assert_eq!(result.loader, LoaderTag::Ts);
        assert_eq!(&result.contents[..], b"export const x: number = 1;");
        assert!(result.watch_files.is_empty());
    }

    #[tokio::test]
    async fn test_load_not_downloaded() {
        let dir = tempdir().unwrap();
        let loader = loader(dir.path(), graph(&dir.path().join("mod.ts")));

        let err = loader
            .load_esm(&Url::parse("https://deno.land/x/gone.ts").unwrap())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Module not downloaded yet"));
    }

    #[tokio::test]
    async fn test_load_data_url_skips_oracle() {
        let dir = tempdir().unwrap();
        let loader = loader(dir.path(), json!({ "roots": [], "modules": [] }));

        let url = Url::parse("data:application/typescript,export%20default%201").unwrap();
        let result = loader.load_esm(&url).await.unwrap();
        assert_eq!(result.loader, LoaderTag::Ts);
        assert_eq!(&result.contents[..], b"export default 1");
    }

    #[tokio::test]
    async fn test_npm_directory_from_shared_cache() {
        let dir = tempdir().unwrap();
        let package_dir = dir.path().join("npm/registry.npmjs.org/preact/10.19.2");
        std::fs::create_dir_all(package_dir.join("hooks")).unwrap();
        std::fs::write(package_dir.join("package.json"), "{}").unwrap();
        let loader = loader(dir.path(), graph(&dir.path().join("mod.ts")));

        let npm = Url::parse("npm:/preact@10.19.2/hooks").unwrap();
        let resolution = loader.resolve(&npm).await.unwrap();
        let linked = loader.node_modules_dir(&resolution, None).await.unwrap();

        assert_eq!(
            linked,
            dir.path().join("esload/preact@10.19.2/node_modules/preact")
        );
        assert!(linked.join("package.json").is_file());
        assert_eq!(
            loader.package_id_from_path(&linked.join("hooks/index.js")).as_deref(),
            Some("preact@10.19.2")
        );
    }
}
