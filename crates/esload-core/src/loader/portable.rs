use super::{LoadResult, LoaderResolution};
use crate::error::LoaderError;
use crate::fetch::RemoteFetchCache;
use crate::lockfile::Lockfile;
use crate::media_type::MediaType;
use crate::specifier::RegistrySpecifier;
use serde_json::Value;
use std::path::PathBuf;
use tokio::sync::OnceCell;
use tracing::debug;
use url::Url;

/// Loader that needs nothing but the network and the local filesystem.
///
/// `jsr:` specifiers are pinned through the lock file and mapped onto the
/// registry's file layout; `npm:` packages must already be installed in a
/// `node_modules` directory.
#[derive(Debug)]
pub struct PortableLoader {
    fetch: RemoteFetchCache,
    registry: Url,
    lock_path: Option<PathBuf>,
    lockfile: OnceCell<Option<Lockfile>>,
}

impl PortableLoader {
    /// Create a portable loader. `registry` must end with `/`.
    #[must_use]
    pub fn new(fetch: RemoteFetchCache, registry: Url, lock_path: Option<PathBuf>) -> Self {
        Self {
            fetch,
            registry,
            lock_path,
            lockfile: OnceCell::new(),
        }
    }

    pub(super) async fn resolve(&self, specifier: &Url) -> Result<LoaderResolution, LoaderError> {
        match specifier.scheme() {
            "file" => Ok(LoaderResolution::Esm {
                specifier: specifier.clone(),
            }),
            "http" | "https" | "data" => {
                let module = self.fetch.load_remote(specifier).await?;
                Ok(LoaderResolution::Esm {
                    specifier: module.specifier,
                })
            }
            "npm" => {
                let parsed = RegistrySpecifier::parse_npm(specifier.as_str())?;
                Ok(LoaderResolution::Npm {
                    package_id: None,
                    package_name: parsed.name,
                    path: parsed.path.unwrap_or_default(),
                })
            }
            "node" => Ok(LoaderResolution::Node {
                path: specifier.path().to_string(),
            }),
            "jsr" => self
                .resolve_jsr(specifier)
                .await
                .map(|specifier| LoaderResolution::Esm { specifier }),
            scheme => Err(LoaderError::parse(
                specifier.as_str(),
                format!("Unsupported scheme: '{scheme}:'"),
            )),
        }
    }

    pub(super) async fn load_esm(&self, specifier: &Url) -> Result<LoadResult, LoaderError> {
        let module = match specifier.scheme() {
            "file" => self.fetch.load_local(specifier).await?,
            "http" | "https" | "data" => self.fetch.load_remote(specifier).await?,
            scheme => {
                return Err(LoaderError::Unreachable(format!(
                    "cannot load '{scheme}:' modules in the portable loader"
                )));
            }
        };
        LoadResult::new(specifier, module.media_type, module.bytes)
    }

    async fn lockfile(&self) -> Result<Option<&Lockfile>, LoaderError> {
        let lockfile = self
            .lockfile
            .get_or_try_init(|| async {
                match &self.lock_path {
                    Some(path) => Lockfile::read_optional(path).await,
                    None => Ok(None),
                }
            })
            .await?;
        Ok(lockfile.as_ref())
    }

    /// Map a `jsr:` specifier to a file URL on the registry.
    async fn resolve_jsr(&self, specifier: &Url) -> Result<Url, LoaderError> {
        let parsed = RegistrySpecifier::parse_jsr(specifier.as_str())?;
        let req = parsed.package_req();

        let lockfile = self.lockfile().await?.ok_or_else(|| {
            LoaderError::resolution(
                specifier.as_str(),
                "",
                "jsr: specifiers are not supported in the portable loader without a lockfile",
            )
        })?;
        let version = lockfile.package_version(&req).ok_or_else(|| {
            LoaderError::resolution(
                specifier.as_str(),
                lockfile.path().display().to_string(),
                format!("Specifier not found in lockfile: {req}"),
            )
        })?;

        let meta_url = self.registry_url(&format!("{}/{version}_meta.json", parsed.name))?;
        let meta = self.fetch.load_remote(&meta_url).await?;
        if meta.media_type != MediaType::Json {
            return Err(LoaderError::UnsupportedMediaType {
                specifier: meta.specifier.to_string(),
                media_type: meta.media_type.to_string(),
            });
        }
        let meta: Value = serde_json::from_slice(&meta.bytes)
            .map_err(|e| LoaderError::fetch(meta_url.as_str(), format!("Invalid package metadata: {e}")))?;

        let entry = format!(".{}", parsed.path.as_deref().unwrap_or(""));
        let export = meta
            .get("exports")
            .and_then(|exports| exports.get(&entry))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                LoaderError::resolution(
                    specifier.as_str(),
                    "",
                    format!(
                        "Package 'jsr:{}@{version}' has no export named '{entry}'",
                        parsed.name
                    ),
                )
            })?;

        let resolved = self.registry_url(&format!("{}/{version}/{export}", parsed.name))?;
        debug!(%specifier, %resolved, "resolved jsr specifier");
        Ok(resolved)
    }

    fn registry_url(&self, path: &str) -> Result<Url, LoaderError> {
        self.registry
            .join(path)
            .map_err(|e| LoaderError::parse(path, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::Loader;
    use crate::media_type::LoaderTag;
    use axum::http::{header, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::Router;
    use std::path::Path;
    use tempfile::tempdir;

    const META: &str = r#"{
        "manifest": {},
        "exports": { ".": "./mod.ts", "./posix": "./posix/mod.ts" }
    }"#;

    async fn start_registry() -> Url {
        let app = Router::new()
            .route(
                "/@std/path/0.213.1_meta.json",
                get(|| async { ([(header::CONTENT_TYPE, "application/json")], META) }),
            )
            .route(
                "/@std/path/0.213.1/mod.ts",
                get(|| async {
                    (
                        [(header::CONTENT_TYPE, "application/typescript")],
                        "export * from './posix/mod.ts';",
                    )
                }),
            )
            .route(
                "/@std/fs/1.0.0_meta.json",
                get(|| async { ([(header::CONTENT_TYPE, "text/html")], "<html></html>") }),
            )
            .route(
                "/moved.ts",
                get(|| async {
                    (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, "/@std/path/0.213.1/mod.ts")])
                        .into_response()
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Url::parse(&format!("http://{addr}/")).unwrap()
    }

    fn write_lock(dir: &Path) -> PathBuf {
        let path = dir.join("deno.lock");
        std::fs::write(
            &path,
            r#"{
                "version": "4",
                "specifiers": {
                    "jsr:@std/path@^0.213": "0.213.1",
                    "jsr:@std/fs@1": "1.0.0"
                }
            }"#,
        )
        .unwrap();
        path
    }

    fn loader(registry: Url, lock_path: Option<PathBuf>) -> Loader {
        Loader::Portable(PortableLoader::new(
            RemoteFetchCache::new().unwrap(),
            registry,
            lock_path,
        ))
    }

    #[tokio::test]
    async fn test_jsr_pinned_by_lockfile() {
        let registry = start_registry().await;
        let dir = tempdir().unwrap();
        let loader = loader(registry.clone(), Some(write_lock(dir.path())));

        let resolution = loader
            .resolve(&Url::parse("jsr:@std/path@^0.213").unwrap())
            .await
            .unwrap();
        let LoaderResolution::Esm { specifier } = resolution else {
            panic!("expected esm resolution, got {resolution:?}");
        };
        assert!(specifier.as_str().contains("@std/path/0.213.1/"), "{specifier}");
        assert_eq!(specifier, registry.join("@std/path/0.213.1/mod.ts").unwrap());

        let subpath = loader
            .resolve(&Url::parse("jsr:@std/path@^0.213/posix").unwrap())
            .await
            .unwrap();
        assert_eq!(
            subpath,
            LoaderResolution::Esm {
                specifier: registry.join("@std/path/0.213.1/posix/mod.ts").unwrap()
            }
        );

        let result = loader.load_esm(&specifier).await.unwrap();
        assert_eq!(result.loader, LoaderTag::Ts);
    }

    #[tokio::test]
    async fn test_jsr_errors() {
        let registry = start_registry().await;
        let dir = tempdir().unwrap();

        let unlocked = loader(registry.clone(), None);
        let err = unlocked
            .resolve(&Url::parse("jsr:@std/path@^0.213").unwrap())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("without a lockfile"), "{err}");

        let locked = loader(registry, Some(write_lock(dir.path())));
        let err = locked
            .resolve(&Url::parse("jsr:@std/path@^1").unwrap())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Specifier not found in lockfile: jsr:@std/path@^1"));

        let err = locked
            .resolve(&Url::parse("jsr:@std/path@^0.213/win32").unwrap())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("has no export named './win32'"), "{err}");

        let err = locked
            .resolve(&Url::parse("jsr:@std/fs@1").unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.code(), crate::error::codes::MEDIA_TYPE_UNSUPPORTED);
    }

    #[tokio::test]
    async fn test_remote_resolves_to_final_url() {
        let registry = start_registry().await;
        let loader = loader(registry.clone(), None);

        let resolution = loader
            .resolve(&registry.join("moved.ts").unwrap())
            .await
            .unwrap();
        assert_eq!(
            resolution,
            LoaderResolution::Esm {
                specifier: registry.join("@std/path/0.213.1/mod.ts").unwrap()
            }
        );
    }

    #[tokio::test]
    async fn test_local_npm_and_node() {
        let loader = loader(Url::parse("https://jsr.io/").unwrap(), None);

        let dir = tempdir().unwrap();
        let file = Url::from_file_path(dir.path().join("main.ts")).unwrap();
        assert_eq!(
            loader.resolve(&file).await.unwrap(),
            LoaderResolution::Esm {
                specifier: file.clone()
            }
        );

        assert_eq!(
            loader
                .resolve(&Url::parse("npm:@preact/signals@1/core").unwrap())
                .await
                .unwrap(),
            LoaderResolution::Npm {
                package_id: None,
                package_name: "@preact/signals".into(),
                path: "/core".into(),
            }
        );

        assert_eq!(
            loader.resolve(&Url::parse("node:path").unwrap()).await.unwrap(),
            LoaderResolution::Node {
                path: "path".into()
            }
        );

        let err = loader
            .resolve(&Url::parse("ftp://example.com/a.ts").unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.code(), crate::error::codes::SPECIFIER_INVALID);
    }

    #[tokio::test]
    async fn test_npm_found_in_local_node_modules() {
        let dir = tempdir().unwrap();
        let pkg = dir.path().join("node_modules/preact");
        std::fs::create_dir_all(&pkg).unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        let loader = loader(Url::parse("https://jsr.io/").unwrap(), None);

        let resolution = loader
            .resolve(&Url::parse("npm:preact@10/hooks").unwrap())
            .await
            .unwrap();
        let found = loader
            .node_modules_dir(&resolution, Some(&dir.path().join("src")))
            .await
            .unwrap();
        assert_eq!(found, pkg);

        let err = loader.node_modules_dir(&resolution, None).await.unwrap_err();
        assert_eq!(err.code(), crate::error::codes::PACKAGE_NOT_FOUND);
    }
}
