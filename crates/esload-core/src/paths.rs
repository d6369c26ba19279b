use std::path::{Path, PathBuf};
use url::Url;

/// Environment variable that relocates the shared module cache.
pub const CACHE_ROOT_ENV: &str = "DENO_DIR";

/// Get the root of the shared module and package cache.
///
/// Uses `DENO_DIR` when set, otherwise a platform-appropriate location:
/// - Linux: `$XDG_CACHE_HOME/deno` or `~/.cache/deno`
/// - macOS: `~/Library/Caches/deno`
/// - Windows: `%LOCALAPPDATA%\deno`
#[must_use]
pub fn cache_root() -> PathBuf {
    if let Some(dir) = std::env::var_os(CACHE_ROOT_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(dir);
    }

    dirs_next::cache_dir().map_or_else(
        || {
            dirs_next::home_dir().map_or_else(
                || PathBuf::from(".deno-cache"),
                |p| p.join(".cache").join("deno"),
            )
        },
        |p| p.join("deno"),
    )
}

/// Check whether any component of `path` is a `node_modules` directory.
#[must_use]
pub fn is_in_node_modules(path: &Path) -> bool {
    path.components()
        .any(|c| c.as_os_str() == "node_modules")
}

/// Convert a directory path to a `file:` URL that ends in `/`, so that
/// relative references join beneath it.
#[must_use]
pub fn dir_url(dir: &Path) -> Option<Url> {
    Url::from_directory_path(dir).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_cache_root_env_override() {
        std::env::set_var(CACHE_ROOT_ENV, "/tmp/custom-cache");
        assert_eq!(cache_root(), PathBuf::from("/tmp/custom-cache"));

        std::env::set_var(CACHE_ROOT_ENV, "");
        assert_ne!(cache_root(), PathBuf::from(""));
        std::env::remove_var(CACHE_ROOT_ENV);
    }

    #[test]
    #[serial]
    fn test_cache_root_default_ends_in_deno() {
        std::env::remove_var(CACHE_ROOT_ENV);
        let root = cache_root();
        assert!(root.ends_with("deno"), "unexpected cache root {}", root.display());
    }

    #[test]
    fn test_is_in_node_modules() {
        assert!(is_in_node_modules(Path::new("/proj/node_modules/react/index.js")));
        assert!(!is_in_node_modules(Path::new("/proj/src/node_modules_like/a.js")));
        assert!(!is_in_node_modules(Path::new("/proj/src/main.ts")));
    }

    #[test]
    fn test_dir_url_has_trailing_slash() {
        let tmp = tempfile::tempdir().unwrap();
        let url = dir_url(tmp.path()).unwrap();
        assert!(url.as_str().ends_with('/'));
        assert_eq!(url.scheme(), "file");
    }
}
