//! Project configuration files (`deno.json` / `deno.jsonc`).

use crate::config::NodeModulesDir;
use crate::error::LoaderError;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Configuration file names, in lookup order.
pub const CONFIG_FILE_NAMES: [&str; 2] = ["deno.json", "deno.jsonc"];

/// Lock file name used when the config doesn't name one.
pub const DEFAULT_LOCK_FILE: &str = "deno.lock";

/// The `lock` setting of a config file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LockSetting {
    /// Not specified; `deno.lock` beside the config is used if present.
    #[default]
    Default,
    /// `"lock": false`.
    Disabled,
    /// `"lock": "<path>"`, resolved against the config directory.
    Path(PathBuf),
}

/// A parsed configuration file. Unrecognized keys are ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectConfig {
    /// Absolute path of the file this was read from.
    pub path: PathBuf,
    pub imports: Option<Map<String, Value>>,
    pub scopes: Option<Map<String, Value>>,
    pub lock: LockSetting,
    /// The `importMap` key, as written.
    pub import_map: Option<String>,
    /// Workspace member patterns.
    pub workspace: Vec<String>,
    pub node_modules_dir: Option<NodeModulesDir>,
}

impl ProjectConfig {
    /// Read and parse a configuration file.
    ///
    /// # Errors
    /// Returns an error if the file can't be read, isn't valid JSON with
    /// comments, or a recognized key has the wrong type.
    pub fn read(path: &Path) -> Result<Self, LoaderError> {
        let source = std::fs::read_to_string(path).map_err(|e| LoaderError::fs(path, &e))?;
        let value = parse_jsonc(&source).map_err(|e| {
            LoaderError::config(path.display().to_string(), format!("Invalid JSON: {e}"))
        })?;
        Self::from_value(path, &value)
    }

    /// Interpret an already parsed configuration document.
    ///
    /// # Errors
    /// Returns an error if a recognized key has the wrong type.
    pub fn from_value(path: &Path, value: &Value) -> Result<Self, LoaderError> {
        let location = path.display().to_string();
        let invalid = |key: &str, expected: &str| {
            LoaderError::config(&location, format!("'{key}' must be {expected}"))
        };

        let Value::Object(root) = value else {
            return Err(LoaderError::config(&location, "config must be a JSON object"));
        };

        let object_field = |key: &str| match root.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Object(map)) => Ok(Some(map.clone())),
            Some(_) => Err(invalid(key, "an object")),
        };
        let imports = object_field("imports")?;
        let scopes = object_field("scopes")?;

        let dir = path.parent().unwrap_or(Path::new("/"));
        let lock = match root.get("lock") {
            None | Some(Value::Null) | Some(Value::Bool(true)) => LockSetting::Default,
            Some(Value::Bool(false)) => LockSetting::Disabled,
            Some(Value::String(p)) => LockSetting::Path(dir.join(p)),
            Some(Value::Object(obj)) => match obj.get("path") {
                Some(Value::String(p)) => LockSetting::Path(dir.join(p)),
                None => LockSetting::Default,
                Some(_) => return Err(invalid("lock.path", "a string")),
            },
            Some(_) => return Err(invalid("lock", "a string or boolean")),
        };

        let import_map = match root.get("importMap") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => return Err(invalid("importMap", "a string")),
        };

        let members = match root.get("workspace") {
            None | Some(Value::Null) => None,
            Some(Value::Array(items)) => Some(items),
            Some(Value::Object(obj)) => match obj.get("members") {
                Some(Value::Array(items)) => Some(items),
                None => None,
                Some(_) => return Err(invalid("workspace.members", "an array of strings")),
            },
            Some(_) => return Err(invalid("workspace", "an array or object")),
        };
        let workspace = members
            .map(|items| {
                items
                    .iter()
                    .map(|item| {
                        item.as_str()
                            .map(str::to_owned)
                            .ok_or_else(|| invalid("workspace", "an array of strings"))
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?
            .unwrap_or_default();

        let node_modules_dir = match root.get("nodeModulesDir") {
            None | Some(Value::Null) => None,
            Some(Value::Bool(true)) => Some(NodeModulesDir::Auto),
            Some(Value::Bool(false)) => Some(NodeModulesDir::None),
            Some(Value::String(s)) => Some(
                s.parse::<NodeModulesDir>()
                    .map_err(|_| invalid("nodeModulesDir", "\"auto\", \"manual\" or \"none\""))?,
            ),
            Some(_) => return Err(invalid("nodeModulesDir", "a string or boolean")),
        };

        Ok(Self {
            path: path.to_path_buf(),
            imports,
            scopes,
            lock,
            import_map,
            workspace,
            node_modules_dir,
        })
    }

    /// Directory containing the config file.
    #[must_use]
    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or(Path::new("/"))
    }

    /// Whether this config declares workspace members.
    #[must_use]
    pub fn is_workspace_root(&self) -> bool {
        !self.workspace.is_empty()
    }

    /// The lock file this config selects, if any.
    #[must_use]
    pub fn lock_path(&self) -> Option<PathBuf> {
        match self.lock {
            LockSetting::Disabled => None,
            LockSetting::Path(ref p) => Some(p.clone()),
            LockSetting::Default => {
                let candidate = self.dir().join(DEFAULT_LOCK_FILE);
                candidate.is_file().then_some(candidate)
            }
        }
    }

    /// Expand the workspace member patterns to member directories.
    ///
    /// Patterns are relative to the config directory and may be globs.
    /// Only directories holding a config file are members.
    #[must_use]
    pub fn member_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        for pattern in &self.workspace {
            let pattern = pattern.trim_start_matches("./").trim_end_matches('/');
            let full = self.dir().join(pattern);
            let Ok(entries) = glob::glob(&full.to_string_lossy()) else {
                continue;
            };
            for entry in entries.flatten() {
                if entry.is_dir() && find_config_in(&entry).is_some() && !dirs.contains(&entry) {
                    dirs.push(entry);
                }
            }
        }
        dirs
    }
}

/// Find a config file directly inside `dir`.
#[must_use]
pub fn find_config_in(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILE_NAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.is_file())
}

/// Parse JSON that may contain comments and trailing commas.
///
/// # Errors
/// Returns an error if the remaining text is not valid JSON.
pub fn parse_jsonc(source: &str) -> Result<Value, serde_json::Error> {
    serde_json::from_str(&strip_trailing_commas(&strip_comments(source)))
}

/// Remove `//` and `/* */` comments outside of strings.
fn strip_comments(source: &str) -> String {
    let mut result = String::with_capacity(source.len());
    let chars: Vec<char> = source.chars().collect();
    let len = chars.len();
    let mut i = 0;
    let mut in_string = false;

    while i < len {
        let c = chars[i];
        if in_string {
            result.push(c);
            if c == '\\' && i + 1 < len {
                result.push(chars[i + 1]);
                i += 2;
                continue;
            }
            if c == '"' {
                in_string = false;
            }
            i += 1;
        } else if c == '/' && i + 1 < len && chars[i + 1] == '/' {
            while i < len && chars[i] != '\n' {
                i += 1;
            }
        } else if c == '/' && i + 1 < len && chars[i + 1] == '*' {
            i += 2;
            while i + 1 < len && !(chars[i] == '*' && chars[i + 1] == '/') {
                // Keep line numbers stable for error messages.
                if chars[i] == '\n' {
                    result.push('\n');
                }
                i += 1;
            }
            i += 2;
        } else {
            if c == '"' {
                in_string = true;
            }
            result.push(c);
            i += 1;
        }
    }

    result
}

/// Remove commas directly followed (modulo whitespace) by `}` or `]`.
fn strip_trailing_commas(source: &str) -> String {
    let mut result = String::with_capacity(source.len());
    let chars: Vec<char> = source.chars().collect();
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
        } else if c == '"' {
            in_string = true;
        } else if c == ',' {
            let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
            if matches!(next, Some('}' | ']')) {
                continue;
            }
        }
        result.push(c);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_jsonc_comments_and_trailing_commas() {
        let value = parse_jsonc(
            r#"{
                // line comment
                "imports": {
                    "a/": "./a/", /* block */
                    "url": "https://example.com//not-a-comment",
                },
                "list": [1, 2, ],
            }"#,
        )
        .unwrap();

        assert_eq!(value["imports"]["url"], "https://example.com//not-a-comment");
        assert_eq!(value["list"], serde_json::json!([1, 2]));
    }

    #[test]
    fn test_comma_inside_string_kept() {
        let value = parse_jsonc(r#"{"a": "x, }", "b": "say \"hi\", ]"}"#).unwrap();
        assert_eq!(value["a"], "x, }");
        assert_eq!(value["b"], "say \"hi\", ]");
    }

    #[test]
    fn test_from_value_recognized_keys() {
        let path = Path::new("/proj/deno.json");
        let config = ProjectConfig::from_value(
            path,
            &serde_json::json!({
                "imports": { "a/": "./a/" },
                "scopes": {},
                "lock": "locks/deno.lock",
                "importMap": "./import_map.json",
                "workspace": { "members": ["./packages/*"] },
                "nodeModulesDir": "manual",
                "tasks": { "ignored": "yes" }
            }),
        )
        .unwrap();

        assert!(config.imports.is_some());
        assert_eq!(config.lock, LockSetting::Path(PathBuf::from("/proj/locks/deno.lock")));
        assert_eq!(config.import_map.as_deref(), Some("./import_map.json"));
        assert_eq!(config.workspace, ["./packages/*"]);
        assert_eq!(config.node_modules_dir, Some(NodeModulesDir::Manual));
        assert!(config.is_workspace_root());
    }

    #[test]
    fn test_from_value_wrong_types() {
        let path = Path::new("/proj/deno.json");
        for bad in [
            serde_json::json!({ "imports": [] }),
            serde_json::json!({ "lock": 3 }),
            serde_json::json!({ "workspace": "packages" }),
            serde_json::json!({ "workspace": [1] }),
            serde_json::json!({ "nodeModulesDir": "sometimes" }),
            serde_json::json!([]),
        ] {
            let err = ProjectConfig::from_value(path, &bad).unwrap_err();
            assert_eq!(err.code(), crate::error::codes::CONFIG_INVALID, "{bad}");
        }
    }

    #[test]
    fn test_lock_path_default_and_disabled() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("deno.json");

        let config = ProjectConfig::from_value(&config_path, &serde_json::json!({})).unwrap();
        assert_eq!(config.lock_path(), None);

        std::fs::write(dir.path().join("deno.lock"), "{}").unwrap();
        assert_eq!(config.lock_path(), Some(dir.path().join("deno.lock")));

        let config =
            ProjectConfig::from_value(&config_path, &serde_json::json!({ "lock": false })).unwrap();
        assert_eq!(config.lock_path(), None);
    }

    #[test]
    fn test_member_dirs_expands_globs() {
        let dir = tempdir().unwrap();
        for member in ["packages/a", "packages/b", "packages/no-config"] {
            std::fs::create_dir_all(dir.path().join(member)).unwrap();
        }
        std::fs::write(dir.path().join("packages/a/deno.json"), "{}").unwrap();
        std::fs::write(dir.path().join("packages/b/deno.jsonc"), "{}").unwrap();

        let config = ProjectConfig::from_value(
            &dir.path().join("deno.json"),
            &serde_json::json!({ "workspace": ["./packages/*"] }),
        )
        .unwrap();

        let mut members = config.member_dirs();
        members.sort();
        assert_eq!(
            members,
            [dir.path().join("packages/a"), dir.path().join("packages/b")]
        );
    }

    #[test]
    fn test_read_reports_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("deno.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = ProjectConfig::read(&path).unwrap_err();
        assert!(err.to_string().contains("deno.json"), "{err}");
    }
}
