//! Media type classification.
//!
//! Maps a URL path and an optional declared `content-type` to a closed set of
//! media types, and media types to the loader tag handed to the bundler.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Source language or format of a module, independent of how it was loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "&'static str")]
pub enum MediaType {
    JavaScript,
    Mjs,
    Cjs,
    Jsx,
    TypeScript,
    Mts,
    Cts,
    Dts,
    Dmts,
    Dcts,
    Tsx,
    Json,
    Wasm,
    TsBuildInfo,
    SourceMap,
    Unknown,
}

/// How the bundler should interpret module contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoaderTag {
    Js,
    Jsx,
    Ts,
    Tsx,
    Json,
}

impl LoaderTag {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Js => "js",
            Self::Jsx => "jsx",
            Self::Ts => "ts",
            Self::Tsx => "tsx",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for LoaderTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl MediaType {
    /// Name used by the module-graph oracle's JSON output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::JavaScript => "JavaScript",
            Self::Mjs => "Mjs",
            Self::Cjs => "Cjs",
            Self::Jsx => "JSX",
            Self::TypeScript => "TypeScript",
            Self::Mts => "Mts",
            Self::Cts => "Cts",
            Self::Dts => "Dts",
            Self::Dmts => "Dmts",
            Self::Dcts => "Dcts",
            Self::Tsx => "TSX",
            Self::Json => "Json",
            Self::Wasm => "Wasm",
            Self::TsBuildInfo => "TsBuildInfo",
            Self::SourceMap => "SourceMap",
            Self::Unknown => "Unknown",
        }
    }

    /// Classify by file extension alone.
    ///
    /// `path` is a URL path or filesystem path; only its last segment matters.
    #[must_use]
    pub fn from_path(path: &str) -> Self {
        match extension(path) {
            "" if path.ends_with("/.tsbuildinfo") => Self::TsBuildInfo,
            "ts" if path.ends_with(".d.ts") => Self::Dts,
            "ts" => Self::TypeScript,
            "mts" if path.ends_with(".d.mts") => Self::Dmts,
            "mts" => Self::Mts,
            "cts" if path.ends_with(".d.cts") => Self::Dcts,
            "cts" => Self::Cts,
            "tsx" => Self::Tsx,
            "js" => Self::JavaScript,
            "jsx" => Self::Jsx,
            "mjs" => Self::Mjs,
            "cjs" => Self::Cjs,
            "json" => Self::Json,
            "wasm" => Self::Wasm,
            "tsbuildinfo" => Self::TsBuildInfo,
            "map" => Self::SourceMap,
            _ => Self::Unknown,
        }
    }

    /// Classify using a declared content type, falling back to the extension.
    ///
    /// The declared family is trusted; the extension only refines it
    /// (`.jsx`, `.mjs`, `.d.ts`, ...).
    #[must_use]
    pub fn classify(path: &str, content_type: Option<&str>) -> Self {
        let Some(content_type) = content_type else {
            return Self::from_path(path);
        };

        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match essence.as_str() {
            "application/typescript"
            | "text/typescript"
            | "video/vnd.dlna.mpeg-tts"
            | "video/mp2t"
            | "application/x-typescript" => refine_js_like(path, Self::TypeScript),
            "application/javascript"
            | "text/javascript"
            | "application/ecmascript"
            | "text/ecmascript"
            | "application/x-javascript"
            | "application/node" => refine_js_like(path, Self::JavaScript),
            "text/jsx" => Self::Jsx,
            "text/tsx" => Self::Tsx,
            "application/json" | "text/json" => Self::Json,
            "application/wasm" => Self::Wasm,
            "text/plain" | "application/octet-stream" => Self::from_path(path),
            _ => Self::Unknown,
        }
    }

    /// The loader tag for this media type, or `None` if it can't be handed to
    /// the bundler as source.
    #[must_use]
    pub fn loader_tag(self) -> Option<LoaderTag> {
        match self {
            Self::JavaScript | Self::Mjs | Self::Cjs => Some(LoaderTag::Js),
            Self::Jsx => Some(LoaderTag::Jsx),
            Self::TypeScript | Self::Mts | Self::Cts => Some(LoaderTag::Ts),
            Self::Tsx => Some(LoaderTag::Tsx),
            Self::Json => Some(LoaderTag::Json),
            Self::Dts
            | Self::Dmts
            | Self::Dcts
            | Self::Wasm
            | Self::TsBuildInfo
            | Self::SourceMap
            | Self::Unknown => None,
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<MediaType> for &'static str {
    fn from(media_type: MediaType) -> Self {
        media_type.as_str()
    }
}

impl From<String> for MediaType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "JavaScript" => Self::JavaScript,
            "Mjs" => Self::Mjs,
            "Cjs" => Self::Cjs,
            "JSX" => Self::Jsx,
            "TypeScript" => Self::TypeScript,
            "Mts" => Self::Mts,
            "Cts" => Self::Cts,
            "Dts" => Self::Dts,
            "Dmts" => Self::Dmts,
            "Dcts" => Self::Dcts,
            "TSX" => Self::Tsx,
            "Json" => Self::Json,
            "Wasm" => Self::Wasm,
            "TsBuildInfo" => Self::TsBuildInfo,
            "SourceMap" => Self::SourceMap,
            _ => Self::Unknown,
        }
    }
}

fn refine_js_like(path: &str, family: MediaType) -> MediaType {
    let is_js = family == MediaType::JavaScript;
    match extension(path) {
        "jsx" => MediaType::Jsx,
        "mjs" => MediaType::Mjs,
        "cjs" => MediaType::Cjs,
        "tsx" => MediaType::Tsx,
        "ts" if path.ends_with(".d.ts") => MediaType::Dts,
        "mts" if path.ends_with(".d.mts") => MediaType::Dmts,
        "mts" if is_js => MediaType::Mjs,
        "mts" => MediaType::Mts,
        "cts" if path.ends_with(".d.cts") => MediaType::Dcts,
        "cts" if is_js => MediaType::Cjs,
        "cts" => MediaType::Cts,
        _ => family,
    }
}

/// Extension of the last path segment, without the dot.
///
/// Dotfiles like `.tsbuildinfo` have no extension.
fn extension(path: &str) -> &str {
    let file_name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    match file_name.rfind('.') {
        Some(0) | None => "",
        Some(dot) => &file_name[dot + 1..],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declaration_files_are_not_typescript() {
        assert_eq!(MediaType::from_path("/lib/mod.d.ts"), MediaType::Dts);
        assert_eq!(MediaType::from_path(".d.ts"), MediaType::Dts);
        assert_eq!(MediaType::from_path("/lib/mod.d.mts"), MediaType::Dmts);
        assert_eq!(MediaType::from_path("/lib/mod.d.cts"), MediaType::Dcts);
        assert_eq!(MediaType::from_path("/lib/mod.ts"), MediaType::TypeScript);
    }

    #[test]
    fn test_from_path_extensions() {
        assert_eq!(MediaType::from_path("/a.mts"), MediaType::Mts);
        assert_eq!(MediaType::from_path("/a.cts"), MediaType::Cts);
        assert_eq!(MediaType::from_path("/a.tsx"), MediaType::Tsx);
        assert_eq!(MediaType::from_path("/a.js"), MediaType::JavaScript);
        assert_eq!(MediaType::from_path("/a.jsx"), MediaType::Jsx);
        assert_eq!(MediaType::from_path("/a.mjs"), MediaType::Mjs);
        assert_eq!(MediaType::from_path("/a.cjs"), MediaType::Cjs);
        assert_eq!(MediaType::from_path("/a.json"), MediaType::Json);
        assert_eq!(MediaType::from_path("/a.wasm"), MediaType::Wasm);
        assert_eq!(MediaType::from_path("/a.js.map"), MediaType::SourceMap);
        assert_eq!(MediaType::from_path("/x/.tsbuildinfo"), MediaType::TsBuildInfo);
        assert_eq!(MediaType::from_path("/a.tsbuildinfo"), MediaType::TsBuildInfo);
    }

    #[test]
    fn test_unknown_extensions() {
        assert_eq!(MediaType::from_path("/a.css"), MediaType::Unknown);
        assert_eq!(MediaType::from_path("/Makefile"), MediaType::Unknown);
        assert_eq!(MediaType::from_path("/.hidden"), MediaType::Unknown);
        assert_eq!(MediaType::from_path("/dir.ts/file"), MediaType::Unknown);
    }

    #[test]
    fn test_declared_json_wins_over_extension() {
        assert_eq!(
            MediaType::classify("/mod.ts", Some("application/json")),
            MediaType::Json
        );
        assert_eq!(
            MediaType::classify("/data", Some("application/json; charset=utf-8")),
            MediaType::Json
        );
    }

    #[test]
    fn test_declared_type_is_normalized() {
        assert_eq!(
            MediaType::classify("/mod", Some("Application/TypeScript; charset=UTF-8")),
            MediaType::TypeScript
        );
    }

    #[test]
    fn test_js_family_refined_by_extension() {
        let js = Some("application/javascript");
        assert_eq!(MediaType::classify("/a.jsx", js), MediaType::Jsx);
        assert_eq!(MediaType::classify("/a.mjs", js), MediaType::Mjs);
        assert_eq!(MediaType::classify("/a.mts", js), MediaType::Mjs);
        assert_eq!(MediaType::classify("/a.cts", js), MediaType::Cjs);
        assert_eq!(MediaType::classify("/a.ts", js), MediaType::JavaScript);
        assert_eq!(MediaType::classify("/a", js), MediaType::JavaScript);
    }

    #[test]
    fn test_ts_family_refined_by_extension() {
        let ts = Some("text/typescript");
        assert_eq!(MediaType::classify("/a.tsx", ts), MediaType::Tsx);
        assert_eq!(MediaType::classify("/a.mts", ts), MediaType::Mts);
        assert_eq!(MediaType::classify("/a.cts", ts), MediaType::Cts);
        assert_eq!(MediaType::classify("/a.d.ts", ts), MediaType::Dts);
        assert_eq!(MediaType::classify("/a.js", ts), MediaType::TypeScript);
    }

    #[test]
    fn test_plain_defers_to_extension() {
        assert_eq!(
            MediaType::classify("/a.tsx", Some("text/plain")),
            MediaType::Tsx
        );
        assert_eq!(
            MediaType::classify("/a.bin", Some("application/octet-stream")),
            MediaType::Unknown
        );
    }

    #[test]
    fn test_unrecognized_declared_type_is_unknown() {
        assert_eq!(
            MediaType::classify("/a.ts", Some("text/html")),
            MediaType::Unknown
        );
    }

    #[test]
    fn test_loader_tags() {
        assert_eq!(MediaType::Mjs.loader_tag(), Some(LoaderTag::Js));
        assert_eq!(MediaType::Mts.loader_tag(), Some(LoaderTag::Ts));
        assert_eq!(MediaType::Tsx.loader_tag(), Some(LoaderTag::Tsx));
        assert_eq!(MediaType::Json.loader_tag(), Some(LoaderTag::Json));
        assert_eq!(MediaType::SourceMap.loader_tag(), None);
        assert_eq!(MediaType::TsBuildInfo.loader_tag(), None);
        assert_eq!(MediaType::Dts.loader_tag(), None);
        assert_eq!(MediaType::Unknown.loader_tag(), None);
    }

    #[test]
    fn test_serde_uses_oracle_names() {
        let json = serde_json::to_string(&MediaType::Tsx).unwrap();
        assert_eq!(json, "\"TSX\"");

        let parsed: MediaType = serde_json::from_str("\"JSX\"").unwrap();
        assert_eq!(parsed, MediaType::Jsx);

        let parsed: MediaType = serde_json::from_str("\"Css\"").unwrap();
        assert_eq!(parsed, MediaType::Unknown);
    }
}
