//! Error types for resolution and loading.

use std::io;
use std::path::Path;
use thiserror::Error;

/// Stable error codes, one per [`LoaderError`] variant.
pub mod codes {
    pub const SPECIFIER_INVALID: &str = "SPECIFIER_INVALID";
    pub const RESOLUTION_FAILED: &str = "RESOLUTION_FAILED";
    pub const CONFIG_INVALID: &str = "CONFIG_INVALID";
    pub const ORACLE_FAILED: &str = "ORACLE_FAILED";
    pub const REDIRECT_LIMIT: &str = "REDIRECT_LIMIT";
    pub const FETCH_FAILED: &str = "FETCH_FAILED";
    pub const MEDIA_TYPE_UNSUPPORTED: &str = "MEDIA_TYPE_UNSUPPORTED";
    pub const PACKAGE_NOT_FOUND: &str = "PACKAGE_NOT_FOUND";
    pub const FS_ERROR: &str = "FS_ERROR";
    pub const UNREACHABLE: &str = "UNREACHABLE";
}

/// Error raised while resolving or loading a module.
///
/// Cloneable so that one failed fetch or oracle batch can be handed to every
/// caller waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoaderError {
    #[error("Invalid specifier '{specifier}': {reason}")]
    Parse { specifier: String, reason: String },

    #[error("Cannot resolve '{specifier}' from '{referrer}': {reason}")]
    Resolution {
        specifier: String,
        referrer: String,
        reason: String,
    },

    #[error("Invalid configuration in {location}: {reason}")]
    Config { location: String, reason: String },

    #[error("Module graph query for '{specifier}' failed: {reason}")]
    Oracle { specifier: String, reason: String },

    #[error("Too many redirects. Last one: {last}")]
    RedirectLimit { last: String },

    #[error("Failed to fetch '{specifier}': {reason}")]
    Fetch {
        specifier: String,
        status: Option<u16>,
        reason: String,
    },

    #[error("Unsupported media type {media_type} for '{specifier}'")]
    UnsupportedMediaType {
        specifier: String,
        media_type: String,
    },

    #[error("NPM package not found: {0}")]
    PackageNotFound(String),

    #[error("{path}: {reason}")]
    Fs { path: String, reason: String },

    #[error("[unreachable] {0}")]
    Unreachable(String),
}

impl LoaderError {
    /// Get the stable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Parse { .. } => codes::SPECIFIER_INVALID,
            Self::Resolution { .. } => codes::RESOLUTION_FAILED,
            Self::Config { .. } => codes::CONFIG_INVALID,
            Self::Oracle { .. } => codes::ORACLE_FAILED,
            Self::RedirectLimit { .. } => codes::REDIRECT_LIMIT,
            Self::Fetch { .. } => codes::FETCH_FAILED,
            Self::UnsupportedMediaType { .. } => codes::MEDIA_TYPE_UNSUPPORTED,
            Self::PackageNotFound(_) => codes::PACKAGE_NOT_FOUND,
            Self::Fs { .. } => codes::FS_ERROR,
            Self::Unreachable(_) => codes::UNREACHABLE,
        }
    }

    /// Create a parse error.
    pub fn parse(specifier: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parse {
            specifier: specifier.into(),
            reason: reason.into(),
        }
    }

    /// Create a resolution error.
    pub fn resolution(
        specifier: impl Into<String>,
        referrer: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Resolution {
            specifier: specifier.into(),
            referrer: referrer.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(location: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            location: location.into(),
            reason: reason.into(),
        }
    }

    /// Create an oracle error.
    pub fn oracle(specifier: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Oracle {
            specifier: specifier.into(),
            reason: reason.into(),
        }
    }

    /// Create a fetch error without a status code.
    pub fn fetch(specifier: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Fetch {
            specifier: specifier.into(),
            status: None,
            reason: reason.into(),
        }
    }

    /// Create a fetch error for an unexpected HTTP status.
    pub fn status(specifier: impl Into<String>, status: u16) -> Self {
        let specifier = specifier.into();
        Self::Fetch {
            reason: format!("Encountered status code {status} while fetching {specifier}."),
            specifier,
            status: Some(status),
        }
    }

    /// Create a filesystem error that keeps the offending path in the message.
    #[must_use]
    pub fn fs(path: &Path, err: &io::Error) -> Self {
        Self::Fs {
            path: path.display().to_string(),
            reason: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for LoaderError {
    fn from(e: reqwest::Error) -> Self {
        let specifier = e.url().map(ToString::to_string).unwrap_or_default();
        if e.is_timeout() {
            Self::fetch(specifier, format!("Request timed out: {e}"))
        } else if e.is_connect() {
            Self::fetch(specifier, format!("Connection failed: {e}"))
        } else {
            Self::fetch(specifier, e.to_string())
        }
    }
}

impl From<serde_json::Error> for LoaderError {
    fn from(e: serde_json::Error) -> Self {
        Self::config(
            format!("line {}, column {}", e.line(), e.column()),
            e.to_string(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_uppercase() {
        let all_codes = [
            codes::SPECIFIER_INVALID,
            codes::RESOLUTION_FAILED,
            codes::CONFIG_INVALID,
            codes::ORACLE_FAILED,
            codes::REDIRECT_LIMIT,
            codes::FETCH_FAILED,
            codes::MEDIA_TYPE_UNSUPPORTED,
            codes::PACKAGE_NOT_FOUND,
            codes::FS_ERROR,
            codes::UNREACHABLE,
        ];

        for code in all_codes {
            assert!(
                code.chars().all(|c| c.is_uppercase() || c == '_'),
                "Error code '{code}' should be SCREAMING_SNAKE_CASE"
            );
        }
    }

    #[test]
    fn test_status_error_carries_code() {
        let err = LoaderError::status("https://example.com/mod.ts", 404);
        assert_eq!(err.code(), codes::FETCH_FAILED);
        assert!(matches!(err, LoaderError::Fetch { status: Some(404), .. }));
        assert!(err.to_string().contains("404"));
    }

    #[test]
    fn test_fs_error_names_path() {
        let io = io::Error::new(io::ErrorKind::NotFound, "gone");
        let err = LoaderError::fs(Path::new("/tmp/missing.ts"), &io);
        assert!(err.to_string().contains("/tmp/missing.ts"));
        assert_eq!(err.code(), codes::FS_ERROR);
    }
}
