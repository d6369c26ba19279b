//! Build identity, shared by the `version` command and outgoing requests.

use crate::config::LoaderKind;
use serde::Serialize;
use std::fmt;

/// The current version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// User agent sent with every remote fetch.
pub const USER_AGENT: &str = concat!("esload/", env!("CARGO_PKG_VERSION"));

/// What this binary is and which loaders it carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildInfo {
    pub name: &'static str,
    pub version: &'static str,
    /// Commit the build came from, when the build script provided one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_hash: Option<&'static str>,
    pub loaders: Vec<&'static str>,
}

impl BuildInfo {
    #[must_use]
    pub fn current() -> Self {
        Self {
            name: "esload",
            version: VERSION,
            git_hash: option_env!("ESLOAD_BUILD_GIT_HASH"),
            loaders: [LoaderKind::Native, LoaderKind::Portable]
                .iter()
                .map(LoaderKind::as_str)
                .collect(),
        }
    }
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.version)?;
        if let Some(hash) = self.git_hash {
            write!(f, " ({hash})")?;
        }
        write!(f, " [loaders: {}]", self.loaders.join(", "))
    }
}
