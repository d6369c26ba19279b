//! Registry specifier parsing.
//!
//! Parses registry references like:
//! - `npm:react`
//! - `npm:react@^18.0.0/jsx-runtime`
//! - `npm:@types/node@20`
//! - `jsr:@std/path@^0.213/posix`
//!
//! npm references may be unscoped; jsr references always carry a scope.

use crate::error::LoaderError;
use std::fmt;

/// Which registry a specifier points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryKind {
    Npm,
    Jsr,
}

impl RegistryKind {
    /// The URL scheme, without the trailing colon.
    #[must_use]
    pub fn scheme(self) -> &'static str {
        match self {
            Self::Npm => "npm",
            Self::Jsr => "jsr",
        }
    }
}

/// A parsed registry reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegistrySpecifier {
    pub kind: RegistryKind,
    /// Scope including the `@` prefix, if scoped.
    pub scope: Option<String>,
    /// Full package name (e.g., "@scope/name" or "name"). Never empty.
    pub name: String,
    /// Version constraint, if one was given.
    pub version: Option<String>,
    /// Subpath including its leading `/`.
    pub path: Option<String>,
}

impl RegistrySpecifier {
    /// Parse an `npm:` reference.
    ///
    /// # Errors
    /// Returns an error if the reference is malformed.
    pub fn parse_npm(raw: &str) -> Result<Self, LoaderError> {
        Self::parse(RegistryKind::Npm, raw)
    }

    /// Parse a `jsr:` reference.
    ///
    /// # Errors
    /// Returns an error if the reference is malformed or unscoped.
    pub fn parse_jsr(raw: &str) -> Result<Self, LoaderError> {
        Self::parse(RegistryKind::Jsr, raw)
    }

    /// Parse a registry reference of the given kind.
    ///
    /// # Errors
    /// Returns an error if the scheme doesn't match or the name is missing.
    pub fn parse(kind: RegistryKind, raw: &str) -> Result<Self, LoaderError> {
        let invalid = |reason: &str| LoaderError::parse(raw, reason);

        let rest = raw
            .strip_prefix(kind.scheme())
            .and_then(|r| r.strip_prefix(':'))
            .ok_or_else(|| invalid(&format!("expected '{}:' scheme", kind.scheme())))?;
        let rest = rest.strip_prefix('/').unwrap_or(rest);

        if rest.is_empty() {
            return Err(invalid("missing package name"));
        }

        let (scope, name_end) = if rest.starts_with('@') {
            Self::split_scoped(rest).map_err(invalid)?
        } else if kind == RegistryKind::Jsr {
            return Err(invalid("jsr packages must be scoped (@scope/name)"));
        } else {
            (None, 0)
        };

        // From `name_end` on, the segment holds the (unscoped part of the) name
        // and possibly a version, terminated by the next `/`.
        let segment_end = rest[name_end..]
            .find('/')
            .map_or(rest.len(), |i| name_end + i);
        let segment = &rest[name_end..segment_end];

        let version_at = if scope.is_some() {
            segment.find('@')
        } else {
            segment.rfind('@').filter(|&i| i > 0)
        };

        let (name, version) = match version_at {
            Some(at) => {
                let version = &segment[at + 1..];
                if version.is_empty() {
                    return Err(invalid("empty version constraint"));
                }
                (&rest[..name_end + at], Some(version.to_string()))
            }
            None => (&rest[..segment_end], None),
        };

        if name.len() == name_end {
            return Err(invalid("missing package name"));
        }

        let path = (segment_end < rest.len()).then(|| rest[segment_end..].to_string());

        Ok(Self {
            kind,
            scope,
            name: name.to_string(),
            version,
            path,
        })
    }

    /// Split off `@scope/`, returning the scope and the offset of the name part.
    fn split_scoped(rest: &str) -> Result<(Option<String>, usize), &'static str> {
        let Some(slash) = rest.find('/') else {
            return Err("missing package name");
        };
        if slash == 1 {
            return Err("empty scope");
        }
        Ok((Some(rest[..slash].to_string()), slash + 1))
    }

    /// Check if this is a scoped package.
    #[must_use]
    pub fn is_scoped(&self) -> bool {
        self.scope.is_some()
    }

    /// Get the unscoped portion of the name.
    ///
    /// For `@scope/name`, returns `name`.
    #[must_use]
    pub fn unscoped_name(&self) -> &str {
        match self.scope {
            Some(ref scope) => &self.name[scope.len() + 1..],
            None => &self.name,
        }
    }

    /// The package requirement without subpath, e.g. `jsr:@std/path@^0.213`.
    ///
    /// This is the key lockfiles use for pinned versions.
    #[must_use]
    pub fn package_req(&self) -> String {
        match self.version {
            Some(ref v) => format!("{}:{}@{v}", self.kind.scheme(), self.name),
            None => format!("{}:{}", self.kind.scheme(), self.name),
        }
    }
}

impl fmt::Display for RegistrySpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.package_req())?;
        if let Some(ref path) = self.path {
            f.write_str(path)?;
        }
        Ok(())
    }
}
