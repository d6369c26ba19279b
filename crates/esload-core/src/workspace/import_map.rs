//! Import maps: bare and prefix specifier remapping.

use crate::error::LoaderError;
use serde_json::{Map, Value};
use url::Url;

/// Entries of one specifier map, longest key first.
///
/// A `None` target is a mapping to `null`, which blocks the specifier.
type SpecifierMap = Vec<(String, Option<Url>)>;

/// A parsed import map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportMap {
    imports: SpecifierMap,
    /// Scope prefix and its map, longest prefix first.
    scopes: Vec<(String, SpecifierMap)>,
}

impl ImportMap {
    /// An import map with no mappings.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse an import map document. Relative keys and targets resolve
    /// against `base`, the document's own URL.
    ///
    /// # Errors
    /// Returns an error if `imports` or `scopes` have the wrong shape.
    pub fn from_value(base: &Url, value: &Value) -> Result<Self, LoaderError> {
        let Value::Object(root) = value else {
            return Err(LoaderError::config(base.as_str(), "import map must be a JSON object"));
        };

        let mut map = Self::empty();
        match root.get("imports") {
            None | Some(Value::Null) => {}
            Some(Value::Object(imports)) => map.extend_imports(base, imports)?,
            Some(_) => return Err(LoaderError::config(base.as_str(), "'imports' must be an object")),
        }
        match root.get("scopes") {
            None | Some(Value::Null) => {}
            Some(Value::Object(scopes)) => map.extend_scopes(base, scopes)?,
            Some(_) => return Err(LoaderError::config(base.as_str(), "'scopes' must be an object")),
        }
        Ok(map)
    }

    /// Add top-level mappings. Existing keys are overwritten.
    ///
    /// # Errors
    /// Returns an error if a target is neither a string nor `null`.
    pub fn extend_imports(&mut self, base: &Url, imports: &Map<String, Value>) -> Result<(), LoaderError> {
        merge_specifier_map(&mut self.imports, base, imports)
    }

    /// Add every scope of a `scopes` object.
    ///
    /// # Errors
    /// Returns an error if a scope is not an object or a target is invalid.
    pub fn extend_scopes(&mut self, base: &Url, scopes: &Map<String, Value>) -> Result<(), LoaderError> {
        for (prefix, imports) in scopes {
            let Value::Object(imports) = imports else {
                return Err(LoaderError::config(
                    base.as_str(),
                    format!("scope '{prefix}' must be an object"),
                ));
            };
            let Ok(prefix) = base.join(prefix) else {
                continue;
            };
            self.add_scope(&prefix, base, imports)?;
        }
        Ok(())
    }

    /// Add mappings that apply only to referrers under `prefix`.
    ///
    /// # Errors
    /// Returns an error if a target is neither a string nor `null`.
    pub fn add_scope(
        &mut self,
        prefix: &Url,
        base: &Url,
        imports: &Map<String, Value>,
    ) -> Result<(), LoaderError> {
        let key = prefix.as_str();
        let index = match self.scopes.iter().position(|(p, _)| p == key) {
            Some(index) => index,
            None => {
                self.scopes.push((key.to_string(), Vec::new()));
                self.scopes.len() - 1
            }
        };
        merge_specifier_map(&mut self.scopes[index].1, base, imports)?;
        self.scopes
            .sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        Ok(())
    }

    /// Whether the map has no mappings at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.imports.is_empty() && self.scopes.is_empty()
    }

    /// Resolve `specifier` imported from `referrer`.
    ///
    /// URL-like specifiers (absolute, `/`, `./`, `../`) are normalized
    /// against the referrer first, so they can be remapped too.
    ///
    /// # Errors
    /// Returns an error for bare specifiers with no mapping, and for
    /// mappings that are blocked (`null`) or malformed.
    pub fn resolve(&self, specifier: &str, referrer: &Url) -> Result<Url, LoaderError> {
        let as_url = parse_url_like(specifier, referrer);
        let key = as_url.as_ref().map_or(specifier, Url::as_str);

        for (prefix, map) in &self.scopes {
            if scope_matches(prefix, referrer.as_str()) {
                if let Some(url) = resolve_in(map, key, specifier, referrer)? {
                    return Ok(url);
                }
            }
        }
        if let Some(url) = resolve_in(&self.imports, key, specifier, referrer)? {
            return Ok(url);
        }

        as_url.ok_or_else(|| {
            LoaderError::resolution(
                specifier,
                referrer.as_str(),
                "Relative import path not prefixed with / or ./ or ../ and not in import map",
            )
        })
    }
}

fn merge_specifier_map(
    entries: &mut SpecifierMap,
    base: &Url,
    imports: &Map<String, Value>,
) -> Result<(), LoaderError> {
    for (key, target) in imports {
        if key.is_empty() {
            continue;
        }
        let key = parse_url_like(key, base).map_or_else(|| key.clone(), String::from);
        let target = match target {
            Value::Null => None,
            // Unparseable targets block the key, like `null`.
            Value::String(t) => parse_url_like(t, base),
            _ => {
                return Err(LoaderError::config(
                    base.as_str(),
                    format!("target of '{key}' must be a string or null"),
                ))
            }
        };
        entries.retain(|(k, _)| k != &key);
        entries.push((key, target));
    }
    entries.sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    Ok(())
}

fn resolve_in(
    map: &SpecifierMap,
    key: &str,
    specifier: &str,
    referrer: &Url,
) -> Result<Option<Url>, LoaderError> {
    let blocked = |reason: &str| LoaderError::resolution(specifier, referrer.as_str(), reason);

    if let Some((_, target)) = map.iter().find(|(k, _)| k == key) {
        return match target {
            Some(url) => Ok(Some(url.clone())),
            None => Err(blocked("blocked by a null entry in the import map")),
        };
    }

    // Sorted longest first, so the first prefix hit is the most specific.
    for (prefix, target) in map {
        if !prefix.ends_with('/') || !key.starts_with(prefix.as_str()) {
            continue;
        }
        let Some(target) = target else {
            return Err(blocked("blocked by a null entry in the import map"));
        };
        if !target.as_str().ends_with('/') {
            return Err(blocked(&format!(
                "import map target '{target}' for prefix '{prefix}' must end with '/'"
            )));
        }
        let rest = &key[prefix.len()..];
        let url = target
            .join(rest)
            .map_err(|e| blocked(&format!("invalid remapped URL: {e}")))?;
        if !url.as_str().starts_with(target.as_str()) {
            return Err(blocked(&format!("remapped URL escapes '{target}'")));
        }
        return Ok(Some(url));
    }

    Ok(None)
}

fn scope_matches(prefix: &str, referrer: &str) -> bool {
    prefix == referrer || (prefix.ends_with('/') && referrer.starts_with(prefix))
}

/// Parse a specifier that is an absolute URL or starts with `/`, `./` or `../`.
fn parse_url_like(specifier: &str, base: &Url) -> Option<Url> {
    if specifier.starts_with('/') || specifier.starts_with("./") || specifier.starts_with("../") {
        return base.join(specifier).ok();
    }
    // Windows drive letters and bare names with ':' are not URLs.
    match Url::parse(specifier) {
        Ok(url) if url.scheme().len() > 1 => Some(url),
        _ => None,
    }
}
