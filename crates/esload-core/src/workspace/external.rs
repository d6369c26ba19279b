use crate::error::LoaderError;
use regex_lite::Regex;

/// Compiled `external` patterns.
///
/// `*` matches any run of characters other than `/`; everything else is
/// literal. Patterns are tested against the whole resolved URL.
#[derive(Debug, Clone, Default)]
pub struct ExternalPatterns {
    patterns: Vec<Regex>,
}

impl ExternalPatterns {
    /// Compile a list of patterns.
    ///
    /// # Errors
    /// Returns an error if a pattern can't be compiled.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, LoaderError> {
        let patterns = patterns
            .iter()
            .map(|p| compile(p.as_ref()))
            .collect::<Result<_, _>>()?;
        Ok(Self { patterns })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Whether `url` matches any pattern.
    #[must_use]
    pub fn matches(&self, url: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(url))
    }
}

fn compile(pattern: &str) -> Result<Regex, LoaderError> {
    let body = pattern
        .split('*')
        .map(regex_lite::escape)
        .collect::<Vec<_>>()
        .join("[^/]*");
    Regex::new(&format!("^{body}$"))
        .map_err(|e| LoaderError::config("external", format!("invalid pattern '{pattern}': {e}")))
}
