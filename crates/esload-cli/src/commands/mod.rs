pub mod load;
pub mod resolve;
pub mod version;

use esload_core::plugin::{Location, ResolveArgs};
use std::path::Path;

/// Arguments for resolving `specifier`, imported from `importer` or, if
/// there is none, as an entry point of a build rooted at `cwd`.
pub(crate) fn resolve_args(specifier: &str, importer: Option<&Path>, cwd: &Path) -> ResolveArgs {
    match importer {
        Some(path) => ResolveArgs::new(specifier, &Location::file(path)),
        None => ResolveArgs::entry(specifier, cwd),
    }
}
