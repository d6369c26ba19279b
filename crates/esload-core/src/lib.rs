#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

pub mod config;
pub mod error;
pub mod fetch;
pub mod info;
pub mod loader;
pub mod lockfile;
pub mod media_type;
pub mod npm;
pub mod oracle;
pub mod paths;
pub mod plugin;
pub mod specifier;
pub mod version;
pub mod workspace;

pub use config::{BuildOptions, LoaderKind, NodeModulesDir, PluginOptions};
pub use error::LoaderError;
pub use loader::{LoadResult, Loader, LoaderResolution};
pub use media_type::{LoaderTag, MediaType};
pub use plugin::{Location, ModuleLoaderPlugin, PluginError, ResolveArgs, ResolveIdResult};
pub use specifier::{RegistryKind, RegistrySpecifier};
pub use version::VERSION;
