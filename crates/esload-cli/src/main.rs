#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

mod commands;
mod logging;

use clap::Parser;
use esload_core::{BuildOptions, LoaderKind, NodeModulesDir, PluginOptions};
use miette::Result;
use std::path::PathBuf;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "esload")]
#[command(author, version, about = "Resolve and load modules the way the bundler plugin does", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Resolve a specifier to a location
    Resolve {
        /// The specifier, as written in an import
        specifier: String,

        /// Module the import appears in (defaults to an entry point import)
        #[arg(long, value_name = "PATH")]
        importer: Option<PathBuf>,

        #[command(flatten)]
        plugin: PluginArgs,
    },

    /// Resolve a specifier and print the loaded module
    Load {
        /// The specifier, as written in an import
        specifier: String,

        /// Module the import appears in (defaults to an entry point import)
        #[arg(long, value_name = "PATH")]
        importer: Option<PathBuf>,

        #[command(flatten)]
        plugin: PluginArgs,
    },
}

/// Options forwarded to the plugin.
#[derive(clap::Args, Debug, Clone)]
struct PluginArgs {
    /// Loader backend: native or portable
    #[arg(long, default_value = "native", env = "ESLOAD_LOADER")]
    loader: LoaderKind,

    /// Configuration file (deno.json / deno.jsonc)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Import map URL, replacing the configuration's mappings
    #[arg(long, value_name = "URL")]
    import_map: Option<Url>,

    /// Lock file
    #[arg(long, value_name = "PATH")]
    lock: Option<PathBuf>,

    /// npm package layout: auto, manual or none
    #[arg(long, value_name = "MODE")]
    node_modules_dir: Option<NodeModulesDir>,

    /// Treat matching resolved URLs as external (`*` matches within a path segment)
    #[arg(long, value_name = "PATTERN")]
    external: Vec<String>,

    /// JSR registry for the portable loader (DENO_REGISTRY_URL is also honored)
    #[arg(long, value_name = "URL", env = "JSR_REGISTRY_URL")]
    jsr_registry: Option<Url>,

    /// Root of the shared package cache
    #[arg(long, value_name = "PATH")]
    cache_root: Option<PathBuf>,
}

impl PluginArgs {
    fn options(&self, cwd: &std::path::Path) -> PluginOptions {
        let mut options = PluginOptions::default().with_loader(self.loader);
        if let Some(ref config) = self.config {
            options = options.with_config_path(cwd.join(config));
        }
        if let Some(ref url) = self.import_map {
            options = options.with_import_map_url(url.clone());
        }
        if let Some(ref lock) = self.lock {
            options = options.with_lock_path(cwd.join(lock));
        }
        if let Some(mode) = self.node_modules_dir {
            options = options.with_node_modules_dir(mode);
        }
        if let Some(ref url) = self.jsr_registry {
            options = options.with_jsr_registry_url(url.clone());
        }
        if let Some(ref root) = self.cache_root {
            options = options.with_cache_root(cwd.join(root));
        }
        options
    }

    fn build(&self, cwd: &std::path::Path, entry: Option<PathBuf>) -> BuildOptions {
        BuildOptions::new(cwd.to_path_buf())
            .with_entry_points(entry.map(|e| e.display().to_string()).into_iter().collect())
            .with_external(self.external.clone())
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Determine working directory
    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    match cli.command {
        // Handles its own output (no logging)
        Commands::Version => commands::version::run(cli.json),
        Commands::Resolve {
            specifier,
            importer,
            plugin,
        } => {
            logging::init(cli.verbose, cli.json);
            let importer = importer.map(|p| cwd.join(p));
            commands::resolve::run(
                plugin.build(&cwd, importer.clone()),
                plugin.options(&cwd),
                &specifier,
                importer.as_deref(),
                cli.json,
            )
        }
        Commands::Load {
            specifier,
            importer,
            plugin,
        } => {
            logging::init(cli.verbose, cli.json);
            let importer = importer.map(|p| cwd.join(p));
            commands::load::run(
                plugin.build(&cwd, importer.clone()),
                plugin.options(&cwd),
                &specifier,
                importer.as_deref(),
                cli.json,
            )
        }
    }
}
