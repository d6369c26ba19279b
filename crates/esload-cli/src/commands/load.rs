use super::resolve_args;
use esload_core::plugin::Location;
use esload_core::{BuildOptions, ModuleLoaderPlugin, PluginOptions};
use miette::{miette, IntoDiagnostic, Result};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Load output for JSON mode. Contents are included as text.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoadOutput {
    namespace: String,
    path: String,
    loader: &'static str,
    size: usize,
    watch_files: Vec<PathBuf>,
    contents: String,
}

/// Run the load command.
///
/// Resolves `specifier` first; external and host-resolved imports have
/// nothing to load.
pub fn run(
    build: BuildOptions,
    options: PluginOptions,
    specifier: &str,
    importer: Option<&Path>,
    json: bool,
) -> Result<()> {
    let args = resolve_args(specifier, importer, &build.cwd);

    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
    let (location, loaded) = runtime.block_on(async {
        let plugin = ModuleLoaderPlugin::start(build, options)
            .await
            .into_diagnostic()?;
        let resolved = plugin.resolve(&args).await.into_diagnostic()?;
        let location: Location = match resolved {
            Some(r) if !r.external => r.location,
            Some(r) => {
                return Err(miette!("'{specifier}' is external ({})", r.location.path))
            }
            None => return Err(miette!("'{specifier}' is resolved by the bundler itself")),
        };
        let loaded = plugin.load(&location).await.into_diagnostic()?;
        Ok((location, loaded))
    })?;

    if json {
        let output = LoadOutput {
            namespace: location.namespace,
            path: location.path,
            loader: loaded.loader.as_str(),
            size: loaded.contents.len(),
            watch_files: loaded.watch_files,
            contents: String::from_utf8_lossy(&loaded.contents).into_owned(),
        };
        println!("{}", serde_json::to_string(&output).into_diagnostic()?);
        return Ok(());
    }

    let mut out = std::io::stdout().lock();
    out.write_all(&loaded.contents).into_diagnostic()?;
    out.flush().into_diagnostic()?;
    Ok(())
}
