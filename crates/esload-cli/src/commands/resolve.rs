use super::resolve_args;
use esload_core::{BuildOptions, ModuleLoaderPlugin, PluginOptions};
use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use std::path::Path;

/// Resolve output for JSON mode.
#[derive(Serialize)]
struct ResolveOutput<'a> {
    specifier: &'a str,
    /// `None` when the host would resolve the import itself.
    namespace: Option<String>,
    path: Option<String>,
    external: bool,
}

/// Run the resolve command.
pub fn run(
    build: BuildOptions,
    options: PluginOptions,
    specifier: &str,
    importer: Option<&Path>,
    json: bool,
) -> Result<()> {
    let args = resolve_args(specifier, importer, &build.cwd);

    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
    let resolved = runtime
        .block_on(async {
            let plugin = ModuleLoaderPlugin::start(build, options).await?;
            plugin.resolve(&args).await
        })
        .into_diagnostic()?;

    let output = ResolveOutput {
        specifier,
        namespace: resolved.as_ref().map(|r| r.location.namespace.clone()),
        path: resolved.as_ref().map(|r| r.location.path.clone()),
        external: resolved.as_ref().is_some_and(|r| r.external),
    };

    if json {
        println!("{}", serde_json::to_string(&output).into_diagnostic()?);
        return Ok(());
    }

    match (output.namespace, output.path) {
        (_, Some(path)) if output.external => println!("{path} (external)"),
        (Some(namespace), Some(path)) => println!("{namespace}:{path}"),
        _ => println!("{specifier}: left to the bundler"),
    }
    Ok(())
}
