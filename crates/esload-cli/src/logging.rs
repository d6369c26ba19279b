//! Tracing setup for the CLI.
//!
//! Library crates only emit `tracing` events; the subscriber lives here.
//! Events go to stderr so stdout stays reserved for command output.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn level_for(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Filter directives for a run.
///
/// A non-empty `RUST_LOG` is used as given and `-v` has no effect. Otherwise
/// esload's own crates log at the verbosity level and everything else at
/// `warn`.
fn filter_directives(rust_log: Option<&str>, verbosity: u8) -> String {
    match rust_log.map(str::trim) {
        Some(directives) if !directives.is_empty() => directives.to_string(),
        _ => {
            let level = level_for(verbosity);
            format!("warn,esload_core={level},esload_cli={level}")
        }
    }
}

/// Install the global subscriber.
///
/// With `json`, each event is one JSON object per line, e.g.
/// `{"timestamp":"...","level":"DEBUG","target":"esload_core::info","fields":{"message":"oracle batch complete","batch":3}}`.
///
/// # Panics
/// Panics if a global subscriber is already installed.
pub fn init(verbosity: u8, json: bool) {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = EnvFilter::new(filter_directives(rust_log.as_deref(), verbosity));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}
