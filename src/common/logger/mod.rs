use std::{fs, path::Path};

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

pub mod formatter;
pub mod writer;

pub use formatter::*;
pub use writer::*;

use crate::configs::LoggingConfig;

/// Builds the filter directive string from the configured level and filters.
///
/// symphonia is noisy at debug level, so it is capped at `warn` unless the
/// configured filters mention it explicitly.
pub fn filter_directives(config: &LoggingConfig) -> String {
    let level = config.level.as_deref().unwrap_or("info");
    let filters = config.filters.as_deref().unwrap_or("");

    if filters.is_empty() {
        format!("{},symphonia=warn", level)
    } else if filters.contains("symphonia") {
        format!("{},{}", level, filters)
    } else {
        format!("{},symphonia=warn,{}", level, filters)
    }
}

/// Install the global subscriber: ANSI lines on stdout plus, when configured,
/// plain lines in a pruned log file. `RUST_LOG` overrides the configured
/// filters. Does nothing if a subscriber is already installed.
pub fn init(config: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(config)));

    let stdout_layer = fmt::layer()
        .event_format(MixLogFormatter::new(true))
        .with_ansi(true);

    let file_layer = config.file.as_ref().map(|file| {
        let path = Path::new(&file.path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = fs::create_dir_all(parent) {
                eprintln!("dubmix: could not create {}: {e}", parent.display());
            }
        }
        fmt::layer()
            .with_writer(PruningFileWriter::new(path, file.max_lines))
            .event_format(MixLogFormatter::new(false))
            .with_ansi(false)
    });

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init();
}
