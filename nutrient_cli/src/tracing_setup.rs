//! `tracing_subscriber` wiring: console layer plus an optional rotating file
//! sink, selected by the desktop tuning profile's `[logging]` table.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;

use crate::cli::FILE_GUARD;

fn rotation_from_str(s: Option<&str>) -> tracing_appender::rolling::Rotation {
    match s {
        Some("daily") => tracing_appender::rolling::Rotation::DAILY,
        Some("hourly") => tracing_appender::rolling::Rotation::HOURLY,
        _ => tracing_appender::rolling::Rotation::NEVER,
    }
}

/// Install the global subscriber. `file_path`, when set, also writes JSON
/// lines to a rotating log file independent of `json` (which only controls
/// the console layer's format). The returned `WorkerGuard` is stashed in
/// `FILE_GUARD` so the non-blocking file writer flushes for the process
/// lifetime rather than being dropped at the end of this function.
pub fn init_tracing(json: bool, log_level: &str, file_path: Option<&str>, rotation: Option<&str>) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let file_layer = file_path.map(|path| {
        let path = std::path::Path::new(path);
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| std::path::Path::new("."));
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "nutrient.log".to_string());
        let appender = tracing_appender::rolling::RollingFileAppender::new(rotation_from_str(rotation), dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .json()
    });

    let registry = tracing_subscriber::registry().with(env_filter).with(file_layer);

    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_span_events(FmtSpan::NONE)
                    .json()
                    .flatten_event(true),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_span_events(FmtSpan::NONE),
            )
            .init();
    }
}
