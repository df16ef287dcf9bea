use crate::constants::{LOG_DIR, LOG_FILE};
use std::fs;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Console output plus a daily-rolling JSON log under `logs/`.
///
/// `RUST_LOG` wins when set; otherwise `verbose` selects crate-level info
/// logging and the default is warnings only.
pub fn init_logging(verbose: bool) {
    let _ = fs::create_dir_all(LOG_DIR);

    let file_appender = tracing_appender::rolling::daily(LOG_DIR, LOG_FILE);
    let (non_blocking_writer, _guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer().json().with_writer(non_blocking_writer);
    let console_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);

    let default_directive = if verbose { "company_enricher=info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    // try_init so a second call (tests) does not panic
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init();

    // Keep the writer alive for the whole process so buffered lines are flushed
    std::mem::forget(_guard);
}
