//! Logging setup
//!
//! The library itself only emits `tracing` events; binaries and test suites
//! opt in to output by calling [`init_logging`].

use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

/// Install a compact stderr subscriber
///
/// `RUST_LOG` wins over `verbose`; without it, `verbose` selects `debug` and
/// otherwise `info`. Calling this more than once is harmless.
pub fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let stderr = std::io::stderr.with_max_level(tracing::Level::TRACE);

    // Another subscriber may already be installed (e.g. by a second test).
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(stderr)
        .with_target(true)
        .with_level(true)
        .compact()
        .try_init();
}
