//! Tracing subscriber setup shared by all satfarm binaries.

use tracing_subscriber::EnvFilter;

/// Maps a `-v` count to a default filter directive.
#[must_use]
pub fn level_for(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Installs the global fmt subscriber.
///
/// `RUST_LOG` wins over the verbosity flag. Output goes to stderr so that
/// reports printed on stdout stay machine readable. Calling this twice is
/// harmless.
pub fn init(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_for(verbosity)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
