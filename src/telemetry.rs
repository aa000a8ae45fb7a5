//! Tracing subscriber setup shared by both binaries.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Verbosity maps 0..=3 to warn..=trace;
/// `RUST_LOG` wins when set. Logs go to stderr so the client's chat
/// output on stdout stays clean.
pub fn init(verbosity: u8) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
