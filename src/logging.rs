//! Tracing subscriber setup.
//!
//! `RUST_LOG` wins when set. Otherwise debug builds log the crate at
//! `debug` and release builds only `warn` and above.

use tracing_subscriber::EnvFilter;

fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 if cfg!(debug_assertions) => "slackchat=debug",
        0 => "slackchat=warn",
        1 => "slackchat=info",
        2 => "slackchat=debug",
        _ => "slackchat=trace,reqwest=debug",
    }
}

/// Install the global fmt subscriber. Safe to call more than once.
pub fn init(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
