//! Log output for bootctl.
//!
//! Everything goes to stderr so that command output on stdout stays
//! machine readable.

use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber.
///
/// `log_level` is an `EnvFilter` directive string (already merged with
/// `RUST_LOG` by the config loader). Each `-v` raises the floor: one to
/// debug, two or more to trace.
pub fn init(log_level: &str, verbose: u8) {
    let directive = match verbose {
        0 => log_level,
        1 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_new(directive).unwrap_or_else(|e| {
        eprintln!("Invalid log level '{}': {}, using 'warn'", directive, e);
        EnvFilter::new("warn")
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
