//! Tracing subscriber setup for binaries and tests embedding the engine

use tracing_subscriber::EnvFilter;

/// Filter directive for a `-v` count
pub fn level_for_verbosity(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "info",
        1 => "debug",
        2 => "trace",
        _ => "trace,tokio=debug", // -vvv shows everything including dependencies
    }
}

/// Install a fmt subscriber. `RUST_LOG` takes precedence over `verbosity`.
///
/// Returns `false` when a global subscriber was already installed.
pub fn init_tracing(verbosity: u8) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_for_verbosity(verbosity)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbosity >= 2)
        .with_thread_ids(verbosity >= 3)
        .with_line_number(verbosity >= 3)
        .try_init()
        .is_ok()
}

/// Install a fmt subscriber configured only from `RUST_LOG` (default `info`)
pub fn init_from_env() -> bool {
    init_tracing(0)
}
