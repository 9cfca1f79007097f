//! Tracing bootstrap: gives every crate a single place to turn on
//! structured logging instead of reaching for `println!`.

use tracing_subscriber::EnvFilter;

/// Initialize a global `tracing` subscriber reading its filter from
/// `AGGMCP_LOG` (falling back to `info`). Safe to call more than once; later
/// calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_env("AGGMCP_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
