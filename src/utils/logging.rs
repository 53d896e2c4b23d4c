//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

/// Install a formatted `tracing` subscriber filtered by `RUST_LOG`.
///
/// Falls back to `default_directive` (for example `"cdp_engine=info"`)
/// when `RUST_LOG` is unset. Returns `false` if a global subscriber was
/// already installed, which makes it safe to call from every test.
pub fn init_logging(default_directive: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
