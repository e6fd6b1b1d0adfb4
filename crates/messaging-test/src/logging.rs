//! Log output for harness runs.

use std::sync::Once;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Fallback filter variable, consulted when `RUST_LOG` is unset.
pub const LOG_ENV: &str = "MESSAGING_TEST_LOG";

const DEFAULT_FILTER: &str = "info,messaging_test=debug";

/// Install a test-friendly subscriber once per process.
///
/// Safe to call from every test; later calls and calls after another
/// subscriber was installed are no-ops.
pub fn init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_test_writer();

        let _ = tracing_subscriber::registry()
            .with(filter())
            .with(fmt_layer)
            .try_init();
    });
}

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_from_env(LOG_ENV))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}
