pub mod builders;
pub mod fake_executor;

use std::sync::Once;
use std::time::Duration;

use flowdispatch::logging::{LOG_ENV_VAR, filter_directives};
use tracing_subscriber::{EnvFilter, fmt};

static INIT: Once = Once::new();

/// Install a test-writer subscriber once per test binary.
///
/// Output is captured by the harness and shown only for failing tests.
/// The filter is read from `FLOWDISPATCH_LOG` like the binary does, e.g.
/// `FLOWDISPATCH_LOG=flowdispatch::engine=debug cargo test -- --nocapture`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let directives = filter_directives(None, std::env::var(LOG_ENV_VAR).ok());
        let filter = EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new("info"));

        // Another test binary helper may have installed one already.
        let _ = fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_thread_names(true)
            .try_init();
    });
}

/// Run a future with a 5-second timeout.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(Duration::from_secs(5), f)
        .await
        .expect("Test timed out after 5 seconds")
}

/// Poll `check` every few milliseconds until it returns true.
///
/// Panics after 5 seconds.
pub async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    with_timeout(async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
}
