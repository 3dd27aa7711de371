pub mod builders;
pub mod fake_backend;
pub mod harness;

use std::sync::Once;
use tracing_subscriber::{fmt, EnvFilter};

static INIT: Once = Once::new();

/// Route engine logs through the test writer, once per test binary.
///
/// Output shows up only for failing tests (or with `--nocapture`); pick the
/// level with `RUST_LOG`, e.g. `RUST_LOG=rundag::state=debug`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("warn,rundag=info"));

        let _ = fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .try_init();
    });
}

/// Fail the test if `f` has not finished within ten seconds, so a runtime
/// that never goes idle does not hang the suite.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(std::time::Duration::from_secs(10), f)
        .await
        .expect("runtime did not finish within 10 seconds")
}
