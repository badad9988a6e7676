pub mod builders;
pub mod fake_probe;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use sdp_workflow::store::{ConfigDb, MemoryBackend};
use tracing_subscriber::{EnvFilter, fmt};

static INIT: Once = Once::new();

/// Install a test subscriber once per test binary.
///
/// Output goes through the test writer, so it only shows for failing tests.
/// `RUST_LOG` picks the filter (default `info`); `sdp_workflow=trace` shows
/// every wait loop iteration.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Fail the test if `f` has not completed within 5 seconds.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    tokio::time::timeout(Duration::from_secs(5), f)
        .await
        .expect("Test timed out after 5 seconds")
}

/// Two independent sessions on one fresh in-memory store: one for the
/// workflow under test, one playing the external controllers.
pub fn sessions() -> (ConfigDb, ConfigDb) {
    let backend = MemoryBackend::new();
    let workflow = ConfigDb::with_backend(backend.clone());
    let controller = ConfigDb::with_backend(backend);
    (workflow, controller)
}
