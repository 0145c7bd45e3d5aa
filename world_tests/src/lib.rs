//! Helpers shared by the integration tests.

use std::time::Duration;

use world_server::WorldServer;

/// Installs a test-writer subscriber once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// Pumps the server until `done` holds, failing after `timeout`.
pub async fn pump_until<F>(server: &mut WorldServer, timeout: Duration, mut done: F) -> anyhow::Result<()>
where
    F: FnMut(&WorldServer) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while !done(server) {
        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!("condition not reached within {timeout:?}");
        }
        server.pump(Duration::from_millis(10)).await?;
    }
    Ok(())
}
