use anyhow::Result;
use lib_timing::{BroadcastHub, ConnectionManager};
use std::path::Path;
use std::sync::Arc;
use tokio::signal;

mod livetiming_logic;
use livetiming_logic::{config, downstream, logger};

#[tokio::main]
async fn main() -> Result<()> {
    // Explicitly install the default crypto provider for rustls
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = config::load_config();
    logger::setup_logging(
        config.log_dir.as_deref().unwrap_or(Path::new("./logs")),
        config.log_level.as_deref().unwrap_or("info"),
    )?;

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

    let hub = Arc::new(BroadcastHub::new());
    let manager = Arc::new(ConnectionManager::new(config.feed_config(), hub.clone()));

    let manager_handle = tokio::spawn(manager.clone().run(shutdown_tx.subscribe()));

    let app_state = downstream::AppState {
        hub: hub.clone(),
        manager: manager.clone(),
    };
    let downstream_handle = tokio::spawn(downstream::run(
        config.clone(),
        app_state,
        shutdown_tx.subscribe(),
    ));

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut term_signal = signal::unix::signal(signal::unix::SignalKind::terminate()).unwrap();
                term_signal.recv().await;
                log::info!("SIGTERM received, initiating shutdown.");
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
    }

    // Close the upstream session and stop all components
    manager.deactivate();
    let _ = shutdown_tx.send(());

    // Wait for components to shut down
    let _ = tokio::try_join!(manager_handle, downstream_handle);

    log::info!("Shutdown complete.");
    Ok(())
}
