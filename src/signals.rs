//! SIGTERM/SIGINT graceful shutdown and SIGHUP config reload.

use anyhow::Result;
use arc_swap::ArcSwap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

use crate::config::Config;

#[derive(Debug, Clone, Copy)]
pub enum ShutdownSignal {
    Graceful,
}

/// Spawns the signal-handling task. SIGTERM/SIGINT broadcast a shutdown
/// signal once and stop listening; SIGHUP reloads configuration and
/// keeps running.
#[cfg(unix)]
pub fn setup_signal_handlers(
    config: Arc<ArcSwap<Config>>,
) -> (broadcast::Sender<ShutdownSignal>, tokio::task::JoinHandle<()>) {
    let (shutdown_tx, _) = broadcast::channel(16);
    let tx = shutdown_tx.clone();

    let handle = tokio::spawn(async move {
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");
        let mut sighup = signal(SignalKind::hangup()).expect("failed to register SIGHUP handler");

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("SIGTERM received, initiating graceful shutdown");
                    let _ = tx.send(ShutdownSignal::Graceful);
                    break;
                }
                _ = sigint.recv() => {
                    info!("SIGINT received, initiating graceful shutdown");
                    let _ = tx.send(ShutdownSignal::Graceful);
                    break;
                }
                _ = sighup.recv() => {
                    info!("SIGHUP received, reloading configuration");
                    if let Err(e) = reload_config(&config) {
                        error!(error = %e, "configuration reload failed, keeping previous config");
                    } else {
                        info!("configuration reloaded");
                    }
                }
            }
        }
    });

    (shutdown_tx, handle)
}

#[cfg(not(unix))]
pub fn setup_signal_handlers(
    _config: Arc<ArcSwap<Config>>,
) -> (broadcast::Sender<ShutdownSignal>, tokio::task::JoinHandle<()>) {
    let (shutdown_tx, _) = broadcast::channel(16);
    let tx = shutdown_tx.clone();

    let handle = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, initiating shutdown");
            let _ = tx.send(ShutdownSignal::Graceful);
        }
    });

    (shutdown_tx, handle)
}

/// Loads and validates a fresh configuration snapshot, then swaps it in
/// atomically. Leaves the previous snapshot in place on any failure.
fn reload_config(config: &Arc<ArcSwap<Config>>) -> Result<()> {
    let new_config = crate::config::load_config()?;
    config.store(Arc::new(new_config));
    Ok(())
}
