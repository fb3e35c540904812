use actix_web::dev::ServerHandle;
use futures_util::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::db::JobStore;

/// Handles graceful shutdown of the server
///
/// This module orchestrates graceful shutdown by:
/// 1. Listening for shutdown signals (SIGTERM, SIGINT/CTRL+C)
/// 2. Stopping the HTTP server (stops accepting new uploads)
/// 3. Signaling workers and the retention sweeper to stop
/// 4. Waiting for workers to finish the jobs they hold
/// 5. Closing the job store
pub struct ShutdownCoordinator {
    server_handle: ServerHandle,
    server_task: JoinHandle<Result<(), std::io::Error>>,
    worker_handles: Vec<JoinHandle<()>>,
    sweeper_handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
    store: JobStore,
}

impl ShutdownCoordinator {
    pub fn new(
        server_handle: ServerHandle,
        server_task: JoinHandle<Result<(), std::io::Error>>,
        worker_handles: Vec<JoinHandle<()>>,
        sweeper_handle: JoinHandle<()>,
        shutdown_tx: watch::Sender<bool>,
        store: JobStore,
    ) -> Self {
        Self {
            server_handle,
            server_task,
            worker_handles,
            sweeper_handle,
            shutdown_tx,
            store,
        }
    }

    /// Wait for CTRL+C or SIGTERM, then shut everything down in order
    pub async fn wait_for_shutdown(self) -> Result<(), std::io::Error> {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for CTRL+C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received CTRL+C signal, initiating graceful shutdown...");
            }
            _ = terminate => {
                info!("Received SIGTERM signal, initiating graceful shutdown...");
            }
        }

        self.shutdown().await
    }

    async fn shutdown(self) -> Result<(), std::io::Error> {
        // 1. Stop HTTP server
        info!("Stopping HTTP server (no longer accepting uploads)...");
        self.server_handle.stop(true).await;

        // 2. Signal background tasks
        if let Err(e) = self.shutdown_tx.send(true) {
            error!("Failed to send shutdown signal to workers: {:?}", e);
        }

        // 3. Wait for workers to finish the jobs they hold
        let num_workers = self.worker_handles.len();
        info!("Waiting for {} workers to complete current jobs...", num_workers);
        for (i, result) in join_all(self.worker_handles).await.into_iter().enumerate() {
            match result {
                Ok(()) => info!("Worker {} stopped", i + 1),
                Err(e) => error!("Worker {} failed to stop: {:?}", i + 1, e),
            }
        }
        if let Err(e) = self.sweeper_handle.await {
            error!("Retention sweeper failed to stop: {:?}", e);
        }
        info!("All background tasks stopped");

        // 4. Wait for HTTP server task
        match self.server_task.await {
            Ok(Ok(())) => info!("HTTP server shut down successfully"),
            Ok(Err(e)) => error!("HTTP server encountered error during shutdown: {:?}", e),
            Err(e) => error!("HTTP server task panicked: {:?}", e),
        }

        // 5. Close the job store
        info!("Closing {} job store...", self.store.backend_name());
        self.store.close().await;

        info!("Graceful shutdown completed successfully");
        Ok(())
    }
}
