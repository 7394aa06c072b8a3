use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::server::ApiServer;
use crate::api::SnapshotStorage;
use crate::app::core::Application;
use crate::domain::FingerprintEvent;
use crate::domain::PhysicalDeviceSource;
use crate::domain::StatsEvent;

/// Task manager, responsible for starting and managing all background tasks
pub struct Tasks {
    pub tasks: Vec<JoinHandle<Result<()>>>,
    cancellation_token: CancellationToken,
}

impl Default for Tasks {
    fn default() -> Self {
        Self::new()
    }
}

impl Tasks {
    pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            cancellation_token: CancellationToken::new(),
        }
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    /// Start all background tasks
    pub fn spawn_all_tasks<S: PhysicalDeviceSource + 'static>(
        &mut self,
        app: &Application<S>,
    ) -> Result<()> {
        let plugin = &app.services().plugin;
        let storage = app.services().storage.clone();

        let fingerprints = plugin
            .fingerprint(self.cancellation_token.clone())
            .map_err(|e| anyhow::anyhow!("{e:?}"))?;
        let fingerprint_task = self.spawn_fingerprint_consumer(fingerprints, storage.clone());
        self.tasks.push(fingerprint_task);

        let stats = plugin
            .stats(app.daemon_args().stats_interval, self.cancellation_token.clone())
            .map_err(|e| anyhow::anyhow!("{e:?}"))?;
        let stats_task = self.spawn_stats_consumer(stats, storage);
        self.tasks.push(stats_task);

        let api_server_task = self.spawn_api_server_task(app);
        self.tasks.push(api_server_task);

        Ok(())
    }

    /// wait for tasks to complete or receive shutdown signal
    pub async fn wait_for_completion(&mut self) -> Result<()> {
        let signal_handler = {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                let mut sigterm = signal(SignalKind::terminate())?;
                let mut sigint = signal(SignalKind::interrupt())?;

                tokio::spawn(async move {
                    tokio::select! {
                        _ = sigterm.recv() => {
                            tracing::info!("Received SIGTERM, initiating graceful shutdown");
                        }
                        _ = sigint.recv() => {
                            tracing::info!("Received SIGINT, initiating graceful shutdown");
                        }
                    }
                })
            }
            #[cfg(not(unix))]
            {
                tokio::spawn(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        tracing::error!("Failed to listen for Ctrl+C: {e}");
                        return;
                    }
                    tracing::info!("Received Ctrl+C, initiating graceful shutdown");
                })
            }
        };

        tokio::select! {
            _ = signal_handler => {
                tracing::info!("Shutdown signal received, cancelling all tasks");
                self.shutdown(Self::SHUTDOWN_TIMEOUT).await;
            }
            result = futures::future::select_all(&mut self.tasks) => {
                let (result, index, _remaining) = result;
                // a finished handle must not be polled again
                self.tasks.remove(index);
                self.shutdown(Self::SHUTDOWN_TIMEOUT).await;
                let error = match result {
                    Ok(Ok(())) => anyhow::anyhow!("Task completed unexpectedly"),
                    Ok(Err(e)) => e,
                    Err(e) => e.into(),
                };
                tracing::error!("Task completed before shutdown: {error:?}");
                return Err(error);
            }
        }

        Ok(())
    }

    /// Cancel all tasks and wait for them to stop
    pub async fn shutdown(&mut self, timeout: Duration) {
        self.cancellation_token.cancel();
        tokio::time::timeout(timeout, async {
            for task in &mut self.tasks {
                match task.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::error!("Task failed during shutdown: {e:?}"),
                    Err(e) => tracing::error!("Task panicked during shutdown: {e}"),
                }
            }
        })
        .await
        .unwrap_or_else(|_| {
            tracing::warn!("Task shutdown timed out after {:?}", timeout);
        });
    }

    fn spawn_fingerprint_consumer(
        &self,
        mut fingerprints: mpsc::Receiver<FingerprintEvent>,
        storage: SnapshotStorage,
    ) -> JoinHandle<Result<()>> {
        let token = self.cancellation_token.clone();

        tokio::spawn(async move {
            tracing::info!("Starting fingerprint consumer task");
            loop {
                tokio::select! {
                    event = fingerprints.recv() => {
                        match event {
                            Some(Ok(groups)) => {
                                let devices: usize = groups.iter().map(|g| g.devices.len()).sum();
                                tracing::info!(
                                    groups = groups.len(),
                                    devices,
                                    "Virtual device fingerprint updated"
                                );
                                storage.update_fingerprint(groups).await;
                            }
                            Some(Err(e)) => {
                                tracing::warn!("Fingerprint failed: {e:?}");
                            }
                            None => {
                                tracing::info!("Fingerprint stream closed");
                                break;
                            }
                        }
                    }
                    _ = token.cancelled() => {
                        tracing::info!("Fingerprint consumer task cancelled");
                        break;
                    }
                }
            }
            Ok(())
        })
    }

    fn spawn_stats_consumer(
        &self,
        mut stats: mpsc::Receiver<StatsEvent>,
        storage: SnapshotStorage,
    ) -> JoinHandle<Result<()>> {
        let token = self.cancellation_token.clone();

        tokio::spawn(async move {
            tracing::info!("Starting stats consumer task");
            loop {
                tokio::select! {
                    event = stats.recv() => {
                        match event {
                            Some(Ok(snapshot)) => {
                                tracing::debug!(groups = snapshot.groups.len(), "Virtual device stats updated");
                                storage.update_stats(snapshot).await;
                            }
                            Some(Err(e)) => {
                                tracing::warn!("Stats collection failed: {e:?}");
                            }
                            None => {
                                tracing::info!("Stats stream closed");
                                break;
                            }
                        }
                    }
                    _ = token.cancelled() => {
                        tracing::info!("Stats consumer task cancelled");
                        break;
                    }
                }
            }
            Ok(())
        })
    }

    fn spawn_api_server_task<S: PhysicalDeviceSource + 'static>(
        &self,
        app: &Application<S>,
    ) -> JoinHandle<Result<()>> {
        let plugin = &app.services().plugin;
        let api_server = ApiServer::new(
            app.daemon_args().api_listen_addr.clone(),
            app.services().storage.clone(),
            plugin.resolver(),
            plugin.plugin_info(),
        );
        let token = self.cancellation_token.clone();

        tokio::spawn(async move {
            api_server
                .run(token)
                .await
                .map_err(|e| anyhow::anyhow!("API server failed: {e:?}"))?;
            tracing::info!("API server completed");
            Ok(())
        })
    }
}
