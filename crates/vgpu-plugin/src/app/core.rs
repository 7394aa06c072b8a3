use anyhow::Result;

use crate::app::services::ApplicationServices;
use crate::app::tasks::Tasks;
use crate::config::DaemonArgs;
use crate::domain::PhysicalDeviceSource;

/// Application core structure with explicit dependencies
pub struct Application<S> {
    services: ApplicationServices<S>,
    daemon_args: DaemonArgs,
}

impl<S: PhysicalDeviceSource + 'static> Application<S> {
    pub fn new(services: ApplicationServices<S>, daemon_args: DaemonArgs) -> Self {
        Self {
            services,
            daemon_args,
        }
    }

    pub fn services(&self) -> &ApplicationServices<S> {
        &self.services
    }

    pub fn daemon_args(&self) -> &DaemonArgs {
        &self.daemon_args
    }

    /// Run application, start all tasks and wait for completion
    pub async fn run(&self) -> Result<()> {
        tracing::info!("Starting all application tasks...");

        let mut tasks = Tasks::new();

        if let Err(e) = tasks.spawn_all_tasks(self) {
            tracing::error!("Failed to spawn application tasks: {e}");
            tasks.shutdown(Tasks::SHUTDOWN_TIMEOUT).await;
            return Err(e);
        }

        if let Err(e) = tasks.wait_for_completion().await {
            tracing::error!("Error during task execution: {e}");
            return Err(e);
        }

        tracing::info!("Application run completed");
        Ok(())
    }
}
