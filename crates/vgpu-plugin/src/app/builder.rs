use std::sync::Arc;

use anyhow::Result;

use crate::api::SnapshotStorage;
use crate::app::Application;
use crate::app::ApplicationServices;
use crate::config::DaemonArgs;
use crate::config::ValidatedConfig;
use crate::domain::VgpuPlugin;
use crate::infrastructure::init_nvml;
use crate::infrastructure::NvmlDeviceSource;

/// Application builder
pub struct ApplicationBuilder {
    daemon_args: DaemonArgs,
    config: ValidatedConfig,
}

impl ApplicationBuilder {
    pub fn new(daemon_args: DaemonArgs, config: ValidatedConfig) -> Self {
        Self {
            daemon_args,
            config,
        }
    }

    /// Build the NVML backed application
    pub fn build(self) -> Result<Application<NvmlDeviceSource>> {
        tracing::info!("Building application components...");

        let nvml = init_nvml().map_err(|e| anyhow::anyhow!("{e:?}"))?;
        let source = Arc::new(NvmlDeviceSource::new(Arc::new(nvml), &self.config));

        let plugin = Arc::new(VgpuPlugin::new(
            source,
            self.config.vgpus,
            self.config.max_registry_age,
        ));

        let services = ApplicationServices {
            plugin,
            storage: SnapshotStorage::new(),
        };

        Ok(Application::new(services, self.daemon_args))
    }
}
