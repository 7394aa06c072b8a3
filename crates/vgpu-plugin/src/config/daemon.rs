use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser};
use error_stack::Report;
use utils::logging::LOG_PATH_ENV_VAR;

use crate::config::plugin::{parse_duration, ConfigError, PluginConfig, ValidatedConfig};

#[derive(Args, Debug, Clone)]
pub struct ConfigSource {
    #[arg(
        long,
        env = "VGPU_PLUGIN_CONFIG",
        value_hint = clap::ValueHint::FilePath,
        default_value = "/etc/vgpu-plugin/config.yaml",
        help = "Path of the plugin configuration file"
    )]
    pub config: PathBuf,

    #[arg(
        long,
        env = "VGPU_COUNT",
        allow_negative_numbers = true,
        help = "Number of virtual devices per physical device, overrides `vgpus` from the config file"
    )]
    pub vgpus: Option<i64>,
}

impl ConfigSource {
    /// Load the config file, apply command line overrides and validate.
    ///
    /// # Errors
    ///
    /// - [`ConfigError`] if the file cannot be loaded or the result is invalid
    pub async fn resolve(&self) -> Result<ValidatedConfig, Report<ConfigError>> {
        let mut config = PluginConfig::load(&self.config).await?;
        if let Some(vgpus) = self.vgpus {
            config.vgpus = Some(vgpus);
        }
        config.validate()
    }
}

#[derive(Parser, Debug, Clone)]
pub struct DaemonArgs {
    #[command(flatten)]
    pub source: ConfigSource,

    #[arg(
        long,
        env = "API_LISTEN_ADDR",
        default_value = "127.0.0.1:8080",
        help = "HTTP API server listen address"
    )]
    pub api_listen_addr: String,

    #[arg(
        long,
        default_value = "10s",
        value_parser = parse_duration,
        help = "Interval between device statistics samples, e.g. 10s"
    )]
    pub stats_interval: Duration,

    #[arg(
        long,
        env = LOG_PATH_ENV_VAR,
        value_hint = clap::ValueHint::FilePath,
        help = "Write logs to a daily rolling file instead of stderr"
    )]
    pub log_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct CheckConfigArgs {
    #[command(flatten)]
    pub source: ConfigSource,
}
