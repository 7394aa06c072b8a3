use clap::{Parser, Subcommand};
use utils::version;

use crate::config::daemon::{CheckConfigArgs, DaemonArgs};

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the vgpu device plugin daemon
    Daemon(Box<DaemonArgs>),
    /// Validate a plugin configuration file and print the resolved settings
    #[command(name = "check-config")]
    CheckConfig(CheckConfigArgs),
}
