//! Command layer - Entry points for the plugin subcommands

pub mod check_config;
pub mod daemon;

pub use check_config::run_check_config;
pub use daemon::run_daemon;
