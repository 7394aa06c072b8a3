use anyhow::Result;
use clap::Parser;
use vgpu_plugin::cmd::run_check_config;
use vgpu_plugin::cmd::run_daemon;
use vgpu_plugin::config::Cli;
use vgpu_plugin::config::Commands;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon(daemon_args) => run_daemon(*daemon_args).await,
        Commands::CheckConfig(args) => run_check_config(args).await,
    }
}
