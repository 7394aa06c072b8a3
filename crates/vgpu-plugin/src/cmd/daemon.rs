use anyhow::Result;
use utils::logging;
use utils::version;

use crate::app::ApplicationBuilder;
use crate::config::DaemonArgs;

pub async fn run_daemon(daemon_args: DaemonArgs) -> Result<()> {
    let _guard = logging::init(daemon_args.log_path.clone());

    tracing::info!("Starting vgpu plugin daemon {}", &**version::VERSION);

    let config = daemon_args
        .source
        .resolve()
        .await
        .map_err(|e| anyhow::anyhow!("{e:?}"))?;
    tracing::info!("Resolved configuration: {config}");

    let app = ApplicationBuilder::new(daemon_args, config).build()?;
    app.run().await?;

    Ok(())
}
