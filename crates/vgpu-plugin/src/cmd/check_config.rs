use anyhow::Result;
use utils::logging;

use crate::config::CheckConfigArgs;

/// Resolve the configuration and print it, failing if it does not validate
pub async fn run_check_config(args: CheckConfigArgs) -> Result<()> {
    let _guard = logging::init::<std::path::PathBuf>(None);

    match args.source.resolve().await {
        Ok(config) => {
            println!("{config}");
            Ok(())
        }
        Err(e) => {
            tracing::error!("Invalid configuration {:?}: {e:?}", args.source.config);
            Err(anyhow::anyhow!("{}", e.current_context()))
        }
    }
}
