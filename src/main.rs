use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::prelude::*;

use cadence::config::RelayConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "cadence.toml".to_string());
    let config = RelayConfig::from_file(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path))?;

    init_logging(&config);

    tracing::info!("🔧 Starting cadence relay '{}'", config.local_aet);

    #[cfg(not(feature = "dcmtk_cli"))]
    return Err(anyhow::anyhow!(
        "No transport available: rebuild with the 'dcmtk_cli' feature"
    ));

    #[cfg(feature = "dcmtk_cli")]
    {
        let connector = Arc::new(cadence::dcmtk::DcmtkConnector::new(config.spool_dir.clone()));
        let relay = Arc::new(cadence::relay::Relay::from_config(&config, connector)?);

        let (sender, receiver) = cadence::transport::TransportBridge::new().split();
        tokio::spawn(receiver.serve(relay.handler() as Arc<dyn cadence::InboundHandler>));

        if config.watch.enabled {
            let source_aet = config
                .watch
                .source_aet
                .clone()
                .unwrap_or_else(|| config.local_aet.clone());
            let source = cadence::identity::NodeIdentity::from_aet(source_aet)?;
            let watcher = cadence::inbound::SpoolWatcher::new(
                config.watch.dir.clone(),
                Duration::from_millis(config.watch.poll_ms),
                source,
                sender.clone(),
            );
            tokio::spawn(async move {
                if let Err(e) = watcher.run().await {
                    tracing::error!("Spool watcher failed: {}", e);
                }
            });
        }

        tracing::info!("🚀 Relay ready");
        tokio::signal::ctrl_c().await?;
        relay.stop().await;
        Ok(())
    }
}

fn init_logging(config: &RelayConfig) {
    if config.logging.log_to_file {
        let file_appender = tracing_subscriber::fmt::layer()
            .with_file(true)
            .with_line_number(true)
            .with_writer(
                std::fs::File::create(&config.logging.log_file_path)
                    .expect("Failed to create log file"),
            );

        let stdout_appender = tracing_subscriber::fmt::layer()
            .with_file(true)
            .with_line_number(true);

        tracing_subscriber::registry()
            .with(file_appender)
            .with(stdout_appender)
            .try_init()
            .expect("Failed to initialize logging");
    } else {
        tracing_subscriber::fmt()
            .with_file(true)
            .with_line_number(true)
            .init();
    }
}
