use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use ari_ivr_tokio::{
    AriClient, AriConfig, Dispatcher, EventStreamConfig, FlowSettings, LogSettings,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = AriConfig::from_env().context("loading configuration")?;
    config
        .validate()
        .context("invalid configuration")?;
    let _log_guard = LogSettings::from(&config)
        .init()
        .context("installing logging")?;
    if std::env::var_os("LOG_MAX_SIZE").is_some() {
        warn!("LOG_MAX_SIZE is ignored, log files rotate by LOG_ROTATION");
    }
    config.log_summary();

    let client = Arc::new(AriClient::from_config(&config)?);
    let shutdown = CancellationToken::new();
    let dispatcher = Dispatcher::new(
        client,
        FlowSettings::from(&config),
        EventStreamConfig::from_config(&config)?,
        shutdown.clone(),
    );

    tokio::spawn(wait_for_signal(shutdown));
    dispatcher.run().await;
    info!("Shut down cleanly");
    Ok(())
}

async fn wait_for_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv()
                    .await;
            }
            Err(e) => {
                warn!("cannot install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received SIGINT, initiating shutdown"),
        _ = terminate => info!("Received SIGTERM, initiating shutdown"),
    }
    shutdown.cancel();
}
