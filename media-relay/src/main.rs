use std::sync::Arc;

use media_relay::api::{ApiServer, ApiServerConfig, AppState};
use media_relay::config::RelayConfig;
use media_relay::logging::init_logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = RelayConfig::from_env_or_default();
    let (logging_config, _guard) = init_logging(&config.log_dir)?;

    let state = AppState::from_config(&config).with_logging_config(Arc::clone(&logging_config));
    let server = ApiServer::with_state(ApiServerConfig::from(&config), state);

    let cancel_token = server.cancel_token();
    logging_config.start_retention_cleanup(cancel_token.child_token());

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl-C");
            cancel_token.cancel();
        }
    });

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        cache_ttl_secs = config.cache_ttl.as_secs(),
        max_parallelism = config.max_parallelism,
        "media-relay starting"
    );

    server.run().await?;
    Ok(())
}
