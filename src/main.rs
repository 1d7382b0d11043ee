use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use imgconv::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();
    init_tracing(&config)?;
    if let Err(err) = config.check_codecs() {
        tracing::error!(error = %err, "refusing to start");
        return Err(err).context("HEIC decoding unavailable");
    }
    if !imgconv::engine::libheif_available() {
        tracing::warn!("built without libheif, HEIC uploads will be rejected");
    }

    tracing::info!(
        version = imgconv::version(),
        heif = cfg!(feature = "heif"),
        "starting imgconv-server"
    );

    imgconv::server::serve(config.bind_addr(), config.app_state())
        .await
        .with_context(|| format!("server on {} failed", config.bind_addr()))?;

    Ok(())
}

fn init_tracing(config: &ServerConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(&config.log_filter)
        .with_context(|| format!("invalid log filter {:?}", config.log_filter))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(config.json_logs.then(|| fmt::layer().json()))
        .with((!config.json_logs).then(|| fmt::layer()))
        .try_init()
        .context("failed to install tracing subscriber")?;
    Ok(())
}
