pub mod cli;
pub mod gateway;
pub mod logging;
pub mod message;
pub mod metrics;
pub mod network;
pub mod server;
pub mod settings;
pub mod store;
pub mod util;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::{
    gateway::{CacheGateway, Lifecycle},
    network::HttpNetwork,
    settings::Settings,
    store::CacheStorage,
};

/// Opens the store, installs and activates it right away, then serves
/// clients until the listener fails.
pub async fn run(settings: Settings) -> Result<()> {
    let settings = Arc::new(settings);
    if let Some(addr) = settings.metrics_listen {
        tokio::spawn(async move {
            info!(address = %addr, "metrics endpoint starting");
            if let Err(err) = crate::metrics::serve(addr).await {
                tracing::error!(error = %err, "metrics endpoint failed");
            }
        });
    }

    let gateway = Arc::new(build_gateway(&settings).await?);
    let install = gateway.on_install().await?;
    if !install.failed.is_empty() {
        warn!(
            failed = ?install.failed,
            "some pre-cache entries could not be stored"
        );
    }
    let activation = gateway.on_activate().await?;
    info!(
        store = %activation.current,
        removed = activation.removed.len(),
        origin = %settings.origin,
        "cache gateway ready"
    );

    let app = server::AppContext::new(settings, gateway);
    tokio::select! {
        result = server::run(app) => result,
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for shutdown signal")?;
            info!("shutdown signal received, stopping gateway");
            Ok(())
        }
    }
}

pub async fn build_gateway(settings: &Settings) -> Result<CacheGateway<HttpNetwork>> {
    let storage = CacheStorage::new(settings.cache_dir.clone(), settings.store_limits()).await?;
    let network = Arc::new(HttpNetwork::new(
        &settings.origin,
        settings.upstream_timeout(),
        settings.max_response_body_size,
    )?);
    Ok(CacheGateway::new(
        settings.gateway_config(),
        storage,
        network,
    ))
}
