use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{info, warn};

use gateway::{
    AppConfig, ApplicationServer, Logger,
    services::{DynFilterService, GatewayServices, filter_services::FilterEngine},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let config = Arc::new(AppConfig::parse());

    // init logger and sentry, guards are kept alive to flush logs and maintain sentry connection
    let _guards = Logger::init(config.cargo_env, config.sentry_dsn.clone());

    info!("logger and env prepped...");

    // the gateway still works without /metrics so a failed install is only a warning
    let metrics = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("prometheus recorder not installed: {}", e);
            None
        }
    };

    let filter_engine = Arc::new(FilterEngine::new());
    let services = GatewayServices::new(config.clone(), filter_engine.clone() as DynFilterService)
        .context("failed to build gateway services")?;

    // block lists load in the background, requests pass through unfiltered until they're in
    let list_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.upstream_timeout_secs))
        .build()
        .context("failed to build block list client")?;
    filter_engine.spawn_initialization(list_client, config.filter_list_urls());

    info!("services ok, starting server...");

    ApplicationServer::serve(config, services, metrics)
        .await
        .context("server failed to start")?;

    Ok(())
}
