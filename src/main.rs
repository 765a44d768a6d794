//! Gaudi device operator entrypoint

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use kube::Client;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gaudi_k8s::controller::{run_controller, ControllerState};
use gaudi_k8s::error::Result;
use gaudi_k8s::rest_api::run_server;
use gaudi_k8s::settings::ControllerSettings;

/// Kubernetes operator for Habana Gaudi device configuration
#[derive(Parser)]
#[command(about, long_about = None)]
struct Cli {
    /// Address for the probe and metrics endpoints
    #[arg(long, default_value = "0.0.0.0:8080")]
    http_bind: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let settings = ControllerSettings::load()?;

    let client = Client::try_default().await?;

    let watch_namespace = std::env::var("WATCH_NAMESPACE")
        .ok()
        .filter(|namespace| !namespace.is_empty());
    match &watch_namespace {
        Some(namespace) => info!("Watching DeviceConfigs in namespace {}", namespace),
        None => info!("WATCH_NAMESPACE is not set, watching all namespaces"),
    }

    let state = Arc::new(ControllerState::from_client(&client, &settings));

    tokio::try_join!(
        run_controller(client, state, watch_namespace),
        run_server(cli.http_bind),
    )?;

    Ok(())
}
