mod bluetooth;
mod cache;
mod config;
mod http;
mod models;

use log::{error, info};

use bluetooth::{BluerTransport, Supervisor};
use cache::SensorCache;
use config::GatewayConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Make .env and VERBOSE visible before the logger picks its level
    dotenv::dotenv().ok();
    let default_level = if matches!(std::env::var("VERBOSE").as_deref(), Ok("1") | Ok("true")) {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(default_level)
        .format_timestamp_secs()
        .init();

    // Load configuration
    let config = match GatewayConfig::new() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e);
        }
    };
    info!(
        "Starting ESS gateway for {} ({:?} acquisition)",
        config.device.address, config.acquisition
    );

    let cache = SensorCache::new();

    // HTTP exposition runs on its own task; the supervisor loop runs here
    let http_server = tokio::spawn(http::serve(config.http_port, cache.clone()));

    let supervisor = Supervisor::new(
        BluerTransport::new(),
        config.device.clone(),
        config.acquisition,
        cache,
    );

    tokio::select! {
        _ = supervisor.run() => {
            error!("Connection supervisor stopped unexpectedly");
        }
        result = http_server => {
            match result {
                Ok(Err(e)) => error!("HTTP server failed: {}", e),
                Ok(Ok(())) => error!("HTTP server stopped unexpectedly"),
                Err(e) => error!("HTTP server task failed: {}", e),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Program terminated by user. Exiting gracefully.");
        }
    }

    Ok(())
}
