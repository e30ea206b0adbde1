pub mod config;
pub mod models;
pub mod server;
pub mod storage;
pub mod utils;

use crate::config::AppConfig;
use crate::server::HumidityServer;
use anyhow::Context;
use log::{debug, error, info};
use std::time::Duration;

pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    info!("Starting HTS221 emulator");

    match serve(&config).await {
        Ok(_) => info!("Emulator stopped"),
        Err(e) => {
            error!("Emulator error: {e:#}");
            // Print chain of error causes
            let mut source = e.source();
            while let Some(e) = source {
                error!("Caused by: {e}");
                source = e.source();
            }
            return Err(e).context("Emulator failed to run");
        }
    }

    Ok(())
}

async fn serve(config: &AppConfig) -> anyhow::Result<()> {
    let path = config.storage_path();
    let mut server = HumidityServer::open(&path, config.server_options())
        .with_context(|| format!("Failed to open humidity server on {}", path.display()))?;

    if let Some(humidity) = config.sensor.humidity {
        server.set_humidity(humidity).context("Failed to set initial humidity")?;
    }
    if let Some(temperature) = config.sensor.temperature {
        server.set_temperature(temperature).context("Failed to set initial temperature")?;
    }

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    if config.status.interval_secs == 0 {
        (&mut shutdown).await.context("Failed to listen for Ctrl-C")?;
    } else {
        let mut interval = tokio::time::interval(Duration::from_secs(config.status.interval_secs));
        loop {
            tokio::select! {
                _ = interval.tick() => log_status(&server),
                result = &mut shutdown => {
                    result.context("Failed to listen for Ctrl-C")?;
                    break;
                }
            }
        }
    }

    info!("Shutting down");
    // Stopping the noise thread blocks for up to one period.
    tokio::task::spawn_blocking(move || server.close())
        .await
        .context("Close task failed")?
        .context("Failed to close humidity server")?;

    Ok(())
}

fn log_status(server: &HumidityServer) {
    let block = match server.registers() {
        Ok(block) => block,
        Err(e) => {
            error!("Failed to read registers: {}", e);
            return;
        }
    };

    debug!(
        "Live {:?} %rH {:?} °C, published {:.2} %rH {:.2} °C",
        server.humidity().ok(),
        server.temperature().ok(),
        block.humidity(),
        block.temperature()
    );

    match serde_json::to_string(&block) {
        Ok(json) => info!("Registers: {}", json),
        Err(e) => error!("Failed to serialise registers: {}", e),
    }
}
