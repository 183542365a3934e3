mod aqi;
mod config;
mod control;
mod db;
mod errlog;
mod purpleair;
mod sampler;
mod sensor;
mod tracker;

use std::env;

use anyhow::Result;
use tracing::info;

use db::Db;
use errlog::ErrorLog;
use purpleair::PurpleAirClient;
use sensor::SimSensor;
use tracker::Tracker;

/// Append-only diagnostic file, created in the working directory.
const ERROR_LOG_PATH: &str = "error.log";

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Config file ─────────────────────────────────────────────────
    let config_path = env::var("TRACKER_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::load(&config_path)?;

    // ── Database ────────────────────────────────────────────────────
    let db = Db::connect(&cfg.database).await?;

    // ── Sensor + reference client ───────────────────────────────────
    let driver = SimSensor::new(&cfg.sensor.port, cfg.sensor.baud);
    let reference = PurpleAirClient::new()?;

    let mut tracker = Tracker::new(
        driver,
        db.clone(),
        reference,
        cfg.sensor.sensor_id,
        cfg.reference.station_ids(),
        ErrorLog::new(ERROR_LOG_PATH),
    );

    let result = tracker.run().await;
    db.close().await;
    info!("tracker exited");
    result
}
