use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{PgPool, Row};
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::control::RawControl;

/// One persisted cycle: the averaged local read, its index values, and the
/// reference-station fields (NULL when the reference was unavailable).
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SampleRecord {
    pub(crate) ts: DateTime<Utc>,
    pub(crate) pm2_5: f64,
    pub(crate) pm10: f64,
    pub(crate) aqi_pm2_5: i64,
    pub(crate) aqi_pm10: i64,
    pub(crate) reference_aqi_pm2_5: Option<i64>,
    pub(crate) reference_aqi_pm10: Option<i64>,
    pub(crate) humidity: Option<i64>,
    pub(crate) temperature: Option<i64>,
}

/// Persistence operations the tracking loop needs. `Db` is the PostgreSQL
/// implementation; tests substitute in-memory fakes. No operation retries
/// internally; failures bubble up for cycle-level handling.
pub(crate) trait Store {
    async fn insert_sample(&self, record: &SampleRecord) -> Result<()>;
    async fn fetch_control(&self, sensor_id: i32) -> Result<Option<RawControl>>;
    async fn clear_stop_flag(&self, sensor_id: i32) -> Result<()>;
}

#[derive(Clone)]
pub(crate) struct Db {
    pool: PgPool,
}

impl Db {
    /// Open a small pool against the configured server. Connecting eagerly
    /// means a bad host or credential fails startup rather than the first
    /// cycle's write.
    pub(crate) async fn connect(cfg: &DatabaseConfig) -> Result<Self> {
        let options = PgConnectOptions::new()
            .host(&cfg.host)
            .port(cfg.port)
            .database(&cfg.dbname)
            .username(&cfg.user)
            .password(&cfg.password);

        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .with_context(|| {
                format!(
                    "failed to connect to postgres {}:{}/{}",
                    cfg.host, cfg.port, cfg.dbname
                )
            })?;

        Ok(Self { pool })
    }

    /// Drain the pool at shutdown.
    pub(crate) async fn close(&self) {
        self.pool.close().await;
    }
}

impl Store for Db {
    async fn insert_sample(&self, record: &SampleRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO samples
              (ts, pm2_5, pm10, aqi_pm2_5, aqi_pm10,
               reference_aqi_pm2_5, reference_aqi_pm10, humidity, temperature)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(record.ts)
        .bind(record.pm2_5)
        .bind(record.pm10)
        .bind(record.aqi_pm2_5)
        .bind(record.aqi_pm10)
        .bind(record.reference_aqi_pm2_5)
        .bind(record.reference_aqi_pm10)
        .bind(record.humidity)
        .bind(record.temperature)
        .execute(&self.pool)
        .await
        .context("insert_sample failed")?;
        Ok(())
    }

    async fn fetch_control(&self, sensor_id: i32) -> Result<Option<RawControl>> {
        let row = sqlx::query(
            r#"
            SELECT stop_readings, samples_per_read, wait_between_samples, wait_between_read
            FROM sensor_controls
            WHERE sensor_id = $1
            "#,
        )
        .bind(sensor_id)
        .fetch_optional(&self.pool)
        .await
        .context("fetch_control failed")?;

        // Integer columns come back as INT4; widen after the NULL check so
        // the poller alone decides defaults.
        match row {
            Some(row) => Ok(Some(RawControl {
                stop_readings: row.try_get("stop_readings")?,
                samples_per_read: row
                    .try_get::<Option<i32>, _>("samples_per_read")?
                    .map(i64::from),
                wait_between_samples: row
                    .try_get::<Option<i32>, _>("wait_between_samples")?
                    .map(i64::from),
                wait_between_read: row
                    .try_get::<Option<i32>, _>("wait_between_read")?
                    .map(i64::from),
            })),
            None => Ok(None),
        }
    }

    async fn clear_stop_flag(&self, sensor_id: i32) -> Result<()> {
        sqlx::query("UPDATE sensor_controls SET stop_readings = FALSE WHERE sensor_id = $1")
            .bind(sensor_id)
            .execute(&self.pool)
            .await
            .context("clear_stop_flag failed")?;
        Ok(())
    }
}
