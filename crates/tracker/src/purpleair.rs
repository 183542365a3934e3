//! Reference air-quality fetch and reconciliation. Every configured station
//! answers one query with two sub-readings (its A and B channels); the pair
//! is averaged, converted to index values, and per-station results are
//! averaged again across stations. Any failure anywhere aborts the whole
//! reconciliation; the caller substitutes the unavailable sentinel rather
//! than reporting partial multi-station data.

use anyhow::{bail, ensure, Context, Result};
use serde::de::{self, Deserializer};
use serde::Deserialize;
use std::time::Duration;
use tokio::time::sleep;

use crate::aqi;

/// Stations consulted when the config names none.
pub(crate) const DEFAULT_STATIONS: &[&str] = &["17621", "17663"];

const BASE_URL: &str = "https://www.purpleair.com/json";

/// Pause between successive station fetches.
const STATION_PACING: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// One station sub-reading. The service historically serializes numbers as
/// JSON strings, so every numeric field tolerates both encodings.
#[derive(Debug, Clone, Copy, Deserialize)]
pub(crate) struct SubReading {
    #[serde(deserialize_with = "flexible_f64")]
    pub(crate) pm2_5_atm: f64,
    #[serde(deserialize_with = "flexible_f64")]
    pub(crate) pm10_0_atm: f64,
    #[serde(default, deserialize_with = "flexible_f64_opt")]
    pub(crate) humidity: Option<f64>,
    #[serde(default, deserialize_with = "flexible_f64_opt")]
    pub(crate) temp_f: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct StationResponse {
    results: Vec<SubReading>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumOrStr {
    Num(f64),
    Str(String),
}

impl NumOrStr {
    fn into_f64<E: de::Error>(self) -> Result<f64, E> {
        match self {
            NumOrStr::Num(v) => Ok(v),
            NumOrStr::Str(s) => s
                .trim()
                .parse()
                .map_err(|_| E::custom(format!("not a number: {s:?}"))),
        }
    }
}

fn flexible_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    NumOrStr::deserialize(deserializer)?.into_f64()
}

fn flexible_f64_opt<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    match Option::<NumOrStr>::deserialize(deserializer)? {
        Some(v) => v.into_f64().map(Some),
        None => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// Fetch seam + HTTP client
// ---------------------------------------------------------------------------

/// Per-station fetch. The production implementation is `PurpleAirClient`;
/// tests script the sub-reading pairs directly.
pub(crate) trait ReferenceSource {
    async fn fetch_station(&self, station_id: &str) -> Result<(SubReading, SubReading)>;
}

pub(crate) struct PurpleAirClient {
    http: reqwest::Client,
}

impl PurpleAirClient {
    pub(crate) fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build http client")?;
        Ok(Self { http })
    }
}

impl ReferenceSource for PurpleAirClient {
    async fn fetch_station(&self, station_id: &str) -> Result<(SubReading, SubReading)> {
        let url = format!("{BASE_URL}?show={station_id}");
        let response: StationResponse = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?
            .error_for_status()
            .context("reference service returned an error status")?
            .json()
            .await
            .context("reference payload did not parse")?;

        let mut results = response.results.into_iter();
        match (results.next(), results.next()) {
            (Some(first), Some(second)) => Ok((first, second)),
            _ => bail!("station {station_id}: expected two sub-readings"),
        }
    }
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

/// Cross-station aggregate for one cycle. All fields are `None` when the
/// reference was unavailable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ReferenceReading {
    pub(crate) pm2_5: Option<f64>,
    pub(crate) pm10: Option<f64>,
    pub(crate) aqi_pm2_5: Option<i64>,
    pub(crate) aqi_pm10: Option<i64>,
    pub(crate) humidity: Option<i64>,
    pub(crate) temperature: Option<i64>,
}

impl ReferenceReading {
    pub(crate) fn unavailable() -> Self {
        Self {
            pm2_5: None,
            pm10: None,
            aqi_pm2_5: None,
            aqi_pm10: None,
            humidity: None,
            temperature: None,
        }
    }
}

/// Per-station intermediate: pair means, their index values, and the first
/// sub-reading's humidity/temperature.
struct StationValues {
    pm2_5: f64,
    pm10: f64,
    aqi_pm2_5: i64,
    aqi_pm10: i64,
    humidity: f64,
    temp_f: f64,
}

/// Fetch and aggregate every configured station in order. Any error aborts
/// the whole reconciliation; the caller substitutes
/// `ReferenceReading::unavailable()`.
pub(crate) async fn reconcile(
    source: &impl ReferenceSource,
    stations: &[String],
) -> Result<ReferenceReading> {
    ensure!(!stations.is_empty(), "no reference stations configured");

    let mut per_station = Vec::with_capacity(stations.len());
    for (i, station_id) in stations.iter().enumerate() {
        if i > 0 {
            sleep(STATION_PACING).await;
        }
        let values = station_values(source, station_id)
            .await
            .with_context(|| format!("station {station_id}"))?;
        per_station.push(values);
    }

    Ok(aggregate(&per_station))
}

async fn station_values(
    source: &impl ReferenceSource,
    station_id: &str,
) -> Result<StationValues> {
    let (first, second) = source.fetch_station(station_id).await?;
    let pm2_5 = (first.pm2_5_atm + second.pm2_5_atm) / 2.0;
    let pm10 = (first.pm10_0_atm + second.pm10_0_atm) / 2.0;
    Ok(StationValues {
        pm2_5,
        pm10,
        aqi_pm2_5: aqi::pm2_5_index(pm2_5),
        aqi_pm10: aqi::pm10_index(pm10),
        humidity: first.humidity.context("first sub-reading lacks humidity")?,
        temp_f: first.temp_f.context("first sub-reading lacks temp_f")?,
    })
}

fn aggregate(stations: &[StationValues]) -> ReferenceReading {
    let n = stations.len() as f64;
    let mean = |field: fn(&StationValues) -> f64| stations.iter().map(field).sum::<f64>() / n;

    ReferenceReading {
        pm2_5: Some(round2(mean(|s| s.pm2_5))),
        pm10: Some(round2(mean(|s| s.pm10))),
        aqi_pm2_5: Some(mean(|s| s.aqi_pm2_5 as f64).round() as i64),
        aqi_pm10: Some(mean(|s| s.aqi_pm10 as f64).round() as i64),
        humidity: Some(mean(|s| s.humidity).round() as i64),
        temperature: Some(mean(|s| s.temp_f).round() as i64),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ===========================================================================
// Tests
// ===========================================================================
