//! Averaged particulate reads: one seed query plus `samples` further
//! queries spaced `wait_secs` apart.

use anyhow::Result;
use std::time::Duration;
use tokio::time::sleep;

use crate::sensor::SensorDriver;

/// Wait interval substituted when the configured value is below 1 second.
const FALLBACK_WAIT_SECS: i64 = 5;

/// One averaged sensor read, both channels in µg/m³ at one-decimal
/// precision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct RawReading {
    pub(crate) pm2_5: f64,
    pub(crate) pm10: f64,
}

/// Average `samples + 1` queries into one reading.
///
/// The seed query runs immediately, each later query after a `wait_secs`
/// pause, so the total run time is `samples × wait_secs`. Every query, the
/// seed included, contributes `value / samples` to the mean, so the seed
/// carries the same weight as any later sample. Returns `Ok(None)` when
/// `samples < 1`; query faults propagate to the caller untouched.
pub(crate) async fn average_reading(
    driver: &mut impl SensorDriver,
    wait_secs: i64,
    samples: i64,
) -> Result<Option<RawReading>> {
    let wait_secs = if wait_secs < 1 { FALLBACK_WAIT_SECS } else { wait_secs };
    if samples < 1 {
        return Ok(None);
    }

    let n = samples as f64;
    let (seed_pm2_5, seed_pm10) = driver.query()?;
    let mut pm2_5 = seed_pm2_5 / n;
    let mut pm10 = seed_pm10 / n;

    for _ in 0..samples {
        sleep(Duration::from_secs(wait_secs as u64)).await;
        let (q2_5, q10) = driver.query()?;
        pm2_5 += q2_5 / n;
        pm10 += q10 / n;
    }

    Ok(Some(RawReading {
        pm2_5: round1(pm2_5),
        pm10: round1(pm10),
    }))
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

// ===========================================================================
// Tests
// ===========================================================================
