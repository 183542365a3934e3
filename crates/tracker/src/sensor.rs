//! Particulate sensor abstraction. The orchestrator only sees the
//! `SensorDriver` trait; the bundled implementation is a stateful simulator
//! so the daemon runs end to end without an SDS011 on the serial port.
//!
//! Simulator behaviour:
//! - Temporal coherence via random walk with mean reversion
//! - Per-query electronic noise
//! - PM10 tracks PM2.5 with its own noise (coarse fraction rides above fine)
//! - 0.1 µg/m³ reporting resolution, matching the hardware
//! - Queries fail while the sensor is powered down (hardware does not
//!   respond in sleep mode)

use anyhow::{bail, Result};

/// Blocking interface to the particulate sensor.
///
/// `query` returns one `(pm2_5, pm10)` pair in µg/m³. `set_power` toggles
/// the fan and laser; a powered-down sensor cannot be queried.
pub(crate) trait SensorDriver {
    fn query(&mut self) -> Result<(f64, f64)>;
    fn set_power(&mut self, active: bool) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

/// Sample from N(mean, sigma).
fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Simulated SDS011
// ---------------------------------------------------------------------------

/// Upper clamp for simulated concentrations. The SDS011 datasheet caps its
/// output at 999.9 µg/m³.
const MAX_CONCENTRATION: f64 = 999.9;

/// Stateful simulator producing plausible SDS011 readings.
pub(crate) struct SimSensor {
    powered: bool,
    /// Current "true" PM2.5 concentration. Evolves each query.
    base_pm2_5: f64,
    /// Long-run level the random walk reverts toward.
    center: f64,
    mean_reversion: f64,
    walk_sigma: f64,
    noise_sigma: f64,
    /// PM10 / PM2.5 ratio for the simulated airmass.
    coarse_ratio: f64,
}

impl SimSensor {
    /// `port` and `baud` come from the sensor section of the config. The
    /// simulator records nothing about them beyond the startup notice.
    pub(crate) fn new(port: &str, baud: u32) -> Self {
        eprintln!("[sim] sds011 at {port} ({baud} baud — not wired)");
        let center = 8.0 + gaussian(0.0, 2.0).abs();
        Self {
            powered: false,
            base_pm2_5: center,
            center,
            mean_reversion: 0.05,
            walk_sigma: 0.5,
            noise_sigma: 0.4,
            coarse_ratio: 1.7,
        }
    }

    fn next_pair(&mut self) -> (f64, f64) {
        let pull = self.mean_reversion * (self.center - self.base_pm2_5);
        let walk = gaussian(0.0, self.walk_sigma);
        self.base_pm2_5 = (self.base_pm2_5 + pull + walk).clamp(0.0, MAX_CONCENTRATION);

        let pm2_5 = self.base_pm2_5 + gaussian(0.0, self.noise_sigma);
        let pm10 = self.base_pm2_5 * self.coarse_ratio + gaussian(0.0, self.noise_sigma * 2.0);

        (quantize(pm2_5), quantize(pm10))
    }
}

/// Clamp to the sensor's physical range and round to 0.1 µg/m³.
fn quantize(value: f64) -> f64 {
    (value.clamp(0.0, MAX_CONCENTRATION) * 10.0).round() / 10.0
}

impl SensorDriver for SimSensor {
    fn query(&mut self) -> Result<(f64, f64)> {
        if !self.powered {
            bail!("sensor is sleeping; no response on serial port");
        }
        Ok(self.next_pair())
    }

    fn set_power(&mut self, active: bool) -> Result<()> {
        self.powered = active;
        eprintln!("[sim] sds011 {}", if active { "work mode" } else { "sleep mode" });
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
