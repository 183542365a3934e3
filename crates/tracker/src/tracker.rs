//! Sampling cycle orchestrator: drives the sensor through repeated
//! measure/reconcile/persist/cooldown cycles under remote control.
//!
//! The tracker re-reads its control row once a minute during the waiting
//! window, so an operator can retune the sample count, shorten the cycle
//! gap, or stop the process entirely without touching the host.
//!
//! ```text
//! Init ──▶ Sampling ──▶ Reconciling ──▶ Persisting ──▶ Cooling ──▶ Waiting
//!             ▲                                                       │
//!             └──────────────[stop not requested]─────────────────────┘
//!                                                                     │
//!                                       [stop or escalation] ──▶ Stopped
//! ```

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::aqi;
use crate::control::{self, ControlRow};
use crate::db::{SampleRecord, Store};
use crate::errlog::ErrorLog;
use crate::purpleair::{self, ReferenceReading, ReferenceSource};
use crate::sampler::{self, RawReading};
use crate::sensor::SensorDriver;

/// Seconds the sensor fan runs before the first query of a cycle, flushing
/// the stale air inside the measurement chamber.
const WARMUP_SECS: u64 = 30;

/// Seconds between control re-reads while waiting out the cycle gap.
const WAIT_POLL_SECS: u64 = 60;

/// Recoverable-failure count that forces a shutdown at the end of a cycle.
const ERROR_ESCALATION_THRESHOLD: i64 = 30;

// ---------------------------------------------------------------------------
// Error tally
// ---------------------------------------------------------------------------

/// Running count of recoverable failures, compared across cycles. The count
/// carries over while failures keep arriving; one cycle without a new
/// failure resets it.
#[derive(Debug, Default)]
struct ErrorTally {
    current: i64,
    previous: i64,
}

impl ErrorTally {
    fn record(&mut self) {
        self.current += 1;
    }

    /// Close out a cycle. Returns `true` when the count has passed the
    /// escalation threshold; that check runs before the reset comparison,
    /// so a saturated tally stops the tracker even if it stopped growing.
    fn close_cycle(&mut self) -> bool {
        if self.current > ERROR_ESCALATION_THRESHOLD {
            return true;
        }
        if self.current == self.previous {
            self.current = 0;
            self.previous = 0;
        } else {
            self.previous = self.current;
        }
        false
    }
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

pub(crate) struct Tracker<D, S, R> {
    driver: D,
    store: S,
    reference: R,
    sensor_id: i32,
    stations: Vec<String>,
    errlog: ErrorLog,
    tally: ErrorTally,
}

impl<D: SensorDriver, S: Store, R: ReferenceSource> Tracker<D, S, R> {
    pub(crate) fn new(
        driver: D,
        store: S,
        reference: R,
        sensor_id: i32,
        stations: Vec<String>,
        errlog: ErrorLog,
    ) -> Self {
        Self {
            driver,
            store,
            reference,
            sensor_id,
            stations,
            errlog,
            tally: ErrorTally::default(),
        }
    }

    /// Run sampling cycles until the remote stop flag is raised or failures
    /// escalate. Startup errors, the first control read included, abort
    /// immediately; after that, failures are logged and tallied instead.
    /// The stop flag is consulted once per waiting minute; at least one
    /// full cycle runs before the first check.
    pub(crate) async fn run(&mut self) -> Result<()> {
        let mut control = control::fetch(&self.store, self.sensor_id)
            .await
            .context("initial control read failed")?;

        info!(
            sensor_id = self.sensor_id,
            samples = control.samples_per_read,
            wait_sample_secs = control.wait_between_samples,
            wait_cycle_min = control.wait_between_read,
            stations = ?self.stations,
            "tracker started"
        );

        let mut cycle: u64 = 0;

        // A flag left raised from an earlier shutdown still lets one
        // cycle complete; Waiting is the only state that honors it.
        loop {
            cycle += 1;
            info!(cycle, "cycle started");

            if let Some(raw) = self.sample_phase(&control).await {
                let reference = self.reconcile_phase().await;
                self.persist_phase(&raw, &reference).await;
            }

            self.cooldown_phase();

            let mut stop = self.waiting_phase(&mut control).await;

            if self.tally.close_cycle() {
                warn!(cycle, "recoverable failures escalated; shutting down");
                stop = true;
            }

            if stop {
                break;
            }
        }

        self.shutdown().await;
        Ok(())
    }

    // -- Phase handlers ----------------------------------------------------

    /// Sampling: power the fan up, let it clear the chamber, then take the
    /// averaged reading for this cycle. Sensor faults skip straight to the
    /// cooldown without counting toward escalation.
    async fn sample_phase(&mut self, control: &ControlRow) -> Option<RawReading> {
        if let Err(err) = self.driver.set_power(true) {
            self.log_failure("sensor power-up", &err);
            return None;
        }
        info!(warmup_secs = WARMUP_SECS, "sensor awake; warming up");
        sleep(Duration::from_secs(WARMUP_SECS)).await;

        info!(
            samples = control.samples_per_read,
            wait_secs = control.wait_between_samples,
            "taking sensor readings"
        );
        match sampler::average_reading(
            &mut self.driver,
            control.wait_between_samples,
            control.samples_per_read,
        )
        .await
        {
            Ok(Some(reading)) => Some(reading),
            Ok(None) => {
                warn!(
                    samples = control.samples_per_read,
                    "sample count not positive; nothing to read"
                );
                None
            }
            Err(err) => {
                self.log_failure("sensor read", &err);
                None
            }
        }
    }

    /// Reconciling: pull the reference stations' view of the same air.
    /// Failures degrade to an all-empty reading rather than losing the
    /// local sample.
    async fn reconcile_phase(&mut self) -> ReferenceReading {
        match purpleair::reconcile(&self.reference, &self.stations).await {
            Ok(reading) => {
                info!(
                    pm2_5 = ?reading.pm2_5,
                    pm10 = ?reading.pm10,
                    aqi_pm2_5 = ?reading.aqi_pm2_5,
                    aqi_pm10 = ?reading.aqi_pm10,
                    "reference reconciled"
                );
                reading
            }
            Err(err) => {
                self.count_failure("reference read", &err);
                ReferenceReading::unavailable()
            }
        }
    }

    /// Persisting: stamp the averaged reading, convert both channels to EPA
    /// index values, and write the combined row.
    async fn persist_phase(&mut self, raw: &RawReading, reference: &ReferenceReading) {
        let record = SampleRecord {
            ts: Utc::now(),
            pm2_5: raw.pm2_5,
            pm10: raw.pm10,
            aqi_pm2_5: aqi::pm2_5_index(raw.pm2_5),
            aqi_pm10: aqi::pm10_index(raw.pm10),
            reference_aqi_pm2_5: reference.aqi_pm2_5,
            reference_aqi_pm10: reference.aqi_pm10,
            humidity: reference.humidity,
            temperature: reference.temperature,
        };

        match self.store.insert_sample(&record).await {
            Ok(()) => info!(
                pm2_5 = record.pm2_5,
                pm10 = record.pm10,
                aqi_pm2_5 = record.aqi_pm2_5,
                aqi_pm10 = record.aqi_pm10,
                "sample recorded"
            ),
            Err(err) => self.count_failure("sample insert", &err),
        }
    }

    /// Cooling: put the sensor back to sleep between cycles to spare the
    /// laser and fan.
    fn cooldown_phase(&mut self) {
        if let Err(err) = self.driver.set_power(false) {
            self.log_failure("sensor power-down", &err);
        }
    }

    /// Waiting: sit out the between-cycle gap, re-reading control once a
    /// minute. A refreshed row takes effect immediately: a raised stop flag
    /// ends the run, a shortened gap cuts the wait, and new sample settings
    /// apply from the next cycle. A row that grows the gap mid-wait cannot
    /// extend it past the length captured at entry. Returns `true` when the
    /// stop flag was raised.
    async fn waiting_phase(&mut self, control: &mut ControlRow) -> bool {
        let budget = control.wait_between_read;
        for minute in 0..budget {
            match control::fetch(&self.store, self.sensor_id).await {
                Ok(fresh) => *control = fresh,
                // Stale settings beat no settings; keep the previous row.
                Err(err) => self.count_failure("control read", &err),
            }

            if control.stop_readings {
                info!("remote stop requested");
                return true;
            }

            let remaining = control.wait_between_read - minute;
            if remaining <= 0 {
                break;
            }
            info!(remaining_min = remaining, "waiting before next cycle");
            sleep(Duration::from_secs(WAIT_POLL_SECS)).await;
        }
        false
    }

    /// Stopped: lower the remote flag so the next start is clean, then put
    /// the sensor to sleep. Neither failure can abort the shutdown.
    async fn shutdown(&mut self) {
        info!("stopping; clearing remote stop flag");
        if let Err(err) = self.store.clear_stop_flag(self.sensor_id).await {
            self.log_failure("clear stop flag", &err);
        }
        if let Err(err) = self.driver.set_power(false) {
            self.log_failure("sensor power-down", &err);
        }
    }

    // -- Failure plumbing --------------------------------------------------

    /// Write a recoverable failure to the log and the diagnostic file.
    fn log_failure(&mut self, context: &str, err: &anyhow::Error) {
        error!("{context}: {err:#}");
        self.errlog.append(context, &format!("{err:#}"));
    }

    /// Log a recoverable failure and count it toward escalation.
    fn count_failure(&mut self, context: &str, err: &anyhow::Error) {
        self.log_failure(context, err);
        self.tally.record();
    }
}

// ===========================================================================
// Tests
// ===========================================================================
