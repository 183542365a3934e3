//! Remote control parameters with per-field fallbacks. The control row is
//! owned by the operator's database; anything missing, NULL, or
//! non-positive falls back field by field so the loop never runs with a
//! nonsense cadence.

use anyhow::Result;

use crate::db::Store;

pub(crate) const DEFAULT_SAMPLES_PER_READ: i64 = 5;
/// Seconds between queries inside one averaged read.
pub(crate) const DEFAULT_WAIT_BETWEEN_SAMPLES: i64 = 6;
/// Minutes between read cycles.
pub(crate) const DEFAULT_WAIT_BETWEEN_READ: i64 = 15;

/// Control row as stored, before default substitution. Every field may be
/// NULL remotely.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RawControl {
    pub(crate) stop_readings: Option<bool>,
    pub(crate) samples_per_read: Option<i64>,
    pub(crate) wait_between_samples: Option<i64>,
    pub(crate) wait_between_read: Option<i64>,
}

/// Normalized per-sensor directive; callers never observe missing or
/// non-positive values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ControlRow {
    pub(crate) stop_readings: bool,
    pub(crate) samples_per_read: i64,
    pub(crate) wait_between_samples: i64,
    pub(crate) wait_between_read: i64,
}

impl Default for ControlRow {
    fn default() -> Self {
        Self {
            stop_readings: false,
            samples_per_read: DEFAULT_SAMPLES_PER_READ,
            wait_between_samples: DEFAULT_WAIT_BETWEEN_SAMPLES,
            wait_between_read: DEFAULT_WAIT_BETWEEN_READ,
        }
    }
}

impl ControlRow {
    /// Field-level default substitution. A missing row, a NULL field, and a
    /// non-positive value all fall back independently of the other fields.
    pub(crate) fn from_raw(raw: Option<RawControl>) -> Self {
        let raw = raw.unwrap_or_default();
        Self {
            stop_readings: raw.stop_readings.unwrap_or(false),
            samples_per_read: positive_or(raw.samples_per_read, DEFAULT_SAMPLES_PER_READ),
            wait_between_samples: positive_or(
                raw.wait_between_samples,
                DEFAULT_WAIT_BETWEEN_SAMPLES,
            ),
            wait_between_read: positive_or(raw.wait_between_read, DEFAULT_WAIT_BETWEEN_READ),
        }
    }
}

fn positive_or(value: Option<i64>, default: i64) -> i64 {
    match value {
        Some(v) if v > 0 => v,
        _ => default,
    }
}

/// Point lookup plus normalization. Pure read; the stop-flag acknowledgment
/// on shutdown is the orchestrator's write, not ours.
pub(crate) async fn fetch(store: &impl Store, sensor_id: i32) -> Result<ControlRow> {
    Ok(ControlRow::from_raw(store.fetch_control(sensor_id).await?))
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SampleRecord;

    struct FixedStore {
        row: Option<RawControl>,
    }

    impl Store for FixedStore {
        async fn insert_sample(&self, _record: &SampleRecord) -> Result<()> {
            Ok(())
        }

        async fn fetch_control(&self, _sensor_id: i32) -> Result<Option<RawControl>> {
            Ok(self.row)
        }

        async fn clear_stop_flag(&self, _sensor_id: i32) -> Result<()> {
            Ok(())
        }
    }

    fn full_raw() -> RawControl {
        RawControl {
            stop_readings: Some(true),
            samples_per_read: Some(3),
            wait_between_samples: Some(2),
            wait_between_read: Some(1),
        }
    }

    #[test]
    fn missing_row_yields_all_defaults() {
        let row = ControlRow::from_raw(None);
        assert_eq!(row, ControlRow::default());
        assert!(!row.stop_readings);
        assert_eq!(row.samples_per_read, 5);
        assert_eq!(row.wait_between_samples, 6);
        assert_eq!(row.wait_between_read, 15);
    }

    #[test]
    fn complete_row_passes_through() {
        let row = ControlRow::from_raw(Some(full_raw()));
        assert!(row.stop_readings);
        assert_eq!(row.samples_per_read, 3);
        assert_eq!(row.wait_between_samples, 2);
        assert_eq!(row.wait_between_read, 1);
    }

    #[test]
    fn null_stop_flag_defaults_false() {
        let raw = RawControl {
            stop_readings: None,
            ..full_raw()
        };
        assert!(!ControlRow::from_raw(Some(raw)).stop_readings);
    }

    #[test]
    fn null_samples_falls_back_alone() {
        let raw = RawControl {
            samples_per_read: None,
            ..full_raw()
        };
        let row = ControlRow::from_raw(Some(raw));
        assert_eq!(row.samples_per_read, DEFAULT_SAMPLES_PER_READ);
        // The other fields keep their stored values.
        assert_eq!(row.wait_between_samples, 2);
        assert_eq!(row.wait_between_read, 1);
    }

    #[test]
    fn zero_wait_between_samples_falls_back_alone() {
        let raw = RawControl {
            wait_between_samples: Some(0),
            ..full_raw()
        };
        let row = ControlRow::from_raw(Some(raw));
        assert_eq!(row.wait_between_samples, DEFAULT_WAIT_BETWEEN_SAMPLES);
        assert_eq!(row.samples_per_read, 3);
        assert_eq!(row.wait_between_read, 1);
    }

    #[test]
    fn negative_wait_between_read_falls_back_alone() {
        let raw = RawControl {
            wait_between_read: Some(-10),
            ..full_raw()
        };
        let row = ControlRow::from_raw(Some(raw));
        assert_eq!(row.wait_between_read, DEFAULT_WAIT_BETWEEN_READ);
        assert_eq!(row.samples_per_read, 3);
        assert_eq!(row.wait_between_samples, 2);
    }

    #[test]
    fn normalization_is_idempotent() {
        let first = ControlRow::from_raw(Some(RawControl {
            samples_per_read: Some(0),
            wait_between_samples: None,
            ..full_raw()
        }));
        // Feeding normalized values back through changes nothing.
        let again = ControlRow::from_raw(Some(RawControl {
            stop_readings: Some(first.stop_readings),
            samples_per_read: Some(first.samples_per_read),
            wait_between_samples: Some(first.wait_between_samples),
            wait_between_read: Some(first.wait_between_read),
        }));
        assert_eq!(first, again);
    }

    #[tokio::test]
    async fn fetch_normalizes_a_missing_row() {
        let store = FixedStore { row: None };
        let row = fetch(&store, 1).await.unwrap();
        assert_eq!(row, ControlRow::default());
    }

    #[tokio::test]
    async fn fetch_normalizes_a_sparse_row() {
        let store = FixedStore {
            row: Some(RawControl {
                stop_readings: Some(true),
                samples_per_read: Some(-1),
                wait_between_samples: None,
                wait_between_read: Some(30),
            }),
        };
        let row = fetch(&store, 1).await.unwrap();
        assert!(row.stop_readings);
        assert_eq!(row.samples_per_read, DEFAULT_SAMPLES_PER_READ);
        assert_eq!(row.wait_between_samples, DEFAULT_WAIT_BETWEEN_SAMPLES);
        assert_eq!(row.wait_between_read, 30);
    }
}
