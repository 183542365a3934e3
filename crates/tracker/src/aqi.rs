//! EPA air-quality index conversion for the PM2.5 and PM10 pollutant
//! classes. Concentrations are truncated to the table's reporting precision
//! (0.1 µg/m³ for PM2.5, 1 µg/m³ for PM10) and mapped through the published
//! breakpoint bands with linear interpolation.

/// `(conc_lo, conc_hi, index_lo, index_hi)` for one index band.
type Breakpoint = (f64, f64, i64, i64);

/// Top of the index scale; beyond-scale concentrations clamp here.
const MAX_INDEX: i64 = 500;

/// PM2.5 24-hour breakpoints (µg/m³), Good through Hazardous.
const PM2_5_BREAKPOINTS: [Breakpoint; 7] = [
    (0.0, 12.0, 0, 50),
    (12.1, 35.4, 51, 100),
    (35.5, 55.4, 101, 150),
    (55.5, 150.4, 151, 200),
    (150.5, 250.4, 201, 300),
    (250.5, 350.4, 301, 400),
    (350.5, 500.4, 401, 500),
];

/// PM10 24-hour breakpoints (µg/m³).
const PM10_BREAKPOINTS: [Breakpoint; 7] = [
    (0.0, 54.0, 0, 50),
    (55.0, 154.0, 51, 100),
    (155.0, 254.0, 101, 150),
    (255.0, 354.0, 151, 200),
    (355.0, 424.0, 201, 300),
    (425.0, 504.0, 301, 400),
    (505.0, 604.0, 401, 500),
];

/// Index value for a PM2.5 concentration in µg/m³.
pub(crate) fn pm2_5_index(concentration: f64) -> i64 {
    // Truncate (not round) to 0.1 before the lookup, per the reporting rules.
    let c = (concentration.max(0.0) * 10.0).floor() / 10.0;
    piecewise(&PM2_5_BREAKPOINTS, c)
}

/// Index value for a PM10 concentration in µg/m³.
pub(crate) fn pm10_index(concentration: f64) -> i64 {
    let c = concentration.max(0.0).floor();
    piecewise(&PM10_BREAKPOINTS, c)
}

fn piecewise(table: &[Breakpoint], c: f64) -> i64 {
    for &(c_lo, c_hi, i_lo, i_hi) in table {
        // Truncation guarantees c cannot land in the gap between bands, so
        // the first band whose upper bound covers c is the right one.
        if c <= c_hi {
            let slope = (i_hi - i_lo) as f64 / (c_hi - c_lo);
            return (slope * (c - c_lo) + i_lo as f64).round() as i64;
        }
    }
    MAX_INDEX
}

// ===========================================================================
// Tests
// ===========================================================================
