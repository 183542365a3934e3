//! TOML config file loading and validation: database connection, sensor
//! serial parameters, and the optional reference station list.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;

use crate::purpleair::DEFAULT_STATIONS;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct Config {
    pub(crate) database: DatabaseConfig,
    pub(crate) sensor: SensorConfig,
    #[serde(default)]
    pub(crate) reference: ReferenceConfig,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DatabaseConfig {
    pub(crate) host: String,
    #[serde(default = "default_db_port")]
    pub(crate) port: u16,
    pub(crate) dbname: String,
    pub(crate) user: String,
    pub(crate) password: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SensorConfig {
    /// Serial device, e.g. `/dev/ttyUSB0`.
    pub(crate) port: String,
    #[serde(default = "default_baud")]
    pub(crate) baud: u32,
    /// Key into the remote control table.
    pub(crate) sensor_id: i32,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ReferenceConfig {
    /// Reference station IDs; a single string and a list of strings both
    /// parse.
    pub(crate) stations: Option<Stations>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum Stations {
    One(String),
    Many(Vec<String>),
}

fn default_db_port() -> u16 {
    5432
}

fn default_baud() -> u32 {
    9600
}

impl ReferenceConfig {
    /// Normalized station list: a bare ID becomes a one-element list;
    /// nothing configured falls back to the defaults.
    pub(crate) fn station_ids(&self) -> Vec<String> {
        match &self.stations {
            Some(Stations::One(id)) => vec![id.clone()],
            Some(Stations::Many(ids)) => ids.clone(),
            None => DEFAULT_STATIONS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Serial whitelist
// ---------------------------------------------------------------------------

/// Baud rates the SDS011's UART can actually be configured for. The factory
/// default is 9600 and almost nobody changes it.
const VALID_BAUD_RATES: &[u32] = &[1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200];

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate the whole config. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub(crate) fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_database(&mut errors);
        self.validate_sensor(&mut errors);
        self.validate_reference(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_database(&self, errors: &mut Vec<String>) {
        let db = &self.database;
        if db.host.trim().is_empty() {
            errors.push("database: host is empty".into());
        }
        if db.port == 0 {
            errors.push("database: port must be nonzero".into());
        }
        if db.dbname.trim().is_empty() {
            errors.push("database: dbname is empty".into());
        }
        if db.user.trim().is_empty() {
            errors.push("database: user is empty".into());
        }
    }

    fn validate_sensor(&self, errors: &mut Vec<String>) {
        let s = &self.sensor;
        if s.port.trim().is_empty() {
            errors.push("sensor: port is empty".into());
        }
        if !VALID_BAUD_RATES.contains(&s.baud) {
            errors.push(format!(
                "sensor: baud {} is not a rate the SDS011 supports (default 9600)",
                s.baud
            ));
        }
        if s.sensor_id <= 0 {
            errors.push(format!(
                "sensor: sensor_id must be positive, got {}",
                s.sensor_id
            ));
        }
    }

    fn validate_reference(&self, errors: &mut Vec<String>) {
        let ids = self.reference.station_ids();
        if ids.is_empty() {
            errors.push("reference: stations list is empty".into());
            return;
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for (i, id) in ids.iter().enumerate() {
            if id.trim().is_empty() {
                errors.push(format!("reference: stations[{i}] is empty"));
            } else if !id.chars().all(|c| c.is_ascii_digit()) {
                errors.push(format!("reference: station id '{id}' is not numeric"));
            } else if !seen.insert(id) {
                errors.push(format!("reference: duplicate station id '{id}'"));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub(crate) fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // -- Helper: build a valid baseline config that passes validation ------

    fn valid_database() -> DatabaseConfig {
        DatabaseConfig {
            host: "192.168.1.56".into(),
            port: 5432,
            dbname: "airdata".into(),
            user: "tracker".into(),
            password: "secret".into(),
        }
    }

    fn valid_sensor() -> SensorConfig {
        SensorConfig {
            port: "/dev/ttyUSB0".into(),
            baud: 9600,
            sensor_id: 1,
        }
    }

    fn valid_config() -> Config {
        Config {
            database: valid_database(),
            sensor: valid_sensor(),
            reference: ReferenceConfig::default(),
        }
    }

    /// Assert validation fails and the error message contains `needle`.
    fn assert_validation_err(cfg: &Config, needle: &str) {
        let err = cfg.validate().unwrap_err();
        let msg = format!("{err:#}");
        assert!(
            msg.contains(needle),
            "expected error containing {needle:?}, got: {msg}"
        );
    }

    // -- Parsing ----------------------------------------------------------

    #[test]
    fn parse_minimal_config() {
        let toml_str = r#"
[database]
host = "192.168.1.56"
dbname = "airdata"
user = "tracker"
password = "secret"

[sensor]
port = "/dev/ttyUSB0"
sensor_id = 1
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.sensor.baud, 9600);
        assert_eq!(
            config.reference.station_ids(),
            vec!["17621".to_string(), "17663".to_string()]
        );
        config.validate().unwrap();
    }

    #[test]
    fn parse_station_list() {
        let toml_str = r#"
[database]
host = "db"
dbname = "airdata"
user = "tracker"
password = ""

[sensor]
port = "/dev/ttyUSB0"
sensor_id = 1

[reference]
stations = ["90001", "90002", "90003"]
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(
            config.reference.station_ids(),
            vec!["90001", "90002", "90003"]
        );
    }

    #[test]
    fn parse_single_station_string() {
        let toml_str = r#"
[database]
host = "db"
dbname = "airdata"
user = "tracker"
password = ""

[sensor]
port = "/dev/ttyUSB0"
sensor_id = 1

[reference]
stations = "90001"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        // A bare ID normalizes to a one-element list.
        assert_eq!(config.reference.station_ids(), vec!["90001"]);
        config.validate().unwrap();
    }

    #[test]
    fn missing_database_section_fails_parse() {
        let toml_str = r#"
[sensor]
port = "/dev/ttyUSB0"
sensor_id = 1
"#;
        assert!(toml::from_str::<Config>(toml_str).is_err());
    }

    // -- Validation: valid configs pass -----------------------------------

    #[test]
    fn valid_config_passes() {
        valid_config().validate().unwrap();
    }

    #[test]
    fn empty_password_is_allowed() {
        let mut cfg = valid_config();
        cfg.database.password = "".into();
        cfg.validate().unwrap();
    }

    // -- Database section --------------------------------------------------

    #[test]
    fn database_empty_host_rejected() {
        let mut cfg = valid_config();
        cfg.database.host = " ".into();
        assert_validation_err(&cfg, "host is empty");
    }

    #[test]
    fn database_zero_port_rejected() {
        let mut cfg = valid_config();
        cfg.database.port = 0;
        assert_validation_err(&cfg, "port must be nonzero");
    }

    #[test]
    fn database_empty_dbname_rejected() {
        let mut cfg = valid_config();
        cfg.database.dbname = "".into();
        assert_validation_err(&cfg, "dbname is empty");
    }

    #[test]
    fn database_empty_user_rejected() {
        let mut cfg = valid_config();
        cfg.database.user = "".into();
        assert_validation_err(&cfg, "user is empty");
    }

    // -- Sensor section -----------------------------------------------------

    #[test]
    fn sensor_empty_port_rejected() {
        let mut cfg = valid_config();
        cfg.sensor.port = "".into();
        assert_validation_err(&cfg, "port is empty");
    }

    #[test]
    fn sensor_unsupported_baud_rejected() {
        let mut cfg = valid_config();
        cfg.sensor.baud = 9601;
        assert_validation_err(&cfg, "baud 9601");
    }

    #[test]
    fn sensor_boundary_bauds_accepted() {
        for baud in [1200, 115200] {
            let mut cfg = valid_config();
            cfg.sensor.baud = baud;
            cfg.validate().unwrap();
        }
    }

    #[test]
    fn sensor_zero_id_rejected() {
        let mut cfg = valid_config();
        cfg.sensor.sensor_id = 0;
        assert_validation_err(&cfg, "sensor_id must be positive");
    }

    #[test]
    fn sensor_negative_id_rejected() {
        let mut cfg = valid_config();
        cfg.sensor.sensor_id = -4;
        assert_validation_err(&cfg, "sensor_id must be positive");
    }

    // -- Reference section ---------------------------------------------------

    #[test]
    fn reference_empty_list_rejected() {
        let mut cfg = valid_config();
        cfg.reference.stations = Some(Stations::Many(vec![]));
        assert_validation_err(&cfg, "stations list is empty");
    }

    #[test]
    fn reference_blank_station_rejected() {
        let mut cfg = valid_config();
        cfg.reference.stations = Some(Stations::Many(vec!["17621".into(), " ".into()]));
        assert_validation_err(&cfg, "stations[1] is empty");
    }

    #[test]
    fn reference_non_numeric_station_rejected() {
        let mut cfg = valid_config();
        cfg.reference.stations = Some(Stations::One("abc12".into()));
        assert_validation_err(&cfg, "'abc12' is not numeric");
    }

    #[test]
    fn reference_duplicate_station_rejected() {
        let mut cfg = valid_config();
        cfg.reference.stations = Some(Stations::Many(vec!["17621".into(), "17621".into()]));
        assert_validation_err(&cfg, "duplicate station id '17621'");
    }

    // -- Multiple errors reported at once ---------------------------------

    #[test]
    fn multiple_errors_collected() {
        let cfg = Config {
            database: DatabaseConfig {
                host: "".into(),
                port: 0,
                dbname: "".into(),
                user: "tracker".into(),
                password: "".into(),
            },
            sensor: SensorConfig {
                port: "".into(),
                baud: 300,
                sensor_id: -1,
            },
            reference: ReferenceConfig::default(),
        };
        let err = cfg.validate().unwrap_err();
        let msg = format!("{err:#}");
        // Should report every violation, not bail after the first.
        assert!(msg.contains("host is empty"), "missing host error in: {msg}");
        assert!(msg.contains("port must be nonzero"), "missing port error in: {msg}");
        assert!(msg.contains("baud 300"), "missing baud error in: {msg}");
        assert!(
            msg.contains("sensor_id must be positive"),
            "missing sensor_id error in: {msg}"
        );
    }
}
