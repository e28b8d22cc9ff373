use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::engine::EngineSettings;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be {expected}, got {value:?}")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Process configuration, read once at startup from `HEADCOUNT_*` variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub store_timeout: Duration,
    pub metrics_port: Option<u16>,
    pub reservation_form: String,
    pub employee_field: String,
}

impl Default for Config {
    fn default() -> Self {
        let engine = EngineSettings::default();
        Self {
            bind: "0.0.0.0".into(),
            port: 8080,
            data_dir: PathBuf::from("./data"),
            max_connections: 256,
            compact_threshold: 1000,
            store_timeout: engine.store_timeout,
            metrics_port: None,
            reservation_form: engine.reservation_form,
            employee_field: engine.employee_field,
        }
    }
}

fn parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    expected: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, expected, value }),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
    }

    /// Build from any variable source; unset variables keep their defaults,
    /// set-but-unparsable ones are an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = Config::default();
        if let Some(bind) = lookup("HEADCOUNT_BIND") {
            cfg.bind = bind;
        }
        if let Some(port) = parsed(&lookup, "HEADCOUNT_PORT", "a port number")? {
            cfg.port = port;
        }
        if let Some(dir) = lookup("HEADCOUNT_DATA_DIR") {
            cfg.data_dir = PathBuf::from(dir);
        }
        if let Some(n) = parsed(&lookup, "HEADCOUNT_MAX_CONNECTIONS", "a positive integer")? {
            if n == 0 {
                return Err(ConfigError::Invalid {
                    var: "HEADCOUNT_MAX_CONNECTIONS",
                    expected: "a positive integer",
                    value: "0".into(),
                });
            }
            cfg.max_connections = n;
        }
        if let Some(n) = parsed(&lookup, "HEADCOUNT_COMPACT_THRESHOLD", "an integer")? {
            cfg.compact_threshold = n;
        }
        if let Some(ms) = parsed::<u64>(&lookup, "HEADCOUNT_STORE_TIMEOUT_MS", "milliseconds")? {
            cfg.store_timeout = Duration::from_millis(ms);
        }
        cfg.metrics_port = parsed(&lookup, "HEADCOUNT_METRICS_PORT", "a port number")?;
        if let Some(form) = lookup("HEADCOUNT_RESERVATION_FORM") {
            cfg.reservation_form = form;
        }
        if let Some(field) = lookup("HEADCOUNT_EMPLOYEE_FIELD") {
            cfg.employee_field = field;
        }
        Ok(cfg)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("headcount.wal")
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            store_timeout: self.store_timeout,
            reservation_form: self.reservation_form.clone(),
            employee_field: self.employee_field.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn defaults_when_nothing_set() {
        let cfg = from_pairs(&[]).unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.listen_addr(), "0.0.0.0:8080");
        assert_eq!(cfg.wal_path(), PathBuf::from("./data/headcount.wal"));
        assert_eq!(cfg.metrics_port, None);
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = from_pairs(&[
            ("HEADCOUNT_PORT", "9000"),
            ("HEADCOUNT_DATA_DIR", "/var/lib/headcount"),
            ("HEADCOUNT_STORE_TIMEOUT_MS", "250"),
            ("HEADCOUNT_METRICS_PORT", "9100"),
            ("HEADCOUNT_RESERVATION_FORM", "bookings"),
        ])
        .unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.metrics_port, Some(9100));
        assert_eq!(cfg.wal_path(), PathBuf::from("/var/lib/headcount/headcount.wal"));

        let settings = cfg.engine_settings();
        assert_eq!(settings.store_timeout, Duration::from_millis(250));
        assert_eq!(settings.reservation_form, "bookings");
        assert_eq!(settings.employee_field, "employee");
    }

    #[test]
    fn unparsable_numbers_are_errors() {
        let err = from_pairs(&[("HEADCOUNT_PORT", "eighty")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "HEADCOUNT_PORT", .. }));
        assert!(from_pairs(&[("HEADCOUNT_MAX_CONNECTIONS", "0")]).is_err());
        assert!(from_pairs(&[("HEADCOUNT_COMPACT_THRESHOLD", "-5")]).is_err());
    }
}
