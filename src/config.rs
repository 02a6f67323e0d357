use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::model::RestorePolicy;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}: cannot parse {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Daemon settings, read from `STAYLINE_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory holding the WAL.
    pub data_dir: PathBuf,
    /// JSON file with listing terms; without it no listing is bookable.
    pub listings_file: Option<PathBuf>,
    pub metrics_port: Option<u16>,
    /// Compact once this many events were appended since the last compaction.
    pub compact_threshold: u64,
    /// How often the completion sweep and the compactor run.
    pub sweep_interval: Duration,
    pub restore_policy: RestorePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            listings_file: None,
            metrics_port: None,
            compact_threshold: 1000,
            sweep_interval: Duration::from_secs(3600),
            restore_policy: RestorePolicy::Fragment,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source. Unset variables keep their defaults;
    /// set but unparsable ones are an error rather than silently ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            data_dir: lookup("STAYLINE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            listings_file: lookup("STAYLINE_LISTINGS").map(PathBuf::from),
            metrics_port: parse_var(&lookup, "STAYLINE_METRICS_PORT")?,
            compact_threshold: parse_var(&lookup, "STAYLINE_COMPACT_THRESHOLD")?
                .unwrap_or(defaults.compact_threshold),
            sweep_interval: parse_var::<u64>(&lookup, "STAYLINE_SWEEP_INTERVAL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            restore_policy: parse_var(&lookup, "STAYLINE_RESTORE_POLICY")?
                .unwrap_or(defaults.restore_policy),
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("calendar.wal")
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::Invalid {
                var,
                reason: e.to_string(),
                value,
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.wal_path(), PathBuf::from("./data/calendar.wal"));
    }

    #[test]
    fn reads_every_variable() {
        let cfg = Config::from_lookup(lookup(&[
            ("STAYLINE_DATA_DIR", "/var/lib/stayline"),
            ("STAYLINE_LISTINGS", "/etc/stayline/listings.json"),
            ("STAYLINE_METRICS_PORT", "9100"),
            ("STAYLINE_COMPACT_THRESHOLD", "50"),
            ("STAYLINE_SWEEP_INTERVAL_SECS", "60"),
            ("STAYLINE_RESTORE_POLICY", "coalesce"),
        ]))
        .unwrap();
        assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/stayline"));
        assert_eq!(
            cfg.listings_file,
            Some(PathBuf::from("/etc/stayline/listings.json"))
        );
        assert_eq!(cfg.metrics_port, Some(9100));
        assert_eq!(cfg.compact_threshold, 50);
        assert_eq!(cfg.sweep_interval, Duration::from_secs(60));
        assert_eq!(cfg.restore_policy, RestorePolicy::Coalesce);
    }

    #[test]
    fn bad_values_are_errors() {
        let err = Config::from_lookup(lookup(&[("STAYLINE_METRICS_PORT", "70000")])).unwrap_err();
        assert!(err.to_string().starts_with("STAYLINE_METRICS_PORT"));

        let err = Config::from_lookup(lookup(&[("STAYLINE_RESTORE_POLICY", "merge")])).unwrap_err();
        assert!(err.to_string().contains("unknown restore policy"));
    }
}
