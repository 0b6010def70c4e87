use std::path::PathBuf;
use std::str::FromStr;

use tracing::warn;

use crate::engine::SchedulerOptions;
use crate::limits::DEFAULT_SLOT_DURATION_MINUTES;

/// Runtime settings, read from `SCHEDULA_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    /// WAL appends per tenant before the compactor rewrites the log.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub enforce_working_window: bool,
    pub default_duration_minutes: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            compact_threshold: 1000,
            metrics_port: None,
            enforce_working_window: true,
            default_duration_minutes: DEFAULT_SLOT_DURATION_MINUTES,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparsable values fall back to the default
    /// with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            data_dir: lookup("SCHEDULA_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            compact_threshold: parsed(&lookup, "SCHEDULA_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            metrics_port: parsed(&lookup, "SCHEDULA_METRICS_PORT"),
            enforce_working_window: parsed(&lookup, "SCHEDULA_ENFORCE_WORKING_WINDOW")
                .unwrap_or(defaults.enforce_working_window),
            default_duration_minutes: parsed(&lookup, "SCHEDULA_DEFAULT_DURATION_MINUTES")
                .filter(|d: &i32| *d > 0)
                .unwrap_or(defaults.default_duration_minutes),
        }
    }

    pub fn scheduler_options(&self) -> SchedulerOptions {
        SchedulerOptions {
            enforce_working_window: self.enforce_working_window,
            default_duration_minutes: self.default_duration_minutes,
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("ignoring unparsable {key}={raw:?}");
            None
        }
    }
}
