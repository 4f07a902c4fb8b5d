//! Settings shared by every binary.
//!
//! Layered with figment, later layers winning:
//! 1. built-in defaults
//! 2. `physcap.toml` in the working directory, or the file given with `--config`
//! 3. environment variables prefixed `PHYSCAP_`, e.g. `PHYSCAP_DATASET_ROOT=/data`
//!
//! ```toml
//! dataset_root = "/data/recordings"
//! guard_secs = 5
//!
//! [[checks]]
//! source = "ecg"
//! kind = { type = "table", file = "{subject}_vernier.csv", column = 2 }
//! rule = { type = "at_least", rate = 100 }
//! ```

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub const DEFAULT_CONFIG_FILE: &str = "physcap.toml";
pub const ENV_PREFIX: &str = "PHYSCAP_";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub dataset_root: PathBuf,
    pub log_level: String,
    /// A start closer than this to now is refused.
    pub guard_secs: u64,
    /// Cameras are read this long before the start so the first frames are
    /// out of the way.
    pub camera_lead_secs: u64,
    pub sensor_lead_secs: u64,
    /// Largest accepted difference between the first samples of two
    /// modalities.
    pub skew_tolerance_ms: u64,
    pub checks: Vec<CheckConfig>,
}

/// Where a source's samples live under `{root}/{subject}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckKind {
    /// One `{sequence}_{timestamp}.{ext}` file per sample in `dir`.
    Frames { dir: String, ext: String },
    /// One row per sample in `vernier/{file}`. `column` is the 1-based channel
    /// plotted for this source.
    Table { file: String, column: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RateRule {
    /// Passes when the measured rate rounds to `rate`.
    Exact { rate: u32 },
    AtLeast { rate: u32 },
}

impl RateRule {
    pub fn passes(&self, measured: f64) -> bool {
        match *self {
            RateRule::Exact { rate } => measured.round() == rate as f64,
            RateRule::AtLeast { rate } => measured >= rate as f64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckConfig {
    pub source: String,
    pub kind: CheckKind,
    pub rule: RateRule,
    #[serde(default)]
    pub plot: bool,
    /// Channel holding the ECG trace, when a heart rate should be estimated.
    #[serde(default)]
    pub heart_rate_column: Option<usize>,
}

impl CheckConfig {
    pub fn frames(source: &str, ext: &str, rule: RateRule) -> Self {
        Self {
            source: source.to_string(),
            kind: CheckKind::Frames {
                dir: source.to_string(),
                ext: ext.to_string(),
            },
            rule,
            plot: false,
            heart_rate_column: None,
        }
    }
}

pub fn default_checks() -> Vec<CheckConfig> {
    vec![
        CheckConfig::frames("rgb", "jpg", RateRule::Exact { rate: 30 }),
        CheckConfig::frames("thermal", "csv", RateRule::Exact { rate: 8 }),
        CheckConfig {
            source: "vernier".to_string(),
            kind: CheckKind::Table {
                file: "{subject}_vernier.csv".to_string(),
                column: 1,
            },
            rule: RateRule::AtLeast { rate: 20 },
            plot: true,
            heart_rate_column: Some(2),
        },
    ]
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            dataset_root: PathBuf::from("./dataset"),
            log_level: "info".to_string(),
            guard_secs: 4,
            camera_lead_secs: 3,
            sensor_lead_secs: 0,
            skew_tolerance_ms: 250,
            checks: default_checks(),
        }
    }
}

impl Settings {
    /// Loads `physcap.toml` from the working directory if it exists.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(DEFAULT_CONFIG_FILE))
    }

    /// A missing file is not an error, the defaults and environment still
    /// apply.
    pub fn load_from(path: &Path) -> Result<Self> {
        let settings: Settings = Self::figment(path).extract()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    pub fn validate(&self) -> Result<()> {
        if !LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(Error::Config(format!(
                "log_level '{}' is not one of {}",
                self.log_level,
                LOG_LEVELS.join(", ")
            )));
        }
        for (name, lead) in [
            ("camera_lead_secs", self.camera_lead_secs),
            ("sensor_lead_secs", self.sensor_lead_secs),
        ] {
            if lead >= self.guard_secs {
                return Err(Error::Config(format!(
                    "{name} ({lead}) must be shorter than guard_secs ({})",
                    self.guard_secs
                )));
            }
        }
        if self.checks.is_empty() {
            return Err(Error::Config("no verifier checks configured".into()));
        }
        for check in &self.checks {
            if let CheckKind::Table { column: 0, .. } = check.kind {
                return Err(Error::Config(format!(
                    "check '{}': channel columns start at 1",
                    check.source
                )));
            }
            if check.heart_rate_column == Some(0) {
                return Err(Error::Config(format!(
                    "check '{}': heart_rate_column starts at 1",
                    check.source
                )));
            }
        }
        Ok(())
    }

    pub fn guard(&self) -> Duration {
        Duration::from_secs(self.guard_secs)
    }

    pub fn camera_lead(&self) -> Duration {
        Duration::from_secs(self.camera_lead_secs)
    }

    pub fn sensor_lead(&self) -> Duration {
        Duration::from_secs(self.sensor_lead_secs)
    }

    pub fn skew_tolerance(&self) -> Duration {
        Duration::from_millis(self.skew_tolerance_ms)
    }
}
