//! On-disk layout of a recorded subject.
//!
//! ```text
//! {root}/{subject}/rgb/{sequence}_{YYYYMMDD_HHMMSS_ffffff}.jpg
//! {root}/{subject}/thermal/{sequence}_{YYYYMMDD_HHMMSS_ffffff}.csv
//! {root}/{subject}/vernier/{subject}_vernier.csv
//! {root}/{subject}/{subject}_report.txt
//! ```

use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

pub const FILE_TIME_FORMAT: &str = "%Y%m%d_%H%M%S_%6f";
pub const ROW_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Rgb,
    Thermal,
    Vernier,
}

impl Modality {
    pub const ALL: [Modality; 3] = [Modality::Rgb, Modality::Thermal, Modality::Vernier];

    pub fn dir_name(self) -> &'static str {
        match self {
            Modality::Rgb => "rgb",
            Modality::Thermal => "thermal",
            Modality::Vernier => "vernier",
        }
    }
}

impl FromStr for Modality {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Modality::ALL
            .into_iter()
            .find(|m| m.dir_name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown modality '{s}', expected rgb, thermal or vernier"))
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

#[derive(Debug, Clone)]
pub struct SubjectDir {
    root: PathBuf,
    subject: String,
}

impl SubjectDir {
    pub fn new(root: impl Into<PathBuf>, subject: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            subject: subject.into(),
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self) -> PathBuf {
        self.root.join(&self.subject)
    }

    pub fn modality_dir(&self, modality: Modality) -> PathBuf {
        self.path().join(modality.dir_name())
    }

    pub fn report_path(&self) -> PathBuf {
        self.path().join(format!("{}_report.txt", self.subject))
    }

    pub fn vernier_csv(&self) -> PathBuf {
        self.modality_dir(Modality::Vernier)
            .join(format!("{}_vernier.csv", self.subject))
    }

    /// Fills `{subject}` in a file name template.
    pub fn expand(&self, template: &str) -> String {
        template.replace("{subject}", &self.subject)
    }
}

pub fn frame_file_name(sequence: u64, time_stamp: NaiveDateTime, ext: &str) -> String {
    format!("{sequence}_{}.{ext}", time_stamp.format(FILE_TIME_FORMAT))
}

/// Reads `(sequence, timestamp)` back out of a frame file name.
pub fn parse_frame_file_name(name: &str) -> Option<(u64, NaiveDateTime)> {
    let stem = name.rsplit_once('.').map_or(name, |(stem, _)| stem);
    let (sequence, time_stamp) = stem.split_once('_')?;
    let sequence = sequence.parse().ok()?;
    let time_stamp = NaiveDateTime::parse_from_str(time_stamp, FILE_TIME_FORMAT).ok()?;
    Some((sequence, time_stamp))
}
