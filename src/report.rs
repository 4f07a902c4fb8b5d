//! Plain-text `{subject}_report.txt` blocks.
//!
//! Every block is a run of `Label: value` lines followed by a blank line.
//! Capture sessions of different modalities append to the same file from
//! separate processes, so a block always goes out in a single append.

use std::{
    fmt::{self, Display},
    fs::OpenOptions,
    io::Write,
    path::Path,
};

use chrono::TimeDelta;

use crate::Result;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportBlock {
    lines: Vec<(String, String)>,
}

impl ReportBlock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(mut self, label: impl Into<String>, value: impl Display) -> Self {
        self.lines.push((label.into(), value.to_string()));
        self
    }

    pub fn get(&self, label: &str) -> Option<&str> {
        self.lines
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, v)| v.as_str())
    }

    pub fn append_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut f = OpenOptions::new().create(true).append(true).open(path)?;
        f.write_all(self.to_string().as_bytes())?;
        Ok(())
    }
}

impl Display for ReportBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (label, value) in &self.lines {
            writeln!(f, "{label}: {value}")?;
        }
        writeln!(f)
    }
}

/// `H:MM:SS.ffffff`, the way elapsed times read in the reports.
pub fn format_elapsed(delta: TimeDelta) -> String {
    let sign = if delta < TimeDelta::zero() { "-" } else { "" };
    let delta = delta.abs();
    let secs = delta.num_seconds();
    let micros = (delta - TimeDelta::seconds(secs)).num_microseconds().unwrap_or(0);
    format!(
        "{sign}{}:{:02}:{:02}.{micros:06}",
        secs / 3600,
        (secs / 60) % 60,
        secs % 60
    )
}
