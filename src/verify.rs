//! Post-hoc checks on a recorded subject.
//!
//! Each configured source is counted, its first and last timestamps are read
//! back (from frame file names or table rows), and the empirical rate
//! `count / (last - first)` is held against the source's rule. Results are
//! appended to `{subject}_report.txt`; a failing source gets an `Error` block
//! and does not stop the others.

use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::{NaiveDateTime, TimeDelta};
use tracing::{info, info_span, warn};

use crate::{
    config::{CheckConfig, CheckKind, RateRule, Settings},
    dataset::{parse_frame_file_name, Modality, SubjectDir, ROW_TIME_FORMAT},
    errors::VerifyError,
    plot::{save_series_plot, SeriesPlot},
    report::{format_elapsed, ReportBlock},
    schedule::to_delta,
    signal::{estimate_heart_rate, HeartRate, DEFAULT_CUTOFF_HZ},
    Result,
};

/// A single frame on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameEntry {
    pub sequence: u64,
    pub time_stamp: NaiveDateTime,
    pub path: PathBuf,
}

/// Frames with extension `ext` in `dir`, sorted by sequence number. Files
/// with other extensions are ignored.
pub fn list_frames(dir: &Path, ext: &str) -> Result<Vec<FrameEntry>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(VerifyError::EmptySource(dir.to_path_buf()).into())
        }
        Err(e) => return Err(e.into()),
    };
    let mut frames = vec![];
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(ext) {
            continue;
        }
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let Some((sequence, time_stamp)) = parse_frame_file_name(name) else {
            return Err(VerifyError::BadFileName(path).into());
        };
        frames.push(FrameEntry {
            sequence,
            time_stamp,
            path,
        });
    }
    if frames.is_empty() {
        return Err(VerifyError::EmptySource(dir.to_path_buf()).into());
    }
    frames.sort_by_key(|f| f.sequence);
    Ok(frames)
}

/// Places where the sequence does not step by exactly one.
pub fn sequence_gaps(frames: &[FrameEntry]) -> usize {
    frames
        .windows(2)
        .filter(|w| w[1].sequence != w[0].sequence + 1)
        .count()
}

/// Rows of a biosensor table: a timestamp then one value per channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub times: Vec<NaiveDateTime>,
    pub rows: Vec<Vec<f64>>,
}

impl Table {
    /// Values of a 1-based channel. Rows too short for it are skipped.
    pub fn column(&self, channel: usize) -> (Vec<f64>, Vec<f64>) {
        let Some(&origin) = self.times.first() else {
            return (vec![], vec![]);
        };
        self.times
            .iter()
            .zip(&self.rows)
            .filter_map(|(t, row)| {
                let value = *row.get(channel.checked_sub(1)?)?;
                let secs = (*t - origin).num_microseconds()? as f64 / 1e6;
                Some((secs, value))
            })
            .unzip()
    }
}

pub fn read_table(path: &Path) -> Result<Table> {
    if !path.exists() {
        return Err(VerifyError::EmptySource(path.to_path_buf()).into());
    }
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;
    let mut table = Table::default();
    for (i, record) in rdr.records().enumerate() {
        let record = record?;
        let bad_row = |reason: String| VerifyError::BadRow {
            path: path.to_path_buf(),
            row: i + 1,
            reason,
        };
        let mut fields = record.iter();
        let stamp = fields.next().unwrap_or_default();
        let time_stamp = NaiveDateTime::parse_from_str(stamp, ROW_TIME_FORMAT)
            .map_err(|e| bad_row(format!("timestamp '{stamp}': {e}")))?;
        let values = fields
            .map(|v| {
                v.parse::<f64>()
                    .map_err(|e| bad_row(format!("value '{v}': {e}")))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        table.times.push(time_stamp);
        table.rows.push(values);
    }
    if table.times.is_empty() {
        return Err(VerifyError::EmptySource(path.to_path_buf()).into());
    }
    Ok(table)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Verification {
    pub source: String,
    pub path: PathBuf,
    pub count: usize,
    pub first: NaiveDateTime,
    pub last: NaiveDateTime,
    pub rate: f64,
    pub passed: bool,
}

impl Verification {
    /// Fails on a zero-length span, where no rate can be given.
    pub fn measure(
        source: &str,
        path: &Path,
        count: usize,
        first: NaiveDateTime,
        last: NaiveDateTime,
        rule: RateRule,
    ) -> Result<Self> {
        let secs = (last - first).num_microseconds().unwrap_or(i64::MAX) as f64 / 1e6;
        if secs <= 0.0 {
            return Err(VerifyError::ZeroDuration(path.to_path_buf()).into());
        }
        let rate = count as f64 / secs;
        Ok(Self {
            source: source.to_string(),
            path: path.to_path_buf(),
            count,
            first,
            last,
            rate,
            passed: rule.passes(rate),
        })
    }

    pub fn duration(&self) -> TimeDelta {
        self.last - self.first
    }

    pub fn report_block(&self) -> ReportBlock {
        ReportBlock::new()
            .line("Source", &self.source)
            .line("Directory", self.path.display())
            .line("Number of files", self.count)
            .line("Start Time", self.first.format(ROW_TIME_FORMAT))
            .line("End Time", self.last.format(ROW_TIME_FORMAT))
            .line("Duration", format_elapsed(self.duration()))
            .line("Sampling Rate", self.rate)
            .line("Status", self.passed)
    }
}

/// Largest gap between the first samples of the verified sources.
#[derive(Debug, Clone, PartialEq)]
pub struct Alignment {
    pub sources: Vec<String>,
    pub max_skew: TimeDelta,
    pub tolerance: TimeDelta,
}

impl Alignment {
    /// Needs at least two sources to say anything.
    pub fn of(verified: &[&Verification], tolerance: std::time::Duration) -> Option<Self> {
        if verified.len() < 2 {
            return None;
        }
        let earliest = verified.iter().map(|v| v.first).min()?;
        let latest = verified.iter().map(|v| v.first).max()?;
        Some(Self {
            sources: verified.iter().map(|v| v.source.clone()).collect(),
            max_skew: latest - earliest,
            tolerance: to_delta(tolerance),
        })
    }

    pub fn passed(&self) -> bool {
        self.max_skew <= self.tolerance
    }

    pub fn report_block(&self) -> ReportBlock {
        ReportBlock::new()
            .line("Alignment", self.sources.join(", "))
            .line("Max Start Skew", format_elapsed(self.max_skew))
            .line("Tolerance", format_elapsed(self.tolerance))
            .line("Status", self.passed())
    }
}

pub struct CheckOutcome {
    pub source: String,
    pub result: Result<Verification>,
    pub heart_rate: Option<f64>,
    pub plots: Vec<PathBuf>,
}

impl CheckOutcome {
    pub fn passed(&self) -> bool {
        matches!(&self.result, Ok(v) if v.passed)
    }
}

#[derive(Default)]
struct TableExtras {
    heart_rate: Option<f64>,
    plots: Vec<PathBuf>,
}

pub struct VerifyReport {
    pub outcomes: Vec<CheckOutcome>,
    pub alignment: Option<Alignment>,
}

impl VerifyReport {
    pub fn all_passed(&self) -> bool {
        self.outcomes.iter().all(CheckOutcome::passed)
            && self.alignment.as_ref().map_or(true, Alignment::passed)
    }
}

pub struct Verifier<'a> {
    subject: SubjectDir,
    settings: &'a Settings,
}

impl<'a> Verifier<'a> {
    pub fn new(subject: SubjectDir, settings: &'a Settings) -> Self {
        Self { subject, settings }
    }

    /// Runs every configured check and appends the results to the report.
    pub fn run(&self) -> Result<VerifyReport> {
        let span = info_span!("verify", subject = self.subject.subject());
        let _enter = span.enter();
        let report_path = self.subject.report_path();

        let mut outcomes = vec![];
        for check in &self.settings.checks {
            let outcome = self.check(check);
            let block = match &outcome.result {
                Ok(v) => {
                    info!(source = %v.source, count = v.count, rate = v.rate, passed = v.passed, "verified");
                    let block = v.report_block();
                    match outcome.heart_rate {
                        Some(bpm) => block.line("Heart Rate", format!("{bpm:.1} bpm")),
                        None => block,
                    }
                }
                Err(e) => {
                    warn!(source = %check.source, error = %e, "verification failed");
                    ReportBlock::new()
                        .line("Source", &check.source)
                        .line("Error", e)
                }
            };
            block.append_to(&report_path)?;
            outcomes.push(outcome);
        }

        let verified: Vec<&Verification> = outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok())
            .collect();
        let alignment = Alignment::of(&verified, self.settings.skew_tolerance());
        if let Some(alignment) = &alignment {
            if !alignment.passed() {
                warn!(skew = %format_elapsed(alignment.max_skew), "sources started apart");
            }
            alignment.report_block().append_to(&report_path)?;
        }
        Ok(VerifyReport {
            outcomes,
            alignment,
        })
    }

    pub fn check(&self, check: &CheckConfig) -> CheckOutcome {
        let mut extras = TableExtras::default();
        let result = match &check.kind {
            CheckKind::Frames { dir, ext } => self.check_frames(check, dir, ext),
            CheckKind::Table { file, column } => self
                .check_table(check, file, *column)
                .map(|(verification, found)| {
                    extras = found;
                    verification
                }),
        };
        CheckOutcome {
            source: check.source.clone(),
            result,
            heart_rate: extras.heart_rate,
            plots: extras.plots,
        }
    }

    fn check_frames(&self, check: &CheckConfig, dir: &str, ext: &str) -> Result<Verification> {
        let dir = self.subject.path().join(dir);
        let frames = list_frames(&dir, ext)?;
        let gaps = sequence_gaps(&frames);
        if gaps > 0 {
            warn!(source = %check.source, gaps, "sequence numbers skip");
        }
        let (first, last) = match (frames.first(), frames.last()) {
            (Some(first), Some(last)) => (first.time_stamp, last.time_stamp),
            _ => return Err(VerifyError::EmptySource(dir).into()),
        };
        Verification::measure(&check.source, &dir, frames.len(), first, last, check.rule)
    }

    fn check_table(
        &self,
        check: &CheckConfig,
        file: &str,
        column: usize,
    ) -> Result<(Verification, TableExtras)> {
        let path = self
            .subject
            .modality_dir(Modality::Vernier)
            .join(self.subject.expand(file));
        let table = read_table(&path)?;
        let (first, last) = match (table.times.first(), table.times.last()) {
            (Some(&first), Some(&last)) => (first, last),
            _ => return Err(VerifyError::EmptySource(path).into()),
        };
        let verification =
            Verification::measure(&check.source, &path, table.times.len(), first, last, check.rule)?;
        let mut extras = TableExtras::default();

        if check.plot {
            let (xs, ys) = table.column(column);
            let png = self
                .subject
                .path()
                .join(format!("{}_gt_{}.png", self.subject.subject(), check.source));
            let plot = SeriesPlot {
                title: format!("{} {}", self.subject.subject(), check.source),
                xs: &xs,
                ys: &ys,
                markers: &[],
            };
            extras.plots.extend(save_series_plot(&png, &plot)?);
        }

        if let Some(hr_column) = check.heart_rate_column {
            let (xs, ecg) = table.column(hr_column);
            let secs = verification.duration().num_microseconds().unwrap_or(0) as f64 / 1e6;
            let hr = estimate_heart_rate(&ecg, verification.rate, secs, DEFAULT_CUTOFF_HZ)?;
            info!(source = %check.source, bpm = hr.beats_per_minute, peaks = hr.peaks.len(), "heart rate");
            if check.plot {
                extras.plots.extend(self.plot_heart_rate(check, &xs, &hr)?);
            }
            extras.heart_rate = Some(hr.beats_per_minute);
        }
        Ok((verification, extras))
    }

    fn plot_heart_rate(
        &self,
        check: &CheckConfig,
        xs: &[f64],
        hr: &HeartRate,
    ) -> Result<Option<PathBuf>> {
        let png = self
            .subject
            .path()
            .join(format!("{}_detect_HR.png", self.subject.subject()));
        let plot = SeriesPlot {
            title: format!(
                "{} {} HR: {:.0}",
                self.subject.subject(),
                check.source,
                hr.beats_per_minute
            ),
            xs,
            ys: &hr.filtered,
            markers: &hr.peaks,
        };
        save_series_plot(&png, &plot)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::{dataset::frame_file_name, Error};

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    fn write_frames(dir: &Path, n: u64, span_secs: f64, ext: &str) {
        fs::create_dir_all(dir).unwrap();
        for i in 0..n {
            let offset = (span_secs * 1e6 * i as f64 / (n - 1) as f64) as i64;
            let ts = t0() + TimeDelta::microseconds(offset);
            fs::write(dir.join(frame_file_name(i, ts, ext)), b"x").unwrap();
        }
    }

    #[test]
    fn frame_rate_is_count_over_span() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("rgb");
        write_frames(&dir, 300, 10.0, "jpg");
        fs::write(dir.join("notes.txt"), b"ignored").unwrap();

        let frames = list_frames(&dir, "jpg").unwrap();
        assert_eq!(frames.len(), 300);
        assert_eq!(sequence_gaps(&frames), 0);
        let v = Verification::measure(
            "rgb",
            &dir,
            frames.len(),
            frames[0].time_stamp,
            frames[299].time_stamp,
            RateRule::Exact { rate: 30 },
        )
        .unwrap();
        assert!((v.rate - 30.0).abs() < 1e-3);
        assert!(v.passed);
        assert_eq!(v.report_block().get("Duration"), Some("0:00:10.000000"));
    }

    #[test]
    fn frames_sort_by_sequence_not_name() {
        let root = tempfile::tempdir().unwrap();
        write_frames(root.path(), 12, 1.0, "csv");
        let frames = list_frames(root.path(), "csv").unwrap();
        let seqs: Vec<u64> = frames.iter().map(|f| f.sequence).collect();
        assert_eq!(seqs, (0..12).collect::<Vec<_>>());
        assert_eq!(sequence_gaps(&frames), 0);
    }

    #[test]
    fn skipped_sequence_numbers_are_counted() {
        let root = tempfile::tempdir().unwrap();
        write_frames(root.path(), 12, 1.0, "jpg");
        let ninth = list_frames(root.path(), "jpg").unwrap().remove(9);
        fs::remove_file(&ninth.path).unwrap();

        let frames = list_frames(root.path(), "jpg").unwrap();
        let seqs: Vec<u64> = frames.iter().map(|f| f.sequence).collect();
        assert_eq!(seqs, [0, 1, 2, 3, 4, 5, 6, 7, 8, 10, 11]);
        assert_eq!(sequence_gaps(&frames), 1);
    }

    #[test]
    fn empty_and_unparseable_sources_fail() {
        let root = tempfile::tempdir().unwrap();
        assert!(matches!(
            list_frames(root.path(), "jpg"),
            Err(Error::Verification(VerifyError::EmptySource(_)))
        ));
        fs::write(root.path().join("frame.jpg"), b"x").unwrap();
        assert!(matches!(
            list_frames(root.path(), "jpg"),
            Err(Error::Verification(VerifyError::BadFileName(_)))
        ));
    }

    #[test]
    fn single_timestamp_has_no_rate() {
        let r = Verification::measure("x", Path::new("x"), 1, t0(), t0(), RateRule::AtLeast { rate: 1 });
        assert!(matches!(r, Err(Error::Verification(VerifyError::ZeroDuration(_)))));
    }

    #[test]
    fn tables_read_with_padding() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("t.csv");
        fs::write(
            &path,
            "2024-03-09 10:00:00.000000, 1.5, 2.0\n2024-03-09 10:00:00.050000,1.25,3\n",
        )
        .unwrap();
        let table = read_table(&path).unwrap();
        assert_eq!(table.rows, vec![vec![1.5, 2.0], vec![1.25, 3.0]]);
        let (xs, ys) = table.column(2);
        assert_eq!(xs, vec![0.0, 0.05]);
        assert_eq!(ys, vec![2.0, 3.0]);

        fs::write(&path, "yesterday,1\n").unwrap();
        assert!(matches!(
            read_table(&path),
            Err(Error::Verification(VerifyError::BadRow { row: 1, .. }))
        ));
    }

    #[test]
    fn alignment_compares_first_samples() {
        let mk = |source: &str, ms: i64| Verification {
            source: source.into(),
            path: PathBuf::new(),
            count: 1,
            first: t0() + TimeDelta::milliseconds(ms),
            last: t0() + TimeDelta::seconds(10),
            rate: 1.0,
            passed: true,
        };
        let (a, b) = (mk("rgb", 0), mk("thermal", 300));
        let alignment = Alignment::of(&[&a, &b], std::time::Duration::from_millis(250)).unwrap();
        assert_eq!(alignment.max_skew, TimeDelta::milliseconds(300));
        assert!(!alignment.passed());
        assert!(Alignment::of(&[&a], std::time::Duration::from_millis(250)).is_none());
    }
}
