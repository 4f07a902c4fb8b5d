//! One device, one window, one output.
//!
//! A capture goes through two steps. [`Scheduled::new`] checks the requested
//! start against the guard interval without touching any hardware, then
//! [`Scheduled::open`] acquires the device and output and hands back a
//! [`CaptureSession`] whose [`run`](CaptureSession::run) polls the device
//! until the window closes.

use std::{path::PathBuf, time::Duration};

use chrono::NaiveDateTime;
use tracing::{debug, info, info_span, warn};

use crate::{
    data_saver::DataFile,
    dataset::{Modality, SubjectDir, ROW_TIME_FORMAT},
    report::{format_elapsed, ReportBlock},
    schedule::{to_delta, wait_until, Clock, ScheduledWindow},
    Error, Result,
};

const LOG_EVERY: u64 = 100;

/// A handle to one acquisition device, exclusively owned by one session.
pub trait Device {
    type Sample;

    fn name(&self) -> &str;

    /// Blocks until the next sample is available.
    fn read(&mut self) -> Result<Self::Sample>;

    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewEvent {
    Continue,
    Quit,
}

/// Live view of what the device is producing. Never alters what is saved.
pub trait Preview<S> {
    fn show(&mut self, sample: &S) -> Result<PreviewEvent>;

    fn close(&mut self) {}
}

/// Headless runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPreview;

impl<S> Preview<S> for NoPreview {
    fn show(&mut self, _sample: &S) -> Result<PreviewEvent> {
        Ok(PreviewEvent::Continue)
    }
}

/// A preview window needs the `opencv` feature.
pub fn check_preview(headless: bool) -> Result<()> {
    if !headless && !cfg!(feature = "opencv") {
        return Err(Error::FeatureNotEnabled("opencv"));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct SessionSpec {
    pub subject: SubjectDir,
    pub modality: Modality,
    pub start: NaiveDateTime,
    pub duration: Duration,
    /// Minimum lead between now and `start` for the schedule to be accepted.
    pub guard: Duration,
    /// How long before `start` the device starts being read. Samples from
    /// this warm-up are read and thrown away.
    pub lead: Duration,
}

/// A validated schedule that has not touched any device yet.
#[derive(Debug)]
pub struct Scheduled<C> {
    spec: SessionSpec,
    window: ScheduledWindow,
    clock: C,
}

impl<C: Clock> Scheduled<C> {
    pub fn new(spec: SessionSpec, clock: C) -> Result<Self> {
        let window = ScheduledWindow::new(spec.start, spec.duration, spec.guard, &clock)?;
        Ok(Self {
            spec,
            window,
            clock,
        })
    }

    pub fn window(&self) -> ScheduledWindow {
        self.window
    }

    pub fn spec(&self) -> &SessionSpec {
        &self.spec
    }

    /// Opens the device, then the output. The output is only created once
    /// the device is known to be present.
    pub fn open<D, F>(
        self,
        open_device: impl FnOnce() -> Result<D>,
        open_output: impl FnOnce(&SubjectDir) -> Result<F>,
    ) -> Result<CaptureSession<D, F, C>>
    where
        D: Device,
        F: DataFile<Data = D::Sample>,
    {
        let device = open_device()?;
        info!(device = device.name(), modality = %self.spec.modality, "device opened");
        let file = open_output(&self.spec.subject)?;
        Ok(CaptureSession {
            spec: self.spec,
            window: self.window,
            clock: self.clock,
            device,
            file,
            preview: Box::new(NoPreview),
        })
    }
}

pub struct CaptureSession<D: Device, F, C> {
    spec: SessionSpec,
    window: ScheduledWindow,
    clock: C,
    device: D,
    file: F,
    preview: Box<dyn Preview<D::Sample>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSummary {
    pub subject: String,
    pub modality: Modality,
    pub output: PathBuf,
    pub window: ScheduledWindow,
    pub first: Option<NaiveDateTime>,
    pub last: Option<NaiveDateTime>,
    pub count: u64,
    pub discarded: u64,
    pub quit_early: bool,
}

impl CaptureSummary {
    pub fn report_block(&self) -> ReportBlock {
        let fmt = |t: Option<NaiveDateTime>| {
            t.map_or_else(|| "-".to_string(), |t| t.format(ROW_TIME_FORMAT).to_string())
        };
        let duration = match (self.first, self.last) {
            (Some(first), Some(last)) => format_elapsed(last - first),
            _ => "-".to_string(),
        };
        ReportBlock::new()
            .line("Capture", self.modality)
            .line("Subject", &self.subject)
            .line("Directory", self.output.display())
            .line("Scheduled Start", self.window.start().format(ROW_TIME_FORMAT))
            .line("Scheduled End", self.window.end().format(ROW_TIME_FORMAT))
            .line("Start Time", fmt(self.first))
            .line("End Time", fmt(self.last))
            .line("Duration", duration)
            .line("Number of files", self.count)
            .line("Stopped Early", self.quit_early)
    }
}

struct PollOutcome {
    first: Option<NaiveDateTime>,
    last: Option<NaiveDateTime>,
    count: u64,
    discarded: u64,
    quit_early: bool,
}

impl<D, F, C> CaptureSession<D, F, C>
where
    D: Device,
    F: DataFile<Data = D::Sample>,
    C: Clock,
{
    pub fn with_preview(mut self, preview: Box<dyn Preview<D::Sample>>) -> Self {
        self.preview = preview;
        self
    }

    pub fn window(&self) -> ScheduledWindow {
        self.window
    }

    /// Waits for the window, captures through it, then releases the device,
    /// finishes the output and appends the capture block to the subject
    /// report.
    ///
    /// A failed read aborts the session. The device is still released, but
    /// whatever the output had buffered is dropped.
    pub fn run(mut self) -> Result<CaptureSummary> {
        let span = info_span!("capture", subject = self.spec.subject.subject(), modality = %self.spec.modality);
        let _enter = span.enter();

        info!(
            start = %self.window.start().format("%H:%M:%S"),
            end = %self.window.end().format("%H:%M:%S"),
            "waiting for start time"
        );
        wait_until(&self.clock, self.window.start() - to_delta(self.spec.lead));
        info!(lead_secs = self.spec.lead.as_secs_f64(), "polling device");

        let outcome = self.poll();
        let released = self.device.release();
        self.preview.close();
        let outcome = outcome?;
        released?;

        let output = self.file.end()?;
        let summary = CaptureSummary {
            subject: self.spec.subject.subject().to_string(),
            modality: self.spec.modality,
            output,
            window: self.window,
            first: outcome.first,
            last: outcome.last,
            count: outcome.count,
            discarded: outcome.discarded,
            quit_early: outcome.quit_early,
        };
        summary
            .report_block()
            .append_to(&self.spec.subject.report_path())?;
        info!(
            count = summary.count,
            discarded = summary.discarded,
            output = %summary.output.display(),
            "capture finished"
        );
        Ok(summary)
    }

    fn poll(&mut self) -> Result<PollOutcome> {
        let mut outcome = PollOutcome {
            first: None,
            last: None,
            count: 0,
            discarded: 0,
            quit_early: false,
        };
        loop {
            let sample = self.device.read()?;
            let now = self.clock.now();

            if self.preview.show(&sample)? == PreviewEvent::Quit {
                warn!("quit key pressed, stopping before the window closes");
                outcome.quit_early = true;
                break;
            }

            if self.window.contains(now) {
                self.file.record(outcome.count, now, &sample)?;
                outcome.first.get_or_insert(now);
                outcome.last = Some(now);
                outcome.count += 1;
                if outcome.count % LOG_EVERY == 0 {
                    debug!(count = outcome.count, "samples saved");
                }
            } else {
                outcome.discarded += 1;
            }

            if self.window.is_over(now) {
                break;
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, rc::Rc};

    use chrono::NaiveDate;

    use super::*;
    use crate::schedule::ManualClock;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    /// Produces a counter every `period` of clock time.
    struct Ticker {
        clock: ManualClock,
        period: Duration,
        value: u32,
        fail_after: Option<u32>,
        released: Rc<Cell<bool>>,
    }

    impl Device for Ticker {
        type Sample = u32;

        fn name(&self) -> &str {
            "ticker"
        }

        fn read(&mut self) -> Result<u32> {
            self.clock.advance(self.period);
            self.value += 1;
            if Some(self.value) == self.fail_after {
                return Err(Error::read("ticker", "unplugged"));
            }
            Ok(self.value)
        }

        fn release(&mut self) -> Result<()> {
            self.released.set(true);
            Ok(())
        }
    }

    #[derive(Default)]
    struct Recorded {
        rows: Vec<(u64, NaiveDateTime, u32)>,
        ended: bool,
    }

    impl DataFile for Recorded {
        type Data = u32;

        fn record(&mut self, sequence: u64, time_stamp: NaiveDateTime, data: &u32) -> Result<()> {
            self.rows.push((sequence, time_stamp, *data));
            Ok(())
        }

        fn end(&mut self) -> Result<PathBuf> {
            self.ended = true;
            Ok(PathBuf::from("memory"))
        }
    }

    struct QuitAfter(u32);

    impl Preview<u32> for QuitAfter {
        fn show(&mut self, sample: &u32) -> Result<PreviewEvent> {
            Ok(if *sample >= self.0 {
                PreviewEvent::Quit
            } else {
                PreviewEvent::Continue
            })
        }
    }

    fn spec(root: &std::path::Path, start: NaiveDateTime, lead: u64) -> SessionSpec {
        SessionSpec {
            subject: SubjectDir::new(root, "carol"),
            modality: Modality::Thermal,
            start,
            duration: Duration::from_secs(2),
            guard: Duration::from_secs(4),
            lead: Duration::from_secs(lead),
        }
    }

    fn ticker(clock: &ManualClock, fail_after: Option<u32>) -> (Ticker, Rc<Cell<bool>>) {
        let released = Rc::new(Cell::new(false));
        let t = Ticker {
            clock: clock.clone(),
            period: Duration::from_millis(125),
            value: 0,
            fail_after,
            released: released.clone(),
        };
        (t, released)
    }

    #[test]
    fn preview_window_depends_on_opencv() {
        assert!(check_preview(true).is_ok());
        let windowed = check_preview(false);
        if cfg!(feature = "opencv") {
            assert!(windowed.is_ok());
        } else {
            assert!(matches!(windowed, Err(Error::FeatureNotEnabled("opencv"))));
        }
    }

    #[test]
    fn schedule_inside_guard_never_opens_device() {
        let root = tempfile::tempdir().unwrap();
        let clock = ManualClock::new(at(12, 0, 0));
        let opened = Cell::new(false);
        let result = Scheduled::new(spec(root.path(), at(12, 0, 3), 3), clock.clone())
            .and_then(|s| {
                s.open(
                    || {
                        opened.set(true);
                        Ok(ticker(&clock, None).0)
                    },
                    |_| Ok(Recorded::default()),
                )
            });
        assert!(matches!(result, Err(Error::InvalidSchedule(_))));
        assert!(!opened.get());
    }

    #[test]
    fn only_in_window_samples_are_saved_in_order() {
        let root = tempfile::tempdir().unwrap();
        let clock = ManualClock::new(at(12, 0, 0));
        let (dev, _) = ticker(&clock, None);
        let mut session = Scheduled::new(spec(root.path(), at(12, 0, 10), 3), clock.clone())
            .unwrap()
            .open(|| Ok(dev), |_| Ok(Recorded::default()))
            .unwrap();
        let window = session.window();

        let outcome = session.poll_for_test();
        let rows = &session.file.rows;

        assert_eq!(outcome.count as usize, rows.len());
        // 2 s of 8 Hz
        assert_eq!(rows.len(), 16);
        for (i, (seq, ts, _)) in rows.iter().enumerate() {
            assert_eq!(*seq, i as u64);
            assert!(window.start() <= *ts && *ts <= window.end());
        }
        assert!(outcome.discarded > 0);
    }

    #[test]
    fn run_writes_capture_report() {
        let root = tempfile::tempdir().unwrap();
        let clock = ManualClock::new(at(12, 0, 0));
        let (dev, released) = ticker(&clock, None);
        let summary = Scheduled::new(spec(root.path(), at(12, 0, 10), 3), clock.clone())
            .unwrap()
            .open(|| Ok(dev), |_| Ok(Recorded::default()))
            .unwrap()
            .run()
            .unwrap();
        assert!(released.get());
        assert_eq!(summary.count, 16);
        assert_eq!(summary.first, Some(at(12, 0, 10)));
        assert!(!summary.quit_early);

        let report = std::fs::read_to_string(root.path().join("carol/carol_report.txt")).unwrap();
        assert!(report.starts_with("Capture: thermal\nSubject: carol\n"));
        assert!(report.contains("Number of files: 16\n"));
    }

    #[test]
    fn quit_key_stops_early() {
        let root = tempfile::tempdir().unwrap();
        let clock = ManualClock::new(at(12, 0, 0));
        let (dev, _) = ticker(&clock, None);
        let summary = Scheduled::new(spec(root.path(), at(12, 0, 10), 0), clock.clone())
            .unwrap()
            .open(|| Ok(dev), |_| Ok(Recorded::default()))
            .unwrap()
            .with_preview(Box::new(QuitAfter(5)))
            .run()
            .unwrap();
        assert!(summary.quit_early);
        assert_eq!(summary.count, 4);
    }

    #[test]
    fn read_failure_aborts_and_releases() {
        let root = tempfile::tempdir().unwrap();
        let clock = ManualClock::new(at(12, 0, 0));
        let (dev, released) = ticker(&clock, Some(30));
        let result = Scheduled::new(spec(root.path(), at(12, 0, 10), 3), clock.clone())
            .unwrap()
            .open(|| Ok(dev), |_| Ok(Recorded::default()))
            .unwrap()
            .run();
        assert!(matches!(result, Err(Error::DeviceRead { .. })));
        assert!(released.get());
        assert!(!root.path().join("carol/carol_report.txt").exists());
    }

    impl<C: Clock> CaptureSession<Ticker, Recorded, C> {
        fn poll_for_test(&mut self) -> PollOutcome {
            wait_until(&self.clock, self.window.start() - to_delta(self.spec.lead));
            self.poll().unwrap()
        }
    }
}
