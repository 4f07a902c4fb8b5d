//! Wall-clock scheduling shared by every capture process.
//!
//! Capture processes never talk to each other. They agree on when to start
//! only because each one is handed the same `HH:MM:SS` string and reads the
//! same system clock, so the window computed here is the whole of the
//! cross-stream synchronisation.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::{Local, NaiveDateTime, NaiveTime, TimeDelta, Timelike};

use crate::{Error, Result};

pub const TIME_OF_DAY_FORMAT: &str = "%H:%M:%S";

/// Below this much remaining time the wait stops sleeping and spins.
const SPIN_THRESHOLD: Duration = Duration::from_millis(2);
/// Longest single sleep before the wall clock is read again.
const MAX_SLEEP_CHUNK: Duration = Duration::from_millis(100);

pub trait Clock {
    fn now(&self) -> NaiveDateTime;

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }

    /// Called in the final stretch before a deadline instead of sleeping.
    fn spin(&self, _remaining: Duration) {
        std::hint::spin_loop();
        std::thread::yield_now();
    }
}

/// Local wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// A clock that only moves when told to. Sleeping on it advances it, so a
/// whole capture session can run without real waiting.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<NaiveDateTime>>,
}

impl ManualClock {
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += to_delta(by);
    }

    pub fn set(&self, to: NaiveDateTime) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }

    fn spin(&self, remaining: Duration) {
        self.advance(remaining);
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> NaiveDateTime {
        (**self).now()
    }

    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }

    fn spin(&self, remaining: Duration) {
        (**self).spin(remaining)
    }
}

pub fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

/// Parses `HH:MM:SS` and places it on the clock's current date.
pub fn parse_time_of_day(text: &str, clock: &impl Clock) -> Result<NaiveDateTime> {
    let time = NaiveTime::parse_from_str(text.trim(), TIME_OF_DAY_FORMAT).map_err(|e| {
        Error::InvalidSchedule(format!("start time '{text}' is not HH:MM:SS ({e})"))
    })?;
    Ok(clock.now().date().and_time(time))
}

/// Picks the start time: a positive countdown wins over an explicit
/// `HH:MM:SS`. The countdown result is truncated to whole seconds because it
/// is handed to the capture processes as `HH:MM:SS`.
pub fn resolve_start(
    start_time: Option<&str>,
    countdown_secs: Option<u64>,
    clock: &impl Clock,
) -> Result<NaiveDateTime> {
    match (countdown_secs, start_time) {
        (Some(secs), _) if secs > 0 => {
            let start = i64::try_from(secs)
                .ok()
                .and_then(TimeDelta::try_seconds)
                .and_then(|d| clock.now().checked_add_signed(d))
                .ok_or_else(|| {
                    Error::InvalidSchedule(format!("countdown of {secs}s is out of range"))
                })?;
            Ok(start.with_nanosecond(0).unwrap_or(start))
        }
        (_, Some(text)) => parse_time_of_day(text, clock),
        _ => Err(Error::InvalidSchedule(
            "either a start time or a positive countdown is required".into(),
        )),
    }
}

pub fn format_time_of_day(at: NaiveDateTime) -> String {
    at.format(TIME_OF_DAY_FORMAT).to_string()
}

/// The `[start, end)` interval in which samples are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledWindow {
    start: NaiveDateTime,
    end: NaiveDateTime,
}

impl ScheduledWindow {
    /// Fails unless `start` lies more than `guard` ahead of the clock.
    pub fn new(
        start: NaiveDateTime,
        duration: Duration,
        guard: Duration,
        clock: &impl Clock,
    ) -> Result<Self> {
        let now = clock.now();
        let earliest = TimeDelta::from_std(guard)
            .ok()
            .and_then(|g| start.checked_sub_signed(g))
            .ok_or_else(|| {
                Error::InvalidSchedule(format!("guard of {}s is out of range", guard.as_secs()))
            })?;
        if earliest <= now {
            return Err(Error::InvalidSchedule(format!(
                "start time {} must be more than {}s in the future (now {})",
                start.format("%H:%M:%S"),
                guard.as_secs_f64(),
                now.format("%H:%M:%S%.3f"),
            )));
        }
        if duration.is_zero() {
            return Err(Error::InvalidSchedule("duration must be positive".into()));
        }
        let end = TimeDelta::from_std(duration)
            .ok()
            .and_then(|d| start.checked_add_signed(d))
            .ok_or_else(|| {
                Error::InvalidSchedule(format!("duration of {}s is out of range", duration.as_secs()))
            })?;
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDateTime {
        self.start
    }

    pub fn end(&self) -> NaiveDateTime {
        self.end
    }

    pub fn contains(&self, at: NaiveDateTime) -> bool {
        self.start <= at && at < self.end
    }

    pub fn is_over(&self, at: NaiveDateTime) -> bool {
        at >= self.end
    }
}

/// Returns once the clock reads `deadline` or later.
///
/// Sleeps in bounded chunks while the deadline is far, re-reading the clock
/// after each one, and only spins for the last couple of milliseconds.
pub fn wait_until(clock: &impl Clock, deadline: NaiveDateTime) {
    loop {
        let now = clock.now();
        if now >= deadline {
            return;
        }
        let remaining = (deadline - now).to_std().unwrap_or_default();
        if remaining > SPIN_THRESHOLD {
            clock.sleep((remaining - SPIN_THRESHOLD).min(MAX_SLEEP_CHUNK));
        } else {
            clock.spin(remaining);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn time_of_day_lands_on_today() {
        let clock = ManualClock::new(at(9, 0, 0));
        assert_eq!(parse_time_of_day("11:15:00", &clock).unwrap(), at(11, 15, 0));
        assert!(matches!(
            parse_time_of_day("11:15", &clock),
            Err(Error::InvalidSchedule(_))
        ));
    }

    #[test]
    fn countdown_takes_precedence() {
        let clock = ManualClock::new(at(9, 0, 0) + TimeDelta::milliseconds(700));
        let start = resolve_start(Some("12:00:00"), Some(10), &clock).unwrap();
        assert_eq!(start, at(9, 0, 10));
        let start = resolve_start(Some("12:00:00"), Some(0), &clock).unwrap();
        assert_eq!(start, at(12, 0, 0));
        assert!(resolve_start(None, None, &clock).is_err());
    }

    #[test]
    fn window_rejects_starts_inside_guard() {
        let clock = ManualClock::new(at(10, 0, 0));
        let guard = Duration::from_secs(4);
        let dur = Duration::from_secs(10);
        assert!(ScheduledWindow::new(at(10, 0, 4), dur, guard, &clock).is_err());
        assert!(ScheduledWindow::new(at(9, 59, 0), dur, guard, &clock).is_err());
        let window = ScheduledWindow::new(at(10, 0, 5), dur, guard, &clock).unwrap();
        assert_eq!(window.end(), at(10, 0, 15));
    }

    #[test]
    fn oversized_values_are_schedule_errors() {
        let clock = ManualClock::new(at(10, 0, 0));
        for secs in [10_000_000_000_000_000, u64::MAX] {
            assert!(matches!(
                resolve_start(None, Some(secs), &clock),
                Err(Error::InvalidSchedule(_))
            ));
        }
        let guard = Duration::from_secs(4);
        assert!(matches!(
            ScheduledWindow::new(at(10, 0, 10), Duration::from_secs(u64::MAX), guard, &clock),
            Err(Error::InvalidSchedule(_))
        ));
        assert!(matches!(
            ScheduledWindow::new(
                at(10, 0, 10),
                Duration::from_secs(10),
                Duration::from_secs(u64::MAX),
                &clock
            ),
            Err(Error::InvalidSchedule(_))
        ));
    }

    #[test]
    fn window_is_half_open() {
        let clock = ManualClock::new(at(10, 0, 0));
        let window = ScheduledWindow::new(
            at(10, 0, 10),
            Duration::from_secs(5),
            Duration::from_secs(4),
            &clock,
        )
        .unwrap();
        assert!(!window.contains(at(10, 0, 9)));
        assert!(window.contains(at(10, 0, 10)));
        assert!(window.contains(at(10, 0, 14)));
        assert!(!window.contains(at(10, 0, 15)));
        assert!(window.is_over(at(10, 0, 15)));
    }

    #[test]
    fn wait_stops_at_deadline() {
        let clock = ManualClock::new(at(10, 0, 0));
        wait_until(&clock, at(10, 0, 3));
        let overshoot = clock.now() - at(10, 0, 3);
        assert!(overshoot >= TimeDelta::zero());
        assert!(overshoot < TimeDelta::milliseconds(5));
    }

    #[test]
    fn system_clock_wait_is_close() {
        let clock = SystemClock;
        let deadline = clock.now() + TimeDelta::milliseconds(30);
        wait_until(&clock, deadline);
        let late = clock.now() - deadline;
        assert!(late >= TimeDelta::zero());
        assert!(late < TimeDelta::milliseconds(20));
    }
}
