use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use physcap::{
    biosensor::{open_sensor, SensorConnection, SensorSetting},
    config::Settings,
    data_saver::CSVFile,
    verify::{read_table, Verifier},
    Clock, ManualClock, Modality, Scheduled, SessionSpec, SubjectDir,
};

fn morning() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 4, 15)
        .unwrap()
        .and_hms_micro_opt(9, 59, 51, 250_000)
        .unwrap()
}

fn alice_spec(root: &std::path::Path, start: NaiveDateTime) -> SessionSpec {
    SessionSpec {
        subject: SubjectDir::new(root, "alice"),
        modality: Modality::Vernier,
        start,
        duration: Duration::from_secs(10),
        guard: Duration::from_secs(4),
        lead: Duration::ZERO,
    }
}

#[test]
fn alice_mock_sensor_ten_seconds_at_twenty_hz() {
    let root = tempfile::tempdir().unwrap();
    let clock = ManualClock::new(morning());
    let start = clock.now() + TimeDelta::seconds(8);
    let period = TimeDelta::milliseconds(50);

    let summary = Scheduled::new(alice_spec(root.path(), start), clock.clone())
        .unwrap()
        .open(
            || {
                open_sensor(
                    SensorConnection::Mock,
                    "",
                    0,
                    SensorSetting::from_rate(20, vec![]),
                    clock.clone(),
                )
            },
            |subject| CSVFile::new(subject.vernier_csv()),
        )
        .unwrap()
        .run()
        .unwrap();

    let end = start + TimeDelta::seconds(10);
    let csv = root.path().join("alice/vernier/alice_vernier.csv");
    assert_eq!(summary.output, csv);

    let table = read_table(&csv).unwrap();
    let rows = table.times.len();
    assert!((190..=210).contains(&rows), "{rows} rows");
    assert_eq!(rows as u64, summary.count);
    assert!(table.times[0] >= start);
    assert!(*table.times.last().unwrap() <= end + period);
    assert!(table.times.windows(2).all(|w| w[0] < w[1]));
    assert!(table.rows.iter().all(|r| r.len() == 2));

    let report = std::fs::read_to_string(root.path().join("alice/alice_report.txt")).unwrap();
    assert!(report.contains("Capture: vernier\n"));
    assert!(report.contains(&format!("Number of files: {rows}\n")));
}

#[test]
fn recorded_session_passes_verification() {
    let root = tempfile::tempdir().unwrap();
    let clock = ManualClock::new(morning());
    let start = clock.now() + TimeDelta::seconds(8);
    Scheduled::new(alice_spec(root.path(), start), clock.clone())
        .unwrap()
        .open(
            || {
                open_sensor(
                    SensorConnection::Mock,
                    "",
                    0,
                    SensorSetting::from_rate(20, vec![]),
                    clock.clone(),
                )
            },
            |subject| CSVFile::new(subject.vernier_csv()),
        )
        .unwrap()
        .run()
        .unwrap();

    let settings = Settings {
        checks: physcap::config::default_checks()
            .into_iter()
            .filter(|c| c.source == "vernier")
            .collect(),
        ..Settings::default()
    };
    let report = Verifier::new(SubjectDir::new(root.path(), "alice"), &settings)
        .run()
        .unwrap();
    assert!(report.all_passed());
    let outcome = &report.outcomes[0];
    let verification = outcome.result.as_ref().unwrap();
    assert!(verification.rate >= 20.0);
    let bpm = outcome.heart_rate.unwrap();
    assert!((55.0..=90.0).contains(&bpm), "{bpm} bpm");
}

#[test]
fn late_schedule_touches_nothing() {
    let root = tempfile::tempdir().unwrap();
    let clock = ManualClock::new(morning());
    let start = clock.now() + TimeDelta::seconds(2);
    let result = Scheduled::new(alice_spec(root.path(), start), clock);
    assert!(matches!(result, Err(physcap::Error::InvalidSchedule(_))));
    assert!(!root.path().join("alice").exists());
}
