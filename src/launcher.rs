//! Starts one capture process per modality against a common start time.
//!
//! The processes are not coordinated beyond the `--stime` they all receive.

use std::{
    path::{Path, PathBuf},
    process::ExitStatus,
    time::Duration,
};

use chrono::NaiveDateTime;
use futures::future::join_all;
use tokio::process::Command;
use tracing::{error, info};

use crate::{
    biosensor::SensorConnection,
    dataset::Modality,
    schedule::{format_time_of_day, Clock, ScheduledWindow},
    Result,
};

pub fn binary_name(modality: Modality) -> &'static str {
    match modality {
        Modality::Rgb => "capture-rgb",
        Modality::Thermal => "capture-thermal",
        Modality::Vernier => "capture-vernier",
    }
}

#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub subject: String,
    pub start: NaiveDateTime,
    pub duration: Duration,
    pub rgb_device: usize,
    pub thermal_device: usize,
    pub sensor_rate: u32,
    pub connection: SensorConnection,
    pub sensor_port: String,
    pub modalities: Vec<Modality>,
    pub dataset_root: PathBuf,
    pub config: Option<PathBuf>,
    pub headless: bool,
}

#[derive(Debug)]
pub struct LaunchOutcome {
    pub modality: Modality,
    pub status: Result<ExitStatus>,
}

impl LaunchOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(&self.status, Ok(s) if s.success())
    }
}

impl LaunchPlan {
    /// Same rule the capture processes apply, checked before anything is
    /// spawned.
    pub fn validate(&self, guard: Duration, clock: &impl Clock) -> Result<ScheduledWindow> {
        ScheduledWindow::new(self.start, self.duration, guard, clock)
    }

    pub fn args(&self, modality: Modality) -> Vec<String> {
        let mut args = vec![
            "--name".to_string(),
            self.subject.clone(),
            "--stime".to_string(),
            format_time_of_day(self.start),
            "--duration".to_string(),
            self.duration.as_secs().to_string(),
            "--root".to_string(),
            self.dataset_root.display().to_string(),
        ];
        if let Some(config) = &self.config {
            args.push("--config".to_string());
            args.push(config.display().to_string());
        }
        match modality {
            Modality::Rgb | Modality::Thermal => {
                let device = if modality == Modality::Rgb {
                    self.rgb_device
                } else {
                    self.thermal_device
                };
                args.push("--device".to_string());
                args.push(device.to_string());
                if self.headless {
                    args.push("--headless".to_string());
                }
            }
            Modality::Vernier => {
                args.extend([
                    "--conn".to_string(),
                    self.connection.to_string(),
                    "--port".to_string(),
                    self.sensor_port.clone(),
                    "--fps".to_string(),
                    self.sensor_rate.to_string(),
                ]);
            }
        }
        args
    }

    /// Spawns every selected capture binary from `bin_dir` and waits for all
    /// of them. A binary that cannot be started fails only its own modality.
    pub async fn run(&self, bin_dir: &Path) -> Vec<LaunchOutcome> {
        let runs = self.modalities.iter().map(|&modality| async move {
            let program =
                bin_dir.join(format!("{}{}", binary_name(modality), std::env::consts::EXE_SUFFIX));
            let args = self.args(modality);
            info!(%modality, program = %program.display(), ?args, "launching");
            let status: Result<ExitStatus> = Command::new(&program)
                .args(&args)
                .kill_on_drop(true)
                .status()
                .await
                .map_err(Into::into);
            match &status {
                Ok(s) => info!(%modality, status = %s, "capture exited"),
                Err(e) => error!(%modality, error = %e, "capture could not start"),
            }
            LaunchOutcome { modality, status }
        });
        join_all(runs).await
    }
}

/// Directory holding the running executable, where the capture binaries are
/// installed next to it.
pub fn sibling_bin_dir() -> Result<PathBuf> {
    let exe = std::env::current_exe()?;
    Ok(exe
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf))
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::{schedule::ManualClock, Error};

    fn plan() -> LaunchPlan {
        LaunchPlan {
            subject: "alice".into(),
            start: NaiveDate::from_ymd_opt(2024, 2, 2)
                .unwrap()
                .and_hms_opt(9, 30, 10)
                .unwrap(),
            duration: Duration::from_secs(60),
            rgb_device: 1,
            thermal_device: 2,
            sensor_rate: 20,
            connection: SensorConnection::Mock,
            sensor_port: "/dev/ttyACM0".into(),
            modalities: Modality::ALL.to_vec(),
            dataset_root: PathBuf::from("dataset"),
            config: None,
            headless: true,
        }
    }

    #[test]
    fn every_process_gets_the_same_start() {
        let plan = plan();
        let rgb = plan.args(Modality::Rgb);
        assert_eq!(
            rgb,
            [
                "--name", "alice", "--stime", "09:30:10", "--duration", "60", "--root",
                "dataset", "--device", "1", "--headless"
            ]
        );
        let thermal = plan.args(Modality::Thermal);
        assert_eq!(&thermal[..8], &rgb[..8]);
        assert_eq!(&thermal[8..10], ["--device", "2"]);
        let vernier = plan.args(Modality::Vernier);
        assert_eq!(
            &vernier[8..],
            ["--conn", "mock", "--port", "/dev/ttyACM0", "--fps", "20"]
        );
    }

    #[test]
    fn start_inside_guard_is_refused() {
        let plan = plan();
        let clock = ManualClock::new(plan.start - chrono::TimeDelta::seconds(3));
        assert!(matches!(
            plan.validate(Duration::from_secs(4), &clock),
            Err(Error::InvalidSchedule(_))
        ));
        clock.set(plan.start - chrono::TimeDelta::seconds(10));
        assert!(plan.validate(Duration::from_secs(4), &clock).is_ok());
    }

    #[tokio::test]
    async fn missing_binaries_fail_their_own_modality() {
        let empty = tempfile::tempdir().unwrap();
        let outcomes = plan().run(empty.path()).await;
        assert_eq!(outcomes.len(), 3);
        for outcome in outcomes {
            assert!(!outcome.succeeded());
            assert!(matches!(outcome.status, Err(Error::Io(_))));
        }
    }
}
