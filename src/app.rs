//! Pieces shared by the command-line programs.

use std::{path::PathBuf, time::Duration};

use clap::Args;
use tracing::error;

use crate::{
    capture::SessionSpec,
    config::Settings,
    dataset::{Modality, SubjectDir},
    logging,
    schedule::{resolve_start, Clock},
    Result,
};

/// Arguments every capture program takes.
#[derive(Args, Debug, Clone)]
pub struct SessionArgs {
    /// Subject name, also the folder under the dataset root
    #[arg(short, long)]
    pub name: String,

    /// Start of the recording, HH:MM:SS today
    #[arg(short, long)]
    pub stime: Option<String>,

    /// Start this many seconds from now instead of at --stime
    #[arg(long)]
    pub cdown: Option<u64>,

    /// Recording length in seconds
    #[arg(short, long, default_value_t = 60)]
    pub duration: u64,

    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Args, Debug, Clone, Default)]
pub struct CommonArgs {
    /// Dataset root, overrides the configured one
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Settings file
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl CommonArgs {
    /// Loads settings, applies `--root`, and starts logging.
    pub fn settings(&self) -> Result<Settings> {
        let mut settings = match &self.config {
            Some(path) => Settings::load_from(path)?,
            None => Settings::load()?,
        };
        if let Some(root) = &self.root {
            settings.dataset_root = root.clone();
        }
        logging::init(&settings.log_level);
        Ok(settings)
    }
}

impl SessionArgs {
    pub fn session_spec(
        &self,
        settings: &Settings,
        modality: Modality,
        lead: Duration,
        clock: &impl Clock,
    ) -> Result<SessionSpec> {
        let start = resolve_start(self.stime.as_deref(), self.cdown, clock)?;
        Ok(SessionSpec {
            subject: SubjectDir::new(&settings.dataset_root, &self.name),
            modality,
            start,
            duration: Duration::from_secs(self.duration),
            guard: settings.guard(),
            lead,
        })
    }
}

/// Runs `run` and turns an error into a console message and exit code 1.
pub fn exit_on_error(program: &str, run: impl FnOnce() -> anyhow::Result<()>) {
    if let Err(e) = run() {
        error!(error = %format!("{e:#}"), "{program} failed");
        eprintln!("{program}: {e:#}");
        std::process::exit(1);
    }
}
