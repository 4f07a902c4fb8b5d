mod errors;
pub use errors::{Error, Result, VerifyError};

pub mod app;
pub mod archive;
pub mod biosensor;
pub mod capture;
pub mod config;
pub mod data_saver;
pub mod dataset;
pub mod launcher;
pub mod logging;
pub mod plot;
pub mod report;
pub mod schedule;
pub mod signal;
pub mod verify;

#[cfg(feature = "camera")]
pub mod usb_camera;

#[cfg(feature = "opencv")]
pub mod preview;

pub use capture::{CaptureSession, CaptureSummary, Device, Scheduled, SessionSpec};
pub use config::Settings;
pub use dataset::{Modality, SubjectDir};
pub use schedule::{Clock, ManualClock, ScheduledWindow, SystemClock};
