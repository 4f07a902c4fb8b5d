use std::{io, path::PathBuf};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0} not found")]
    DeviceUnavailable(String),

    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("error reading from {device}: {reason}")]
    DeviceRead { device: String, reason: String },

    #[error("{0}")]
    Verification(#[from] VerifyError),

    #[error("'{0}' support is not compiled in, rebuild with --features {0}")]
    FeatureNotEnabled(&'static str),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Figment(#[from] Box<figment::Error>),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),

    #[error(transparent)]
    Walk(#[from] walkdir::Error),

    #[cfg(feature = "opencv")]
    #[error(transparent)]
    OpenCV(#[from] opencv::Error),

    #[cfg(feature = "opencv")]
    #[error("jpeg decode: {0:?}")]
    JPEGDecoder(zune_jpeg::errors::DecodeErrors),
}

/// Reasons a single modality fails verification. Each one is fatal for that
/// modality only.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("no samples found in {0}")]
    EmptySource(PathBuf),

    #[error("cannot read a sequence number and timestamp from {0}")]
    BadFileName(PathBuf),

    #[error("{path}: row {row}: {reason}")]
    BadRow {
        path: PathBuf,
        row: usize,
        reason: String,
    },

    #[error("first and last sample of {0} share a timestamp")]
    ZeroDuration(PathBuf),
}

impl Error {
    pub fn read(device: impl Into<String>, reason: impl ToString) -> Self {
        Error::DeviceRead {
            device: device.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<figment::Error> for Error {
    fn from(value: figment::Error) -> Self {
        Error::Figment(Box::new(value))
    }
}

#[cfg(feature = "opencv")]
impl From<zune_jpeg::errors::DecodeErrors> for Error {
    fn from(value: zune_jpeg::errors::DecodeErrors) -> Self {
        Error::JPEGDecoder(value)
    }
}
