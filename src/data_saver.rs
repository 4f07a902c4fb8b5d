use std::{
    fs::{self, File},
    io::BufWriter,
    marker::PhantomData,
    path::{Path, PathBuf},
};

use chrono::NaiveDateTime;
use nalgebra::DMatrix;

use crate::{
    dataset::{frame_file_name, ROW_TIME_FORMAT},
    Result,
};

/// Where accepted samples go. A capture session calls `record` once per
/// accepted sample, in order, and `end` once after the loop exits normally.
pub trait DataFile {
    type Data;
    fn record(&mut self, sequence: u64, time_stamp: NaiveDateTime, data: &Self::Data)
        -> Result<()>;
    /// Finishes persistence and returns the directory or file written to.
    fn end(&mut self) -> Result<PathBuf>;
}

/// A sample that is stored as a file of its own.
pub trait FrameData {
    const EXTENSION: &'static str;
    fn save(&self, path: &Path) -> Result<()>;
}

/// Compressed frame straight from an MJPEG stream.
#[derive(Debug, Clone)]
pub struct JpegFrame(pub Vec<u8>);

impl FrameData for JpegFrame {
    const EXTENSION: &'static str = "jpg";

    fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, &self.0)?;
        Ok(())
    }
}

/// Raw radiometric counts, one entry per pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct ThermalFrame(pub DMatrix<u16>);

impl ThermalFrame {
    /// Builds a frame from little-endian `Y16` bytes in row-major order.
    pub fn from_y16(bytes: &[u8], width: usize, height: usize) -> Option<Self> {
        if bytes.len() < width * height * 2 {
            return None;
        }
        let pixels = bytes
            .chunks_exact(2)
            .take(width * height)
            .map(|px| u16::from_le_bytes([px[0], px[1]]));
        Some(Self(DMatrix::from_row_iterator(height, width, pixels)))
    }
}

impl FrameData for ThermalFrame {
    const EXTENSION: &'static str = "csv";

    fn save(&self, path: &Path) -> Result<()> {
        let mut wtr = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(BufWriter::new(File::create(path)?));
        for row in self.0.row_iter() {
            wtr.write_record(row.iter().map(|v| v.to_string()))?;
        }
        wtr.flush()?;
        Ok(())
    }
}

/// One file per frame, named `{sequence}_{timestamp}.{ext}`.
pub struct FrameFiles<FD> {
    dir: PathBuf,
    _p: PhantomData<FD>,
}

impl<FD: FrameData> FrameFiles<FD> {
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            _p: PhantomData,
        })
    }
}

impl<FD: FrameData> DataFile for FrameFiles<FD> {
    type Data = FD;

    fn record(&mut self, sequence: u64, time_stamp: NaiveDateTime, data: &FD) -> Result<()> {
        let path = self
            .dir
            .join(frame_file_name(sequence, time_stamp, FD::EXTENSION));
        data.save(&path)
    }

    fn end(&mut self) -> Result<PathBuf> {
        Ok(self.dir.clone())
    }
}

/// One reading from a multi-channel sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading(pub Vec<f64>);

/// Whole-session table kept in memory and written out once at the end.
/// Rows are `timestamp, channel_1, ..., channel_n` without a header.
pub struct CSVFile {
    path: PathBuf,
    rows: Vec<(NaiveDateTime, SensorReading)>,
}

impl CSVFile {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Self { path, rows: vec![] })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl DataFile for CSVFile {
    type Data = SensorReading;

    fn record(&mut self, _sequence: u64, time_stamp: NaiveDateTime, data: &SensorReading) -> Result<()> {
        self.rows.push((time_stamp, data.clone()));
        Ok(())
    }

    fn end(&mut self) -> Result<PathBuf> {
        let f = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)?;
        let mut wtr = csv::WriterBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_writer(BufWriter::new(f));
        for (time_stamp, reading) in self.rows.drain(..) {
            let mut record = Vec::with_capacity(reading.0.len() + 1);
            record.push(time_stamp.format(ROW_TIME_FORMAT).to_string());
            record.extend(reading.0.iter().map(|v| format!("{v:.20}")));
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(self.path.clone())
    }
}
