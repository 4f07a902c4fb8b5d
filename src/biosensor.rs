//! Respiration belt and ECG sensors.
//!
//! Two ways in: a USB serial bridge that prints one comma-separated line of
//! channel values per sample, and a synthetic source for dry runs.

use std::{
    fmt,
    io::{BufRead, BufReader, Write},
    str::FromStr,
    time::Duration,
};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serialport::{ClearBuffer, SerialPort};
use tracing::{debug, info};

use crate::{
    capture::Device,
    data_saver::SensorReading,
    schedule::{to_delta, Clock},
    Error, Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorConnection {
    Usb,
    Ble,
    Mock,
}

impl FromStr for SensorConnection {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "usb" => Ok(Self::Usb),
            "ble" => Ok(Self::Ble),
            "mock" => Ok(Self::Mock),
            other => Err(format!("unknown connection '{other}', expected usb, ble or mock")),
        }
    }
}

impl fmt::Display for SensorConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Usb => "usb",
            Self::Ble => "ble",
            Self::Mock => "mock",
        })
    }
}

/// Channel picks are 1-based indices into the values of each line.
#[derive(Debug, Clone)]
pub struct SensorSetting {
    pub period: Duration,
    pub channels: Vec<usize>,
}

impl SensorSetting {
    pub fn from_rate(samples_per_sec: u32, channels: Vec<usize>) -> Self {
        Self {
            period: Duration::from_nanos(1_000_000_000 / samples_per_sec.max(1) as u64),
            channels,
        }
    }

    fn select(&self, values: Vec<f64>) -> Option<Vec<f64>> {
        if self.channels.is_empty() {
            return Some(values);
        }
        self.channels
            .iter()
            .map(|&ch| ch.checked_sub(1).and_then(|i| values.get(i)).copied())
            .collect()
    }
}

fn parse_line(line: &str) -> Option<Vec<f64>> {
    line.trim()
        .split(',')
        .map(|v| v.trim().parse::<f64>().ok())
        .collect()
}

/// The bridge is only told to stream on the first read, which the session
/// makes once its wait is over. Anything it sent before then is dropped.
pub struct SerialSensor {
    name: String,
    setting: SensorSetting,
    reader: BufReader<Box<dyn SerialPort>>,
    line: String,
    streaming: bool,
}

impl SerialSensor {
    pub fn open(path: &str, baud_rate: u32, setting: SensorSetting) -> Result<Self> {
        let port = serialport::new(path, baud_rate)
            .timeout(Duration::from_secs(2))
            .open()
            .map_err(|e| Error::DeviceUnavailable(format!("sensor on {path} ({e})")))?;
        info!(port = path, baud_rate, "sensor port open");
        Ok(Self::from_port(path, port, setting))
    }

    pub fn from_port(name: &str, port: Box<dyn SerialPort>, setting: SensorSetting) -> Self {
        Self {
            name: name.to_string(),
            setting,
            reader: BufReader::new(port),
            line: String::new(),
            streaming: false,
        }
    }

    fn start_streaming(&mut self) -> Result<()> {
        self.reader
            .get_ref()
            .clear(ClearBuffer::Input)
            .map_err(|e| Error::read(&self.name, e))?;
        let period_ms = self.setting.period.as_millis();
        self.command(&format!("start {period_ms}"))?;
        self.streaming = true;
        info!(port = %self.name, period_ms, "sensor streaming");
        Ok(())
    }

    fn command(&mut self, cmd: &str) -> Result<()> {
        let port = self.reader.get_mut();
        port.write_all(cmd.as_bytes())?;
        port.write_all(b"\n")?;
        port.flush()?;
        Ok(())
    }
}

impl Device for SerialSensor {
    type Sample = SensorReading;

    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self) -> Result<SensorReading> {
        if !self.streaming {
            self.start_streaming()?;
        }
        loop {
            self.line.clear();
            let n = self
                .reader
                .read_line(&mut self.line)
                .map_err(|e| Error::read(&self.name, e))?;
            if n == 0 {
                return Err(Error::read(&self.name, "stream closed"));
            }
            if self.line.trim().is_empty() {
                continue;
            }
            let values = parse_line(&self.line)
                .ok_or_else(|| Error::read(&self.name, format!("bad line '{}'", self.line.trim())))?;
            let values = self.setting.select(values).ok_or_else(|| {
                Error::read(&self.name, format!("missing channel in '{}'", self.line.trim()))
            })?;
            return Ok(SensorReading(values));
        }
    }

    fn release(&mut self) -> Result<()> {
        if !self.streaming {
            return Ok(());
        }
        self.streaming = false;
        self.command("stop")
    }
}

/// Respiration on channel 1, ECG on channel 2, paced at the configured
/// period on the session clock.
pub struct MockSensor<C> {
    clock: C,
    setting: SensorSetting,
    origin: Option<NaiveDateTime>,
    n: u64,
}

const BREATHS_PER_SEC: f64 = 0.25;
const BEATS_PER_SEC: f64 = 1.2;

impl<C: Clock> MockSensor<C> {
    pub fn new(clock: C, setting: SensorSetting) -> Self {
        Self {
            clock,
            setting,
            origin: None,
            n: 0,
        }
    }

    fn waveform(t: f64) -> Vec<f64> {
        let respiration = (t * BREATHS_PER_SEC * std::f64::consts::TAU).cos() * 2.0 + 10.0;
        let phase = (t * BEATS_PER_SEC).fract();
        let ecg = (-((phase - 0.3) / 0.08).powi(2)).exp() * 1.5 - 0.1;
        vec![respiration, ecg]
    }
}

impl<C: Clock> Device for MockSensor<C> {
    type Sample = SensorReading;

    fn name(&self) -> &str {
        "mock sensor"
    }

    fn read(&mut self) -> Result<SensorReading> {
        let origin = *self.origin.get_or_insert_with(|| self.clock.now());
        let due = origin + to_delta(self.setting.period * self.n as u32);
        crate::schedule::wait_until(&self.clock, due);
        let t = self.setting.period.as_secs_f64() * self.n as f64;
        self.n += 1;
        let values = self
            .setting
            .select(Self::waveform(t))
            .ok_or_else(|| Error::read("mock sensor", "no such channel"))?;
        if self.n % 1000 == 0 {
            debug!(n = self.n, "mock samples");
        }
        Ok(SensorReading(values))
    }
}

pub enum Sensor<C> {
    Serial(SerialSensor),
    Mock(MockSensor<C>),
}

/// Opens whichever sensor the connection names.
pub fn open_sensor<C: Clock>(
    connection: SensorConnection,
    port: &str,
    baud_rate: u32,
    setting: SensorSetting,
    clock: C,
) -> Result<Sensor<C>> {
    match connection {
        SensorConnection::Usb => Ok(Sensor::Serial(SerialSensor::open(port, baud_rate, setting)?)),
        SensorConnection::Mock => Ok(Sensor::Mock(MockSensor::new(clock, setting))),
        SensorConnection::Ble => Err(Error::DeviceUnavailable(
            "bluetooth sensor (no BLE transport in this build, pair it through a USB bridge)"
                .into(),
        )),
    }
}

impl<C: Clock> Device for Sensor<C> {
    type Sample = SensorReading;

    fn name(&self) -> &str {
        match self {
            Sensor::Serial(s) => s.name(),
            Sensor::Mock(s) => s.name(),
        }
    }

    fn read(&mut self) -> Result<SensorReading> {
        match self {
            Sensor::Serial(s) => s.read(),
            Sensor::Mock(s) => s.read(),
        }
    }

    fn release(&mut self) -> Result<()> {
        match self {
            Sensor::Serial(s) => s.release(),
            Sensor::Mock(s) => s.release(),
        }
    }
}
