use std::fmt::Debug;

use tracing::{debug, info};
use v4l::{
    buffer::Type,
    frameinterval::FrameIntervalEnum,
    framesize::FrameSizeEnum,
    io::traits::CaptureStream,
    prelude::MmapStream,
    video::{capture::Parameters, Capture},
    Device, Format, FourCC, Fraction,
};

use crate::{
    capture,
    data_saver::{JpegFrame, ThermalFrame},
    Error, Result,
};

#[derive(Debug, Clone, Copy)]
pub struct CameraSetting {
    pub format: FourCC,
    pub width: u32,
    pub height: u32,
    /// `None` takes whatever interval the device offers for the size.
    pub fps: Option<u32>,
}

impl CameraSetting {
    pub fn mjpeg(width: u32, height: u32, fps: u32) -> Self {
        Self {
            format: FourCC::new(b"MJPG"),
            width,
            height,
            fps: Some(fps),
        }
    }

    pub fn y16(width: u32, height: u32) -> Self {
        Self {
            format: FourCC::new(b"Y16 "),
            width,
            height,
            fps: None,
        }
    }
}

pub struct Camera<'a> {
    name: String,
    stream: MmapStream<'a>,
    fps: u32,
    width: u32,
    height: u32,
    format: FourCC,
}

impl Debug for Camera<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Camera")
            .field("name", &self.name)
            .field("fps", &self.fps)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format.to_string())
            .finish()
    }
}

impl Camera<'_> {
    pub fn new_with_path(path: &str, setting: CameraSetting) -> Result<Self> {
        let dev = Device::with_path(path)
            .map_err(|e| Error::DeviceUnavailable(format!("camera {path} ({e})")))?;
        Self::new_from_device(path.to_string(), dev, setting)
    }

    pub fn new(index: usize, setting: CameraSetting) -> Result<Self> {
        let dev = Device::new(index)
            .map_err(|e| Error::DeviceUnavailable(format!("camera {index} ({e})")))?;
        Self::new_from_device(format!("/dev/video{index}"), dev, setting)
    }

    fn new_from_device(name: String, device: Device, setting: CameraSetting) -> Result<Self> {
        let unavailable = |what: &str, e: std::io::Error| {
            Error::DeviceUnavailable(format!("camera {name} ({what}: {e})"))
        };
        let mut choosed = None;
        for format in device
            .enum_formats()
            .map_err(|e| unavailable("enum formats", e))?
        {
            if format.fourcc != setting.format {
                continue;
            }
            for frame_size in device
                .enum_framesizes(format.fourcc)
                .map_err(|e| unavailable("enum framesizes", e))?
            {
                let FrameSizeEnum::Discrete(size) = frame_size.size else {
                    continue;
                };
                if size.width != setting.width || size.height != setting.height {
                    continue;
                }
                for fi in device
                    .enum_frameintervals(format.fourcc, size.width, size.height)
                    .map_err(|e| unavailable("enum frameintervals", e))?
                {
                    if let FrameIntervalEnum::Discrete(fraction) = fi.interval {
                        if setting.fps.map_or(true, |fps| fraction.denominator == fps) {
                            choosed = Some(fraction);
                        }
                    }
                }
            }
        }

        let Some(interval) = choosed else {
            // the device is there, just not in the mode asked for
            return Err(Error::DeviceUnavailable(format!(
                "camera {name} offering {} {}x{}{}",
                setting.format,
                setting.width,
                setting.height,
                setting.fps.map(|f| format!("@{f}")).unwrap_or_default()
            )));
        };

        let real_format = device
            .set_format(&Format::new(setting.width, setting.height, setting.format))
            .map_err(|e| unavailable("set format", e))?;
        let real_params = device
            .set_params(&Parameters::new(Fraction::new(
                interval.numerator,
                interval.denominator,
            )))
            .map_err(|e| unavailable("set params", e))?;
        let stream = MmapStream::new(&device, Type::VideoCapture)
            .map_err(|e| unavailable("mmap stream", e))?;
        let cam = Camera {
            name,
            stream,
            fps: real_params.interval.denominator / real_params.interval.numerator.max(1),
            format: real_format.fourcc,
            width: real_format.width,
            height: real_format.height,
        };
        info!(camera = ?cam, "camera configured");
        Ok(cam)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn capture_raw(&mut self) -> Result<&[u8]> {
        let (raw, meta) = self
            .stream
            .next()
            .map_err(|e| Error::read(&self.name, e))?;
        debug!(sequence = meta.sequence, bytes = raw.len(), "frame");
        Ok(raw)
    }
}

/// Webcam streaming MJPEG. Frames are kept as the camera compressed them.
pub struct RgbCamera<'a>(pub Camera<'a>);

impl capture::Device for RgbCamera<'_> {
    type Sample = JpegFrame;

    fn name(&self) -> &str {
        &self.0.name
    }

    fn read(&mut self) -> Result<JpegFrame> {
        Ok(JpegFrame(self.0.capture_raw()?.to_vec()))
    }
}

/// Radiometric camera streaming 16-bit greyscale.
pub struct ThermalCamera<'a>(pub Camera<'a>);

impl capture::Device for ThermalCamera<'_> {
    type Sample = ThermalFrame;

    fn name(&self) -> &str {
        &self.0.name
    }

    fn read(&mut self) -> Result<ThermalFrame> {
        let (width, height) = (self.0.width as usize, self.0.height as usize);
        let name = self.0.name.clone();
        let raw = self.0.capture_raw()?;
        ThermalFrame::from_y16(raw, width, height)
            .ok_or_else(|| Error::read(name, format!("short Y16 frame of {} bytes", raw.len())))
    }
}
