//! OpenCV windows shown while capturing. Pressing `q` ends the session.

use opencv::{
    core::{no_array, Mat, NORM_MINMAX, CV_16UC1, CV_8U, CV_8UC3},
    highgui,
    imgproc::{cvt_color_def, COLOR_RGB2BGR},
    prelude::*,
};
use zune_jpeg::JpegDecoder;

use crate::{
    capture::{Preview, PreviewEvent},
    data_saver::{JpegFrame, ThermalFrame},
    Result,
};

const QUIT_KEY: char = 'q';

fn open_window(name: &str) -> Result<()> {
    highgui::named_window(name, highgui::WINDOW_NORMAL)?;
    Ok(())
}

fn show_and_poll(name: &str, img: &Mat) -> Result<PreviewEvent> {
    highgui::imshow(name, img)?;
    let code = highgui::wait_key(1)?;
    Ok(match char::from_u32(code as u32) {
        Some(QUIT_KEY) => PreviewEvent::Quit,
        _ => PreviewEvent::Continue,
    })
}

pub struct RgbWindow {
    name: String,
    rgb_buffer: Vec<u8>,
    bgr_mat: Mat,
}

impl RgbWindow {
    pub fn new(name: &str) -> Result<Self> {
        open_window(name)?;
        Ok(Self {
            name: name.to_string(),
            rgb_buffer: vec![],
            bgr_mat: Mat::default(),
        })
    }
}

impl Preview<JpegFrame> for RgbWindow {
    fn show(&mut self, frame: &JpegFrame) -> Result<PreviewEvent> {
        let mut decoder = JpegDecoder::new(frame.0.as_slice());
        decoder.decode_headers()?;
        let Some((width, height)) = decoder.dimensions() else {
            return Ok(PreviewEvent::Continue);
        };
        self.rgb_buffer.resize(width * height * 3, 0);
        decoder.decode_into(&mut self.rgb_buffer)?;
        let rgb_img = unsafe {
            Mat::new_rows_cols_with_data_unsafe_def(
                height as i32,
                width as i32,
                CV_8UC3,
                self.rgb_buffer.as_mut_ptr() as *mut _,
            )
        }?;
        cvt_color_def(&rgb_img, &mut self.bgr_mat, COLOR_RGB2BGR)?;
        show_and_poll(&self.name, &self.bgr_mat)
    }

    fn close(&mut self) {
        let _ = highgui::destroy_window(&self.name);
    }
}

/// Min-max stretched to 8 bits for display. The frame itself is untouched.
pub struct ThermalWindow {
    name: String,
    pixels: Vec<u16>,
    img_8bit: Mat,
}

impl ThermalWindow {
    pub fn new(name: &str) -> Result<Self> {
        open_window(name)?;
        Ok(Self {
            name: name.to_string(),
            pixels: vec![],
            img_8bit: Mat::default(),
        })
    }
}

impl Preview<ThermalFrame> for ThermalWindow {
    fn show(&mut self, frame: &ThermalFrame) -> Result<PreviewEvent> {
        let (rows, cols) = frame.0.shape();
        self.pixels.clear();
        // nalgebra is column-major, opencv wants rows
        self.pixels.extend(frame.0.transpose().iter().copied());
        let raw = unsafe {
            Mat::new_rows_cols_with_data_unsafe_def(
                rows as i32,
                cols as i32,
                CV_16UC1,
                self.pixels.as_mut_ptr() as *mut _,
            )
        }?;
        opencv::core::normalize(
            &raw,
            &mut self.img_8bit,
            0.,
            255.,
            NORM_MINMAX,
            CV_8U,
            &no_array(),
        )?;
        show_and_poll(&self.name, &self.img_8bit)
    }

    fn close(&mut self) {
        let _ = highgui::destroy_window(&self.name);
    }
}
