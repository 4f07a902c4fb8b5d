//! Time-series plots for the verifier.
//!
//! Layout math is plain code. Drawing needs the `opencv` feature; without it
//! [`save_series_plot`] logs a warning and writes nothing.

use std::path::{Path, PathBuf};

#[cfg(not(feature = "opencv"))]
use tracing::warn;

use crate::Result;

pub const PLOT_WIDTH: i32 = 1200;
pub const PLOT_HEIGHT: i32 = 400;
const MARGIN: i32 = 40;

/// Linear map from a data range onto a pixel range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scale {
    lo: f64,
    hi: f64,
    px_lo: f64,
    px_hi: f64,
}

impl Scale {
    /// A flat range is widened by one unit on each side.
    pub fn new(lo: f64, hi: f64, px_lo: i32, px_hi: i32) -> Self {
        let (lo, hi) = if hi > lo { (lo, hi) } else { (lo - 1.0, lo + 1.0) };
        Self {
            lo,
            hi,
            px_lo: px_lo as f64,
            px_hi: px_hi as f64,
        }
    }

    pub fn fit(values: &[f64], px_lo: i32, px_hi: i32) -> Self {
        let (lo, hi) = values
            .iter()
            .filter(|v| v.is_finite())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        if lo.is_finite() {
            Self::new(lo, hi, px_lo, px_hi)
        } else {
            Self::new(0.0, 1.0, px_lo, px_hi)
        }
    }

    pub fn to_px(&self, value: f64) -> i32 {
        let t = (value - self.lo) / (self.hi - self.lo);
        (self.px_lo + t * (self.px_hi - self.px_lo)).round() as i32
    }
}

/// Pixel coordinates of `(x, y)` points on a `PLOT_WIDTH` x `PLOT_HEIGHT`
/// canvas. The y axis is flipped so larger values sit higher.
pub fn layout(xs: &[f64], ys: &[f64]) -> Vec<(i32, i32)> {
    let sx = Scale::fit(xs, MARGIN, PLOT_WIDTH - MARGIN);
    let sy = Scale::fit(ys, PLOT_HEIGHT - MARGIN, MARGIN);
    xs.iter()
        .zip(ys)
        .map(|(&x, &y)| (sx.to_px(x), sy.to_px(y)))
        .collect()
}

pub struct SeriesPlot<'a> {
    pub title: String,
    pub xs: &'a [f64],
    pub ys: &'a [f64],
    /// Indices into `xs`/`ys` to mark.
    pub markers: &'a [usize],
}

/// Returns the written path, or `None` when plotting is not compiled in.
pub fn save_series_plot(path: &Path, plot: &SeriesPlot) -> Result<Option<PathBuf>> {
    #[cfg(feature = "opencv")]
    {
        render::write_png(path, plot)?;
        Ok(Some(path.to_path_buf()))
    }
    #[cfg(not(feature = "opencv"))]
    {
        warn!(
            path = %path.display(),
            title = %plot.title,
            "plotting needs the opencv feature, skipped"
        );
        Ok(None)
    }
}

#[cfg(feature = "opencv")]
mod render {
    use std::path::Path;

    use opencv::{
        core::{Mat, Point, Scalar, Vector, CV_8UC3},
        imgcodecs, imgproc,
        prelude::*,
    };
    use tracing::info;

    use super::{layout, SeriesPlot, MARGIN, PLOT_HEIGHT, PLOT_WIDTH};
    use crate::Result;

    pub fn write_png(path: &Path, plot: &SeriesPlot) -> Result<()> {
        let mut img = Mat::new_rows_cols_with_default(
            PLOT_HEIGHT,
            PLOT_WIDTH,
            CV_8UC3,
            Scalar::all(255.),
        )?;
        let axis = Scalar::new(0., 0., 0., 0.);
        let trace = Scalar::new(180., 90., 20., 0.);
        let mark = Scalar::new(0., 0., 220., 0.);

        imgproc::line(
            &mut img,
            Point::new(MARGIN, PLOT_HEIGHT - MARGIN),
            Point::new(PLOT_WIDTH - MARGIN, PLOT_HEIGHT - MARGIN),
            axis,
            1,
            imgproc::LINE_8,
            0,
        )?;
        imgproc::line(
            &mut img,
            Point::new(MARGIN, MARGIN),
            Point::new(MARGIN, PLOT_HEIGHT - MARGIN),
            axis,
            1,
            imgproc::LINE_8,
            0,
        )?;

        let points = layout(plot.xs, plot.ys);
        for pair in points.windows(2) {
            imgproc::line(
                &mut img,
                Point::new(pair[0].0, pair[0].1),
                Point::new(pair[1].0, pair[1].1),
                trace,
                1,
                imgproc::LINE_AA,
                0,
            )?;
        }
        for &i in plot.markers {
            if let Some(&(x, y)) = points.get(i) {
                imgproc::draw_marker(
                    &mut img,
                    Point::new(x, y),
                    mark,
                    imgproc::MARKER_TRIANGLE_DOWN,
                    12,
                    2,
                    imgproc::LINE_8,
                )?;
            }
        }
        imgproc::put_text(
            &mut img,
            &plot.title,
            Point::new(MARGIN, MARGIN - 12),
            imgproc::FONT_HERSHEY_SIMPLEX,
            0.6,
            axis,
            1,
            imgproc::LINE_AA,
            false,
        )?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        imgcodecs::imwrite(&path.to_string_lossy(), &img, &Vector::new())?;
        info!(path = %path.display(), "plot written");
        Ok(())
    }
}
