use clap::Parser;
use physcap::{
    app::{exit_on_error, SessionArgs},
    capture::{check_preview, NoPreview, Preview},
    data_saver::{FrameFiles, JpegFrame},
    usb_camera::{Camera, CameraSetting, RgbCamera},
    Modality, Scheduled, SystemClock,
};
use tracing::info;

/// Records MJPEG frames from a webcam into {root}/{name}/rgb.
#[derive(Parser, Debug)]
struct Args {
    #[command(flatten)]
    session: SessionArgs,

    /// V4L device index
    #[arg(long, default_value_t = 1)]
    device: usize,

    #[arg(long, default_value_t = 1280)]
    width: u32,

    #[arg(long, default_value_t = 720)]
    height: u32,

    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// No preview window
    #[arg(long)]
    headless: bool,
}

fn main() {
    exit_on_error("capture-rgb", run);
}

fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let settings = args.session.common.settings()?;
    let spec = args.session.session_spec(
        &settings,
        Modality::Rgb,
        settings.camera_lead(),
        &SystemClock,
    )?;
    let setting = CameraSetting::mjpeg(args.width, args.height, args.fps);
    let summary = Scheduled::new(spec, SystemClock)?
        .open(
            || Ok(RgbCamera(Camera::new(args.device, setting)?)),
            |subject| FrameFiles::<JpegFrame>::create(subject.modality_dir(Modality::Rgb)),
        )?
        .with_preview(preview(args.headless)?)
        .run()?;
    info!(frames = summary.count, dir = %summary.output.display(), "rgb capture done");
    Ok(())
}

fn preview(headless: bool) -> physcap::Result<Box<dyn Preview<JpegFrame>>> {
    check_preview(headless)?;
    #[cfg(feature = "opencv")]
    {
        if !headless {
            return Ok(Box::new(physcap::preview::RgbWindow::new("PreviewRGB")?));
        }
    }
    Ok(Box::new(NoPreview))
}
