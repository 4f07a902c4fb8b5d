use clap::Parser;
use physcap::{
    app::{exit_on_error, SessionArgs},
    capture::{check_preview, NoPreview, Preview},
    data_saver::{FrameFiles, ThermalFrame},
    usb_camera::{Camera, CameraSetting, ThermalCamera},
    Modality, Scheduled, SystemClock,
};
use tracing::info;

/// Records raw Y16 frames from a radiometric camera into {root}/{name}/thermal.
#[derive(Parser, Debug)]
struct Args {
    #[command(flatten)]
    session: SessionArgs,

    /// V4L device index
    #[arg(long, default_value_t = 2)]
    device: usize,

    #[arg(long, default_value_t = 160)]
    width: u32,

    #[arg(long, default_value_t = 120)]
    height: u32,

    /// Frame rate to ask for, any offered rate when left out
    #[arg(long)]
    fps: Option<u32>,

    /// No preview window
    #[arg(long)]
    headless: bool,
}

fn main() {
    exit_on_error("capture-thermal", run);
}

fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let settings = args.session.common.settings()?;
    let spec = args.session.session_spec(
        &settings,
        Modality::Thermal,
        settings.camera_lead(),
        &SystemClock,
    )?;
    let setting = CameraSetting {
        fps: args.fps,
        ..CameraSetting::y16(args.width, args.height)
    };
    let summary = Scheduled::new(spec, SystemClock)?
        .open(
            || Ok(ThermalCamera(Camera::new(args.device, setting)?)),
            |subject| FrameFiles::<ThermalFrame>::create(subject.modality_dir(Modality::Thermal)),
        )?
        .with_preview(preview(args.headless)?)
        .run()?;
    info!(frames = summary.count, dir = %summary.output.display(), "thermal capture done");
    Ok(())
}

fn preview(headless: bool) -> physcap::Result<Box<dyn Preview<ThermalFrame>>> {
    check_preview(headless)?;
    #[cfg(feature = "opencv")]
    {
        if !headless {
            return Ok(Box::new(physcap::preview::ThermalWindow::new("PreviewThermal")?));
        }
    }
    Ok(Box::new(NoPreview))
}
