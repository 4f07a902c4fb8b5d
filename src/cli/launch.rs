use std::time::Duration;

use anyhow::bail;
use clap::Parser;
use physcap::{
    app::{exit_on_error, CommonArgs},
    biosensor::SensorConnection,
    launcher::{sibling_bin_dir, LaunchPlan},
    schedule::{format_time_of_day, resolve_start},
    Modality, SystemClock,
};
use tracing::{info, warn};

/// Starts every capture program against one shared start time and waits for
/// them all.
#[derive(Parser, Debug)]
struct Args {
    #[arg(short, long)]
    name: String,

    /// Start of the recording, HH:MM:SS today, used when --cdown is 0
    #[arg(short, long)]
    stime: Option<String>,

    /// Start this many seconds from now
    #[arg(long, default_value_t = 10)]
    cdown: u64,

    #[arg(short, long, default_value_t = 60)]
    duration: u64,

    #[arg(long, default_value_t = 2)]
    devicethermal: usize,

    #[arg(long, default_value_t = 1)]
    devicergb: usize,

    /// Biosensor samples per second
    #[arg(long, default_value_t = 20)]
    dps: u32,

    #[arg(long, default_value_t = SensorConnection::Usb)]
    conn: SensorConnection,

    #[arg(long, default_value = "/dev/ttyACM0")]
    port: String,

    /// Modalities to record
    #[arg(long, value_delimiter = ',', default_values_t = Modality::ALL)]
    only: Vec<Modality>,

    /// Ask the camera programs not to open preview windows
    #[arg(long)]
    headless: bool,

    #[command(flatten)]
    common: CommonArgs,
}

fn main() {
    exit_on_error("capture-all", run);
}

fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let settings = args.common.settings()?;
    let start = resolve_start(args.stime.as_deref(), Some(args.cdown), &SystemClock)?;
    let plan = LaunchPlan {
        subject: args.name,
        start,
        duration: Duration::from_secs(args.duration),
        rgb_device: args.devicergb,
        thermal_device: args.devicethermal,
        sensor_rate: args.dps,
        connection: args.conn,
        sensor_port: args.port,
        modalities: args.only,
        dataset_root: settings.dataset_root.clone(),
        config: args.common.config,
        // no windows to open in a build without opencv
        headless: args.headless || !cfg!(feature = "opencv"),
    };
    plan.validate(settings.guard(), &SystemClock)?;
    info!(start = %format_time_of_day(start), subject = %plan.subject, "launching captures");

    let bin_dir = sibling_bin_dir()?;
    let outcomes = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(plan.run(&bin_dir));

    let failed: Vec<String> = outcomes
        .iter()
        .filter(|o| !o.succeeded())
        .map(|o| o.modality.to_string())
        .collect();
    for outcome in &outcomes {
        if let Err(e) = &outcome.status {
            warn!(modality = %outcome.modality, error = %e, "not recorded");
        }
    }
    if !failed.is_empty() {
        bail!("capture failed for {}", failed.join(", "));
    }
    info!("all captures finished");
    Ok(())
}
