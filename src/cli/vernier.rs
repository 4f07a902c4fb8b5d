use clap::Parser;
use physcap::{
    app::{exit_on_error, SessionArgs},
    biosensor::{open_sensor, SensorConnection, SensorSetting},
    data_saver::CSVFile,
    Modality, Scheduled, SystemClock,
};
use tracing::info;

/// Records respiration and ECG readings into {root}/{name}/vernier.
#[derive(Parser, Debug)]
struct Args {
    #[command(flatten)]
    session: SessionArgs,

    /// usb, ble or mock
    #[arg(long, default_value_t = SensorConnection::Usb)]
    conn: SensorConnection,

    /// Serial port of the USB bridge
    #[arg(long, default_value = "/dev/ttyACM0")]
    port: String,

    #[arg(long, default_value_t = 115_200)]
    baud: u32,

    /// Samples per second
    #[arg(long, default_value_t = 20)]
    fps: u32,

    /// 1-based channels to keep, all when empty
    #[arg(long, value_delimiter = ',')]
    channels: Vec<usize>,
}

fn main() {
    exit_on_error("capture-vernier", run);
}

fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let settings = args.session.common.settings()?;
    let spec = args.session.session_spec(
        &settings,
        Modality::Vernier,
        settings.sensor_lead(),
        &SystemClock,
    )?;
    let setting = SensorSetting::from_rate(args.fps, args.channels.clone());
    let summary = Scheduled::new(spec, SystemClock)?
        .open(
            || open_sensor(args.conn, &args.port, args.baud, setting, SystemClock),
            |subject| CSVFile::new(subject.vernier_csv()),
        )?
        .run()?;
    info!(rows = summary.count, file = %summary.output.display(), "sensor capture done");
    Ok(())
}
