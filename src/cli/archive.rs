use std::path::PathBuf;

use clap::Parser;
use physcap::{
    app::{exit_on_error, CommonArgs},
    archive::archive_subject,
    SubjectDir,
};

/// Zips {root}/{subject} into {saveloc}/{subject}.zip.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    subject: String,

    /// Directory the archive is written to
    #[arg(long)]
    saveloc: PathBuf,

    #[command(flatten)]
    common: CommonArgs,
}

fn main() {
    exit_on_error("archive-subject", run);
}

fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let settings = args.common.settings()?;
    let subject = SubjectDir::new(&settings.dataset_root, &args.subject);
    let out = archive_subject(&subject, &args.saveloc)?;
    println!("{}", out.display());
    Ok(())
}
