use anyhow::bail;
use clap::Parser;
use physcap::{
    app::{exit_on_error, CommonArgs},
    verify::Verifier,
    SubjectDir,
};
use tracing::info;

/// Checks sample counts and rates of a recorded subject and appends the
/// results to its report.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    subject: String,

    #[command(flatten)]
    common: CommonArgs,
}

fn main() {
    exit_on_error("verify-dataset", run);
}

fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let settings = args.common.settings()?;
    let subject = SubjectDir::new(&settings.dataset_root, &args.subject);
    let report = Verifier::new(subject.clone(), &settings).run()?;

    print!("{}", std::fs::read_to_string(subject.report_path())?);
    for outcome in &report.outcomes {
        for plot in &outcome.plots {
            info!(source = %outcome.source, plot = %plot.display(), "plot saved");
        }
    }
    let mut problems: Vec<String> = report
        .outcomes
        .iter()
        .filter(|o| !o.passed())
        .map(|o| o.source.clone())
        .collect();
    if report.alignment.as_ref().is_some_and(|a| !a.passed()) {
        problems.push("start skew over tolerance".to_string());
    }
    if !problems.is_empty() {
        bail!("verification failed: {}", problems.join(", "));
    }
    info!(subject = %args.subject, "all checks passed");
    Ok(())
}
