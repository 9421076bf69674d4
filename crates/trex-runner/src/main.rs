use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use trex_core::{Error, ErrorKind, MiLog, Report, TrexApp};
use trex_local::{LocalFactory, SysfsDb};

/// Longest single wait, so that interrupts are noticed.
const POLL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
struct Args {
    /// Run specification (JSON or Dhall)
    spec: PathBuf,
    /// Name of this agent in interface OIDs
    #[arg(short, long, default_value = "Agt_A")]
    agent: String,
    /// Seconds to let the generator run before stopping it
    #[arg(short, long)]
    timeout: Option<f64>,
    /// Root of the sysfs tree
    #[arg(long, default_value = "/sys")]
    sysfs: PathBuf,
    /// Write the report to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();
    let db = SysfsDb::new(&args.sysfs);
    let factory = LocalFactory::new(args.agent);
    let opts = trex_utils::read_opts(&args.spec, &db)
        .with_context(|| format!("failed to read {}", args.spec.display()))?;

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .with_context(|| "failed to set interrupt handler")?;

    let mut app = TrexApp::create(&factory, &db, &opts)?;
    app.start()?;
    let deadline = args
        .timeout
        .map(|secs| Instant::now() + Duration::from_secs_f64(secs));
    run(&mut app, deadline, &running)?;

    let report = match app.get_report() {
        Ok(report) => report,
        Err(Error::PartialReport { report, source }) => {
            log::warn!("report is incomplete: {source}");
            *report
        }
        Err(e) => return Err(e.into()),
    };
    write_report(&report, args.output)?;
    let mut log = MiLog::new("trex");
    report.log_measurements(&mut log);
    log.flush();

    app.destroy()?;
    Ok(())
}

/// Waits for the generator to exit, stopping it at `deadline` or on interrupt.
fn run(app: &mut TrexApp<'_>, deadline: Option<Instant>, running: &AtomicBool) -> anyhow::Result<()> {
    loop {
        let slice = match deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()).min(POLL),
            None => POLL,
        };
        match app.wait(Some(slice)) {
            Ok(()) => return Ok(()),
            // The output of a failed run is still worth reporting.
            Err(e @ Error::ChildFailed(_)) => {
                log::error!("{e}");
                return Ok(());
            }
            Err(e) if e.kind() == ErrorKind::InProgress => {}
            Err(e) => return Err(e.into()),
        }
        let expired = deadline.map_or(false, |deadline| Instant::now() >= deadline);
        if expired || !running.load(Ordering::SeqCst) {
            log::info!("stopping generator");
            app.stop()?;
            return Ok(());
        }
    }
}

fn write_report(report: &Report, output: Option<PathBuf>) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    match output {
        Some(path) => std::fs::write(&path, json)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => println!("{json}"),
    }
    Ok(())
}
