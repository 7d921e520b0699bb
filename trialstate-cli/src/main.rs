//! Trialstate CLI Application
//!
//! Runs an experiment session described in TOML against a simulated
//! participant. It uses the trialstate library and adds:
//! - Session files (state tree, variables, scripted input)
//! - Built-in functions for `func` states
//! - JSON-lines output of every log record
//! - A run summary

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use trialstate::{Clock, ManualClock, ScriptedHost};

mod callbacks;
mod config;
mod events;
mod report;
mod tree;

use report::{JsonLinesSink, SessionReport, TracePresenter};

/// Trialstate - Run hierarchical experiment sessions
#[derive(Parser, Debug)]
#[command(name = "trialstate-cli")]
#[command(about = "Run a TOML experiment session against scripted input", long_about = None)]
#[command(version)]
struct Args {
    /// Path to the session file (session.toml)
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Output file for log records (default: <session>_<timestamp>.jsonl)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Also write the run summary as JSON
    #[arg(long, value_name = "FILE")]
    summary: Option<PathBuf>,

    /// Stop with an error after this many ticks
    #[arg(long, value_name = "COUNT")]
    max_ticks: Option<u64>,

    /// Override the session frame rate
    #[arg(long, value_name = "HZ")]
    frame_rate: Option<f64>,

    /// Sleep one frame period per frame
    #[arg(long)]
    realtime: bool,

    /// Verbosity level (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    log::info!("Trialstate CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using engine library v{}", trialstate::VERSION);

    let report = run_session(&args)?;
    if !args.quiet {
        report.print();
    }
    Ok(())
}

fn default_output(session: &str) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    PathBuf::from(format!("{}_{}.jsonl", session, stamp))
}

fn run_session(args: &Args) -> Result<SessionReport> {
    log::info!("Loading session from: {:?}", args.config);
    let mut session = config::load_config(&args.config)?;
    if let Some(limit) = args.max_ticks {
        session.engine.max_ticks = Some(limit);
    }
    if let Some(rate) = args.frame_rate {
        anyhow::ensure!(rate > 0.0, "--frame-rate must be positive, got {}", rate);
        session.session.frame_rate = rate;
    }
    let realtime = args.realtime || session.session.realtime;

    let builder = tree::build_session(&session)?;
    let timeline = events::timeline(&session.events).context("Invalid scripted event")?;
    log::debug!("{} scripted events", timeline.len());

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_output(&session.session.name));
    let sink = JsonLinesSink::new(create_output(&output)?);

    let clock = ManualClock::new();
    let mut experiment = builder
        .build(Clock::manual(&clock))?
        .with_config(session.engine.clone())
        .with_sink(sink.clone())
        .with_presenter(TracePresenter);
    let mut host = ScriptedHost::new(clock, session.session.frame_rate)
        .with_events(timeline)
        .with_pacing(realtime);

    println!("═══════════════════════════════════════════════════════");
    println!("  Session: {}", session.session.name);
    println!("═══════════════════════════════════════════════════════\n");

    let outcome = experiment.run(&mut host);
    let records = sink.finish()?;
    log::info!("Wrote {} log records to {:?}", records, output);
    let summary = outcome.with_context(|| format!("Session `{}` failed", session.session.name))?;

    let report = SessionReport::new(
        &session.session.name,
        &summary,
        host.frames(),
        records,
        host.remaining_events(),
    );
    if let Some(path) = &args.summary {
        let file = create_output(path)?;
        serde_json::to_writer_pretty(file, &report)
            .with_context(|| format!("Failed to write summary: {:?}", path))?;
    }
    Ok(report)
}

fn create_output(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    Ok(BufWriter::new(file))
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
