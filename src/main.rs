use anyhow::{bail, Context, Result};
use clap::Parser;
use fs_rr::cli::{Cli, Command};
use fs_rr::trace::{convert, StringTable, TraceFormat};
use fs_rr::{LocalFs, ReplayConfig, ReplayReport, Replayer, Summary, Trace};
use std::fs::{self, File};
use std::path::Path;
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Replay {
            trace,
            root,
            repeat,
            force_async,
            report,
        } => replay(
            &trace,
            &root,
            repeat,
            ReplayConfig { force_async },
            report.as_deref(),
        ),
        Command::Convert {
            input,
            output,
            input_format,
            output_format,
        } => {
            let input_format =
                TraceFormat::from_path_and_option(&input, input_format.as_deref())?;
            let output_format =
                TraceFormat::from_path_and_option(&output, output_format.as_deref())?;
            convert(&input, &output, input_format, output_format)
        }
        Command::Strings { pool } => strings(&pool),
    }
}

fn replay(
    trace: &Path,
    root: &Path,
    repeat: usize,
    config: ReplayConfig,
    report: Option<&Path>,
) -> Result<()> {
    if repeat == 0 {
        bail!("--repeat must be at least 1");
    }
    let loaded =
        Trace::load(trace).with_context(|| format!("failed to load trace {}", trace.display()))?;
    let backend = LocalFs::new(root);

    let mut reports: Vec<ReplayReport> = Vec::with_capacity(repeat);
    for run in 1..=repeat {
        let result = Replayer::with_config(&loaded, &backend, config)
            .run()
            .with_context(|| format!("replay of {} failed on run {run}", trace.display()))?;
        println!(
            "run {run}: {} events in {:.3} ms, {} failed, peak {} in flight",
            result.events,
            result.elapsed.as_secs_f64() * 1000.0,
            result.failures.len(),
            result.peak_in_flight,
        );
        for failure in &result.failures {
            println!("  #{} {}: {}", failure.index, failure.event, failure.error);
        }
        reports.push(result);
    }

    if let Some(summary) = Summary::from_reports(&reports) {
        println!(
            "{} runs: min {:.3} ms, mean {:.3} ms, max {:.3} ms",
            summary.runs,
            summary.min.as_secs_f64() * 1000.0,
            summary.mean.as_secs_f64() * 1000.0,
            summary.max.as_secs_f64() * 1000.0,
        );
    }

    if let Some(path) = report {
        let file = File::create(path)
            .with_context(|| format!("failed to create report file at {}", path.display()))?;
        serde_json::to_writer_pretty(file, &reports)
            .with_context(|| format!("failed to write report file at {}", path.display()))?;
    }
    Ok(())
}

fn strings(pool: &Path) -> Result<()> {
    let bytes =
        fs::read(pool).with_context(|| format!("failed to read string pool {}", pool.display()))?;
    let table = StringTable::deserialize(&bytes)
        .with_context(|| format!("failed to parse string pool {}", pool.display()))?;
    for s in table.iter() {
        println!("{s}");
    }
    Ok(())
}
