use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use log::error;

use cgbench_backend_threads::run_workers;
use cgbench_core::backend::{ExecutionBackend, SingleWorker};
use cgbench_core::benchmark::{self, RunReport, Verbosity};
use cgbench_core::halo::NoTransport;
use cgbench_core::io::JobConfig;

#[derive(Parser, Debug)]
#[command(name = "cgbench", about = "Distributed PCG stencil benchmark")]
struct Cli {
    /// Path to a TOML job configuration file
    #[arg(short, long)]
    config: PathBuf,
    /// Path to the JSON report (defaults to stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Override the worker count from the configuration
    #[arg(long)]
    workers: Option<usize>,
    /// Override the per-worker thread count from the configuration
    #[arg(long)]
    threads: Option<usize>,
    /// Suppress progress logs (stderr)
    #[arg(long)]
    quiet: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    if !cli.quiet {
        eprintln!("[cli] loading config {}", cli.config.display());
    }
    let raw = fs::read_to_string(&cli.config)?;
    let config: JobConfig = toml::from_str(&raw)?;

    let workers = cli.workers.unwrap_or(config.decomposition.workers).max(1);
    let threads = effective_threads(cli.threads.unwrap_or(config.decomposition.threads), workers);
    let verbosity = if cli.quiet {
        Verbosity::Quiet
    } else {
        Verbosity::Verbose
    };
    let metrics = config.metrics.build_recorder()?;

    if !cli.quiet {
        eprintln!("[cli] running with {workers} worker(s), {threads} thread(s) each");
    }

    let report = if workers == 1 {
        let backend = SingleWorker::new(threads)?;
        benchmark::run(&backend, &mut NoTransport, &config, verbosity, metrics.as_ref())?
    } else {
        let metrics = metrics.as_ref();
        let results = run_workers(workers, threads, |mut context| {
            // Rank 0 narrates and records; the others run silently.
            let rank = context.backend.rank();
            let recorder = if rank == 0 { metrics } else { None };
            let worker_verbosity = if rank == 0 { verbosity } else { Verbosity::Quiet };
            benchmark::run(
                &context.backend,
                &mut context.transport,
                &config,
                worker_verbosity,
                recorder,
            )
        })?;
        // Fatal conditions are agreed collectively, so every worker returns
        // the same way; rank 0's report carries the global numbers.
        let mut reports = results.into_iter().collect::<Result<Vec<_>, _>>()?;
        reports.swap_remove(0)
    };

    emit_report(&report, cli.output.as_deref())?;
    if !cli.quiet {
        if let Some(path) = &cli.output {
            eprintln!(
                "[cli] wrote report to {} ({} iterations)",
                path.display(),
                report.iterations
            );
        } else {
            eprintln!("[cli] wrote report to stdout ({} iterations)", report.iterations);
        }
    }
    Ok(())
}

/// Zero means auto: divide the physical cores evenly across workers.
fn effective_threads(configured: usize, workers: usize) -> usize {
    if configured > 0 {
        configured
    } else {
        (num_cpus::get_physical() / workers).max(1)
    }
}

fn emit_report(report: &RunReport, dest: Option<&Path>) -> io::Result<()> {
    let mut writer: Box<dyn Write> = match dest {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(io::stdout())),
    };
    serde_json::to_writer_pretty(&mut writer, report)?;
    writeln!(writer)?;
    writer.flush()
}
