//! Legal Chunker - Command Line Entry Point
//!
//! Runs a batch of legal PDFs through the chunking pipeline.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use legal_chunker::batch::{run_batch, CancelFlag, RunReport};
use legal_chunker::output::{read_handoff, write_atomic};
use legal_chunker::router::ChunkingRouter;
use legal_chunker::types::{JobConfig, OutputFormat, Strategy};

#[derive(Debug, Parser)]
#[command(name = "legal-chunker", version, about = "Chunk legal PDFs for retrieval")]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Chunk every PDF in the input directory
    Run(RunArgs),
    /// List the segmentation strategies
    Strategies,
    /// Summarize a JSON-Lines handoff file
    Handoff {
        /// Path to a `.jsonl` file written by `run`
        path: PathBuf,
    },
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Configuration file (TOML, JSON or YAML)
    #[arg(short, long, env = "CHUNKER_CONFIG")]
    config: Option<PathBuf>,

    #[arg(short, long)]
    input_dir: Option<PathBuf>,

    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    #[arg(long)]
    progress_file: Option<PathBuf>,

    /// sliding_window, semantic or hybrid
    #[arg(short, long)]
    strategy: Option<Strategy>,

    #[arg(long)]
    min_chunk_size: Option<usize>,

    #[arg(long)]
    max_chunk_size: Option<usize>,

    #[arg(long)]
    overlap: Option<usize>,

    /// Worker count (0 = available cores)
    #[arg(short, long)]
    workers: Option<usize>,

    /// CPU ceiling in percent
    #[arg(long)]
    cpu_limit: Option<f32>,

    #[arg(long)]
    language: Option<String>,

    #[arg(long)]
    max_pages_per_batch: Option<usize>,

    /// Seconds before a page is skipped
    #[arg(long)]
    timeout_per_page: Option<f64>,

    /// Output formats, comma separated
    #[arg(long = "format", value_delimiter = ',')]
    formats: Vec<OutputFormat>,

    /// Reprocess documents already marked done
    #[arg(long)]
    force: bool,

    /// Also write the run report as JSON
    #[arg(long)]
    report: Option<PathBuf>,
}

impl RunArgs {
    fn into_config(self) -> Result<(JobConfig, Option<PathBuf>)> {
        let mut config = JobConfig::load(self.config.as_deref())?;

        if let Some(dir) = self.input_dir {
            config.input_dir = dir;
        }
        if let Some(dir) = self.output_dir {
            config.output_dir = dir;
        }
        if self.progress_file.is_some() {
            config.progress_file = self.progress_file;
        }
        if let Some(strategy) = self.strategy {
            config.strategy = strategy;
        }
        if let Some(min) = self.min_chunk_size {
            config.min_chunk_size = min;
        }
        if let Some(max) = self.max_chunk_size {
            config.max_chunk_size = max;
        }
        if let Some(overlap) = self.overlap {
            config.overlap = overlap;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(limit) = self.cpu_limit {
            config.cpu_limit = limit;
        }
        if self.language.is_some() {
            config.language = self.language;
        }
        if let Some(pages) = self.max_pages_per_batch {
            config.max_pages_per_batch = pages;
        }
        if let Some(timeout) = self.timeout_per_page {
            config.timeout_per_page = timeout;
        }
        if !self.formats.is_empty() {
            config.output_formats = self.formats;
        }
        config.force |= self.force;

        Ok((config, self.report))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let result = match cli.command {
        Command::Run(args) => run(args).await,
        Command::Strategies => {
            for (name, description) in ChunkingRouter::list_strategies() {
                println!("{name:<16}{description}");
            }
            Ok(0)
        }
        Command::Handoff { path } => handoff(path),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("legal_chunker=info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }
}

async fn run(args: RunArgs) -> Result<u8> {
    let (config, report_path) = args.into_config()?;

    info!("Starting Legal Chunker v{}", env!("CARGO_PKG_VERSION"));
    info!(
        strategy = %config.strategy,
        max_chunk_size = config.max_chunk_size,
        overlap = config.overlap,
        workers = config.resolved_workers(),
        cpu_limit = config.cpu_limit,
        "Configuration loaded"
    );

    let cancel = CancelFlag::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight documents");
            on_interrupt.cancel();
        }
    });

    let report = run_batch(&config, cancel).await?;
    print_report(&report);

    if let Some(path) = report_path {
        let json = serde_json::to_vec_pretty(&report)?;
        write_atomic(&path, &json)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
    }

    Ok(report.exit_code() as u8)
}

fn handoff(path: PathBuf) -> Result<u8> {
    let batch = read_handoff(&path)?;
    let chars: usize = batch.records.iter().map(|r| r.text.chars().count()).sum();

    println!("{}", path.display());
    println!("  records:   {}", batch.records.len());
    println!("  characters: {chars}");
    if !batch.malformed.is_empty() {
        println!("  malformed lines: {:?}", batch.malformed);
    }
    Ok(if batch.malformed.is_empty() { 0 } else { 1 })
}

fn print_report(report: &RunReport) {
    println!("Run {} ({:?})", report.run_id, report.status());
    println!("  documents:      {}", report.total);
    println!("  processed:      {}", report.processed);
    println!("  succeeded:      {}", report.succeeded);
    println!("  failed:         {}", report.failed);
    println!("  skipped (done): {}", report.skipped_done);
    println!("  skipped (empty): {}", report.skipped_empty);
    if report.cancelled {
        println!("  not dispatched: {} (cancelled)", report.not_dispatched);
    }
    println!("  chunks:         {}", report.total_chunks);
    println!("  elapsed:        {}ms", report.elapsed().num_milliseconds());

    if !report.failures.is_empty() {
        println!("Failed documents:");
        for failure in &report.failures {
            println!(
                "  {} [{}] {}: {}",
                failure.document_id,
                failure.kind,
                failure.path.display(),
                failure.error
            );
        }
    }
}
