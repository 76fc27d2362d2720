use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use groupsum::app::{handle_fatal_error, init_logging, AppConfig};
use groupsum::config::{load_config, PipelineConfig};
use groupsum::{Pipeline, PipelineReport};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Grouped sums over CSV files larger than memory
#[derive(Parser)]
#[command(name = "groupsum", version)]
#[command(about = "Sum integer metrics per three-column group using external sorting", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv adds threads and lines)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to a TOML configuration file (default: ./groupsum.toml if present)
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate INPUT from scratch
    Run {
        /// Input CSV file; the first line is the header
        input: PathBuf,

        #[command(flatten)]
        options: RunOptions,
    },
    /// Continue an interrupted run over INPUT
    Resume {
        /// Input CSV file the interrupted run was started with
        input: PathBuf,

        #[command(flatten)]
        options: RunOptions,
    },
    /// Remove chunk, sorted and merged files and the manifest
    Clean {
        /// Directory holding intermediate files
        #[arg(long)]
        work_dir: Option<PathBuf>,
    },
}

#[derive(Args)]
struct RunOptions {
    /// Directory holding intermediate files
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Output CSV path
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Chunk size threshold in bytes
    #[arg(long)]
    chunk_size: Option<u64>,

    /// Maximum chunks sorted concurrently
    #[arg(short = 'j', long)]
    max_parallel: Option<usize>,

    /// Remove leftovers of an earlier run instead of refusing to start
    #[arg(long)]
    force: bool,

    /// Write a JSON run report to this path
    #[arg(long)]
    report: Option<PathBuf>,
}

impl RunOptions {
    fn apply(&self, config: &mut PipelineConfig) {
        if let Some(dir) = &self.work_dir {
            config.work_dir = dir.clone();
        }
        if let Some(output) = &self.output {
            config.output_file = output.clone();
        }
        if let Some(size) = self.chunk_size {
            config.chunk_size_bytes = size;
        }
        if let Some(width) = self.max_parallel {
            config.max_parallel = width;
        }
        if self.force {
            config.force = true;
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let app_config = match AppConfig::new(cli.verbose) {
        Ok(config) => config,
        Err(e) => handle_fatal_error(e, cli.verbose),
    };
    init_logging(&app_config);
    debug!("Working directory: {}", app_config.working_dir.display());

    if let Err(e) = run(cli).await {
        handle_fatal_error(e, app_config.verbose);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = load_config(cli.config.as_deref()).await?;

    match cli.command {
        Commands::Run { input, options } => {
            options.apply(&mut config);
            let pipeline = Pipeline::new(config)?;
            let report = pipeline.run(&input).await?;
            finish(&report, options.report.as_deref()).await
        }
        Commands::Resume { input, options } => {
            options.apply(&mut config);
            let pipeline = Pipeline::new(config)?;
            let report = pipeline.resume(&input).await?;
            finish(&report, options.report.as_deref()).await
        }
        Commands::Clean { work_dir } => {
            if let Some(dir) = work_dir {
                config.work_dir = dir;
            }
            let pipeline = Pipeline::new(config)?;
            let removed = pipeline.clean()?;
            if removed.is_empty() {
                println!("Nothing to clean in {}", pipeline.workspace().root().display());
            } else {
                println!("Removed {} files", removed.len());
                for path in removed {
                    debug!("  {}", path.display());
                }
            }
            Ok(())
        }
    }
}

async fn finish(report: &PipelineReport, report_path: Option<&Path>) -> anyhow::Result<()> {
    if let Some(path) = report_path {
        let json = serde_json::to_vec_pretty(report)?;
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
    }

    let groups = report.reduce.as_ref().map(|r| r.groups_out).unwrap_or(0);
    let rows = report.reduce.as_ref().map(|r| r.rows_in).unwrap_or(0);
    println!(
        "{}: {} rows -> {} groups in {:.2}s{}",
        report.output.display(),
        rows,
        groups,
        report.duration_secs,
        if report.resumed { " (resumed)" } else { "" }
    );
    Ok(())
}
