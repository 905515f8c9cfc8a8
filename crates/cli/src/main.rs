//! opqkit: trains OPQ rotations and PQ codecs for HNSW-PQ indexes.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use opqkit_cli::{run_all, run_construct_stage, run_opq_stage, CodecReport, JobConfig};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "opqkit")]
#[command(about = "Train OPQ rotations and PQ codecs for HNSW-PQ indexes")]
struct Args {
    /// Path to the JSON job configuration
    #[arg(long = "config-file", alias = "config_file")]
    config_file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Learn the OPQ rotation and write it to opq_matrix_file
    Opq,
    /// Train and write one codec per (M, nbits) pair
    Construct,
    /// Run opq then construct in one process
    Run,
}

fn print_reports(reports: &[CodecReport]) {
    for report in reports {
        println!(
            "M={:<4} nbits={:<2} mse={:.6}  {}",
            report.num_subspaces,
            report.nbits,
            report.mse,
            report.path.display()
        );
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "opqkit=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = JobConfig::load(&args.config_file)
        .with_context(|| format!("loading config {}", args.config_file.display()))?;

    match args.command {
        Commands::Opq => {
            if let Some(rotation) = run_opq_stage(&config).context("opq stage failed")? {
                println!("Saved {}x{} rotation", rotation.rows(), rotation.cols());
            }
        }
        Commands::Construct => {
            let reports = run_construct_stage(&config).context("construct stage failed")?;
            print_reports(&reports);
        }
        Commands::Run => {
            let reports = run_all(&config).context("run failed")?;
            print_reports(&reports);
        }
    }

    Ok(())
}
