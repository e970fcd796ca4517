use clap::{Parser, Subcommand};

use lentil::run_extract::{run_extract, ExtractArgs};
use lentil::run_similarity::{run_similarity, SimilarityArgs};
use lentil::run_threshold::{run_threshold, ThresholdArgs};

/// Construct gene co-expression networks from an expression matrix:
/// pairwise similarity matrices on disk, a significance threshold by
/// random-matrix spectral statistics, and the thresholded edge list.
#[derive(Parser, Debug)]
#[command(version, about, long_about, term_width = 80)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compute pairwise similarity matrices (Pearson, Spearman, MI)
    Similarity(SimilarityArgs),
    /// Find a significance threshold by the RMT spacing test
    Threshold(ThresholdArgs),
    /// Extract the thresholded network or a single similarity value
    Extract(ExtractArgs),
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match &cli.commands {
        Commands::Similarity(args) => {
            run_similarity(args)?;
        }
        Commands::Threshold(args) => {
            run_threshold(args)?;
        }
        Commands::Extract(args) => {
            run_extract(args)?;
        }
    }

    Ok(())
}
