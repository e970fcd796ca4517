use std::path::PathBuf;
use thiserror::Error;

/// Failure kinds of the similarity/threshold/extract pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("supply either a threshold or one pair of coordinates/genes, not both")]
    ConflictingSelection,

    #[error("coordinate ({0}, {1}) is outside the similarity matrix")]
    OutOfRange(usize, usize),

    #[error("similarity block {path} is truncated: expected {expected} bytes, found {found}")]
    TruncatedBlock {
        path: PathBuf,
        expected: u64,
        found: u64,
    },

    #[error("eigenvalue decomposition failed: {0}")]
    EigensolverFailed(String),

    #[error("no spectral crossover found above the threshold floor {0}")]
    RmtNoCrossover(f64),
}
