use thiserror::Error;

/// Failure kinds raised while loading or indexing an expression matrix.
#[derive(Debug, Error)]
pub enum EMatrixError {
    #[error("expression matrix shape mismatch: {0}")]
    InvalidMatrixShape(String),

    #[error("found a non-numeric value '{0}' but missing values are not configured (--omit-na/--na-val)")]
    MissingValueNotConfigured(String),

    #[error("unknown transform function '{0}' (expected none, log, log2 or log10)")]
    UnknownTransform(String),

    #[error("gene '{0}' is not present in the expression matrix")]
    UnknownGene(String),
}
