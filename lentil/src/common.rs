pub use clap::{Args, Parser, Subcommand};
pub use indicatif::ParallelProgressIterator;
pub use log::info;
pub use rayon::prelude::*;

pub use ematrix_util::common_io::*;
pub use ematrix_util::ematrix::{EMatrix, LoadOpts, Transform};
pub use ematrix_util::error::EMatrixError;
pub use ematrix_util::pairwise::PairWiseSet;
pub use ematrix_util::similarity::{pairwise_score, MiParams, SimilarityMethod};

pub use crate::error::PipelineError;

/// Expression-matrix options shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct EMatrixArgs {
    /// whitespace-delimited expression matrix file (genes x samples;
    /// `.gz` works). The first field of each data row is the gene name.
    #[arg(long, short = 'e', required = true)]
    pub ematrix: Box<str>,

    /// number of lines in the file, including the header line if present
    #[arg(long, short = 'r')]
    pub rows: usize,

    /// number of fields per data row (gene name plus samples)
    #[arg(long, short = 'c')]
    pub cols: usize,

    /// the first line carries sample names only
    #[arg(long)]
    pub headers: bool,

    /// ignore missing values (requires --na-val)
    #[arg(long)]
    pub omit_na: bool,

    /// token marking a missing value in the input (e.g. NA)
    #[arg(long, short = 'n')]
    pub na_val: Option<Box<str>>,

    /// transform applied to each value: none, log, log2, log10
    #[arg(long, short = 'f', default_value = "none")]
    pub func: Box<str>,
}

impl EMatrixArgs {
    pub fn load(&self) -> anyhow::Result<EMatrix> {
        if self.omit_na && self.na_val.is_none() {
            return Err(PipelineError::InvalidArgs(
                "--omit-na requires --na-val".to_string(),
            )
            .into());
        }

        let opts = LoadOpts {
            rows: self.rows,
            cols: self.cols,
            headers: self.headers,
            omit_na: self.omit_na,
            na_val: self.na_val.clone(),
            transform: Transform::from_name(&self.func)?,
        };

        info!("reading expression matrix {}", self.ematrix);
        let ematrix = EMatrix::from_file(&self.ematrix, &opts)?;
        info!(
            "loaded {} genes x {} samples",
            ematrix.num_genes(),
            ematrix.num_samples()
        );
        Ok(ematrix)
    }
}

/// Parse one similarity method code ("pc", "sc", "mi").
pub fn parse_method(code: &str) -> anyhow::Result<SimilarityMethod> {
    SimilarityMethod::from_code(code).ok_or_else(|| {
        PipelineError::InvalidArgs(format!(
            "method must be one of pc, sc, mi (got '{}')",
            code
        ))
        .into()
    })
}

/// Parse a comma-separated method list, rejecting repeats.
pub fn parse_methods(codes: &[Box<str>]) -> anyhow::Result<Vec<SimilarityMethod>> {
    let mut methods = Vec::with_capacity(codes.len());
    for code in codes {
        let m = parse_method(code)?;
        if methods.contains(&m) {
            return Err(PipelineError::InvalidArgs(format!(
                "method '{}' given more than once",
                code
            ))
            .into());
        }
        methods.push(m);
    }
    if methods.is_empty() {
        return Err(PipelineError::InvalidArgs("no similarity method given".to_string()).into());
    }
    Ok(methods)
}
