use std::path::{Path, PathBuf};

use indicatif::ProgressBar;

use crate::common::*;
use crate::sim_blocks::{block_path, remove_blocks, BlockLayout, SimBlockWriter};

/// Bins of the optional |score| histogram over [0, 1).
pub const HIST_BINS: usize = 100;

#[derive(Args, Debug)]
pub struct SimilarityArgs {
    #[command(flatten)]
    pub ematrix: EMatrixArgs,

    /// similarity methods to compute (comma-separated: pc, sc, mi)
    #[arg(long, short = 'm', value_delimiter = ',', required = true)]
    pub method: Vec<Box<str>>,

    /// minimum number of shared observations required for a score
    #[arg(long, short = 'o', default_value_t = 30)]
    pub min_obs: usize,

    /// B-spline bins for the MI estimator
    #[arg(long, short = 'b', default_value_t = 10)]
    pub mi_bins: usize,

    /// B-spline degree for the MI estimator
    #[arg(long, short = 'd', default_value_t = 3)]
    pub mi_degree: usize,

    /// expression floor; a sample pair counts only when both values
    /// reach it
    #[arg(long, short = 's')]
    pub th: Option<f64>,

    /// write a |score| histogram per method
    #[arg(long)]
    pub hist: bool,

    /// number of rows computed per parallel batch
    #[arg(long, default_value_t = 256)]
    pub block_size: usize,

    /// output directory root (method directories are created inside)
    #[arg(long, default_value = ".")]
    pub outdir: Box<str>,
}

/// Walk the strictly lower triangle block by block, build one
/// PairWiseSet per gene pair, and write every selected method's score
/// to that method's own block file.
pub fn run_similarity(args: &SimilarityArgs) -> anyhow::Result<()> {
    let methods = parse_methods(&args.method)?;
    if args.mi_bins <= args.mi_degree {
        return Err(PipelineError::InvalidArgs(format!(
            "--mi-bins ({}) must exceed --mi-degree ({})",
            args.mi_bins, args.mi_degree
        ))
        .into());
    }

    let ematrix = args.ematrix.load()?;
    let num_genes = ematrix.num_genes();
    let layout = BlockLayout::new(num_genes);
    let mi_params = MiParams {
        bins: args.mi_bins,
        degree: args.mi_degree,
    };

    let outdir = Path::new(args.outdir.as_ref());
    for m in &methods {
        mkdir(&outdir.join(m.dir_name()).to_string_lossy())?;
    }

    for m in &methods {
        info!("using similarity method '{}'", m.code());
    }
    if let Some(floor) = args.th {
        info!("ignoring expression values below {}", floor);
    }
    info!(
        "{} pairwise comparisons over {} genes in {} block(s)",
        num_genes * (num_genes - 1) / 2,
        num_genes,
        layout.num_blocks()
    );

    let mut histograms: Vec<Vec<u64>> = vec![vec![0; HIST_BINS]; methods.len()];

    for b in 0..layout.num_blocks() {
        let (r0, rows) = layout.block_rows(b);
        let paths: Vec<PathBuf> = methods
            .iter()
            .map(|&m| block_path(outdir, ematrix.file_prefix(), m, b))
            .collect();

        info!(
            "writing block {} of {} (rows {}..{})",
            b + 1,
            layout.num_blocks(),
            r0,
            r0 + rows
        );

        if let Err(e) = write_block(
            &paths,
            &ematrix,
            &methods,
            num_genes,
            r0,
            rows,
            args,
            &mi_params,
            &mut histograms,
        ) {
            // never leave a valid header with a short body behind
            remove_blocks(&paths);
            return Err(e);
        }
    }

    if args.hist {
        for (mi, &m) in methods.iter().enumerate() {
            let hist_file = outdir.join(format!(
                "{}.{}.corrhist.txt",
                ematrix.file_prefix(),
                m.code()
            ));
            let lines: Vec<Box<str>> = histograms[mi]
                .iter()
                .enumerate()
                .map(|(k, count)| {
                    format!("{:.2}\t{}", k as f64 / HIST_BINS as f64, count).into_boxed_str()
                })
                .collect();
            write_lines(&lines, &hist_file.to_string_lossy())?;
        }
    }

    info!("similarity matrices complete");
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn write_block(
    paths: &[PathBuf],
    ematrix: &EMatrix,
    methods: &[SimilarityMethod],
    num_genes: usize,
    r0: usize,
    rows: usize,
    args: &SimilarityArgs,
    mi_params: &MiParams,
    histograms: &mut [Vec<u64>],
) -> anyhow::Result<()> {
    let mut writers = paths
        .iter()
        .map(|p| SimBlockWriter::create(p, num_genes, r0, rows))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let pb = ProgressBar::new(rows as u64);
    let row_ids: Vec<usize> = (r0..r0 + rows).collect();

    for chunk in row_ids.chunks(args.block_size.max(1)) {
        // each row depends only on the immutable matrix, so the chunk
        // computes in parallel and flushes in ascending row order
        let computed: Vec<Vec<Vec<f32>>> = chunk
            .par_iter()
            .map(|&j| compute_row(ematrix, methods, j, args, mi_params))
            .collect();

        for per_method in &computed {
            for (mi, row) in per_method.iter().enumerate() {
                writers[mi].write_row(row)?;
                for &s in row {
                    let a = s.abs();
                    if a < 1.0 {
                        histograms[mi][(a * HIST_BINS as f32) as usize] += 1;
                    }
                }
            }
        }
        pb.inc(chunk.len() as u64);
    }

    for w in writers {
        w.finish()?;
    }
    pb.finish_and_clear();
    Ok(())
}

/// Scores of row `j` against columns 0..=j, one vector per method.
fn compute_row(
    ematrix: &EMatrix,
    methods: &[SimilarityMethod],
    j: usize,
    args: &SimilarityArgs,
    mi_params: &MiParams,
) -> Vec<Vec<f32>> {
    let mut per_method: Vec<Vec<f32>> = methods.iter().map(|_| Vec::with_capacity(j + 1)).collect();

    for k in 0..=j {
        if k == j {
            for scores in per_method.iter_mut() {
                scores.push(1.0);
            }
            continue;
        }
        let pws = PairWiseSet::build(ematrix, j, k, args.th);
        for (mi, &method) in methods.iter().enumerate() {
            per_method[mi].push(pairwise_score(method, &pws, args.min_obs, mi_params) as f32);
        }
    }
    per_method
}
