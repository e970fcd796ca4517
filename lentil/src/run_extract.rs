use std::io::Write;
use std::path::Path;

use crate::common::*;
use crate::sim_blocks::{BlockLayout, SimMatrixReader};

#[derive(Args, Debug)]
pub struct ExtractArgs {
    #[command(flatten)]
    pub ematrix: EMatrixArgs,

    /// similarity method whose stored matrix to read (pc, sc, mi)
    #[arg(long, short = 'm', required = true)]
    pub method: Box<str>,

    /// emit the network of edges with |score| at or above this threshold
    #[arg(long, short = 't')]
    pub th: Option<f64>,

    /// row coordinate of a single cell to print (use with -y)
    #[arg(short = 'x')]
    pub x: Option<usize>,

    /// column coordinate of a single cell to print (use with -x)
    #[arg(short = 'y')]
    pub y: Option<usize>,

    /// name of the first gene of a single pair to print (use with --gene2)
    #[arg(long, short = '1')]
    pub gene1: Option<Box<str>>,

    /// name of the second gene of a single pair to print (use with --gene1)
    #[arg(long, short = '2')]
    pub gene2: Option<Box<str>>,

    /// directory root holding the similarity block files
    #[arg(long, default_value = ".")]
    pub outdir: Box<str>,
}

/// Either scan the stored matrix for edges above a threshold or fetch a
/// single cell addressed by coordinates or gene names.
pub fn run_extract(args: &ExtractArgs) -> anyhow::Result<()> {
    let method = parse_method(&args.method)?;

    let has_coords =
        args.x.is_some() || args.y.is_some() || args.gene1.is_some() || args.gene2.is_some();
    if args.th.is_some() && has_coords {
        return Err(PipelineError::ConflictingSelection.into());
    }
    if args.gene1.is_some() != args.gene2.is_some() {
        return Err(
            PipelineError::InvalidArgs("--gene1 and --gene2 go together".to_string()).into(),
        );
    }
    if args.x.is_some() != args.y.is_some() {
        return Err(PipelineError::InvalidArgs("-x and -y go together".to_string()).into());
    }

    let ematrix = args.ematrix.load()?;
    let outdir = Path::new(args.outdir.as_ref());
    let layout = BlockLayout::new(ematrix.num_genes());
    let reader = SimMatrixReader::new(outdir, ematrix.file_prefix(), method, layout);

    if let Some(th) = args.th {
        let edges_file = outdir.join(format!(
            "{}.{}.th{}.coexpnet.edges.txt",
            ematrix.file_prefix(),
            method.code(),
            th
        ));
        let n_edges = write_network(&reader, &ematrix, th, &edges_file.to_string_lossy())?;
        info!("{} edges written to {}", n_edges, edges_file.display());
        return Ok(());
    }

    let (x, y) = match (&args.gene1, &args.gene2) {
        (Some(g1), Some(g2)) => {
            let x = ematrix
                .gene_index(g1)
                .ok_or_else(|| EMatrixError::UnknownGene(g1.to_string()))?;
            let y = ematrix
                .gene_index(g2)
                .ok_or_else(|| EMatrixError::UnknownGene(g2.to_string()))?;
            (x, y)
        }
        _ => match (args.x, args.y) {
            (Some(x), Some(y)) => (x, y),
            _ => {
                return Err(PipelineError::InvalidArgs(
                    "give a threshold, a coordinate pair or a gene pair".to_string(),
                )
                .into())
            }
        },
    };

    let score = lookup_cell(&reader, x, y)?;
    println!("{}\t{}\t{:.8}", x, y, score);
    Ok(())
}

/// Stream the lower triangle and write one `geneA\tgeneB\tscore` line
/// per finite off-diagonal cell with |score| >= th. Rows ascend, so
/// every edge appears exactly once. Returns the edge count.
pub fn write_network(
    reader: &SimMatrixReader,
    ematrix: &EMatrix,
    th: f64,
    output_file: &str,
) -> anyhow::Result<usize> {
    let mut out = open_buf_writer(output_file)?;
    let mut n_edges = 0usize;

    reader.for_each_cell(|j, k, v| {
        if j != k && (v.abs() as f64) >= th && v.is_finite() {
            writeln!(
                out,
                "{}\t{}\t{:.8}",
                ematrix.gene_name(j),
                ematrix.gene_name(k),
                v
            )?;
            n_edges += 1;
        }
        Ok(())
    })?;

    out.flush()?;
    Ok(n_edges)
}

/// Fetch s(max, min) for a coordinate pair. Both coordinates must be at
/// least 1 and inside the matrix.
pub fn lookup_cell(reader: &SimMatrixReader, x: usize, y: usize) -> anyhow::Result<f32> {
    let num_genes = reader.layout().num_genes;
    if x < 1 || y < 1 || x >= num_genes || y >= num_genes {
        return Err(PipelineError::OutOfRange(x, y).into());
    }
    reader.cell(x.max(y), x.min(y))
}
