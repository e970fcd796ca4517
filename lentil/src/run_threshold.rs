use std::path::Path;

use crate::common::*;
use crate::rmt::{find_threshold, RmtScanOpts};
use crate::sim_blocks::{BlockLayout, SimMatrixReader};

#[derive(Args, Debug)]
pub struct ThresholdArgs {
    #[command(flatten)]
    pub ematrix: EMatrixArgs,

    /// similarity method whose stored matrix to threshold (pc, sc, mi)
    #[arg(long, short = 'm', required = true)]
    pub method: Box<str>,

    /// first candidate threshold of the descending scan
    #[arg(long, default_value_t = 0.96)]
    pub th_start: f64,

    /// step the candidate threshold decreases by
    #[arg(long, default_value_t = 0.001)]
    pub th_step: f64,

    /// chi-square value sought against the Poisson NNSD; crossing it
    /// ends the scan
    #[arg(long, default_value_t = 200.0)]
    pub chi: f64,

    /// directory root holding the similarity block files
    #[arg(long, default_value = ".")]
    pub outdir: Box<str>,
}

/// Scan candidate thresholds over the stored similarity matrix and
/// report the one picked by the random-matrix spacing test.
pub fn run_threshold(args: &ThresholdArgs) -> anyhow::Result<()> {
    let method = parse_method(&args.method)?;
    if !(args.th_step > 0.0) {
        return Err(PipelineError::InvalidArgs(format!(
            "--th-step must be positive (got {})",
            args.th_step
        ))
        .into());
    }
    let ematrix = args.ematrix.load()?;

    let outdir = Path::new(args.outdir.as_ref());
    let layout = BlockLayout::new(ematrix.num_genes());
    let reader = SimMatrixReader::new(outdir, ematrix.file_prefix(), method, layout);

    let opts = RmtScanOpts {
        th_start: args.th_start,
        th_step: args.th_step,
        chi_sought: args.chi,
        ..RmtScanOpts::default()
    };

    info!(
        "scanning {} thresholds from {} in steps of {}",
        method.dir_name(),
        opts.th_start,
        opts.th_step
    );
    let decision = find_threshold(&reader, &opts)?;

    info!(
        "spectral crossover after {} candidate thresholds",
        decision.iterations
    );
    println!("{:.6}", decision.threshold);

    let th_file = outdir.join(format!("{}.{}.th.txt", ematrix.file_prefix(), method.code()));
    let lines = vec![format!("{:.6}", decision.threshold).into_boxed_str()];
    write_lines(&lines, &th_file.to_string_lossy())?;

    Ok(())
}
