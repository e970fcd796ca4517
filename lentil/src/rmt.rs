use log::info;
use nalgebra::{DMatrix, DVector};

use crate::error::PipelineError;
use crate::sim_blocks::SimMatrixReader;

/// Fewest retained genes for which the spacing statistics make sense.
pub const MIN_PRUNED_GENES: usize = 100;

/// Degenerate eigenvalues closer than this break the unfolding.
pub const EIGEN_DEDUP_EPS: f64 = 1e-6;

/// Nearest-neighbor spacing histogram: 60 bins of 0.05 over [0, 3];
/// spacings past 3 fall into the last bin.
pub const NNSD_BIN_WIDTH: f64 = 0.05;
pub const NNSD_NUM_BINS: usize = 60;

/// Chi-square critical value at p = 0.001 for 60 degrees of freedom; a
/// spectrum below this is taken as Poisson-consistent.
pub const CHI2_POISSON_CRITICAL: f64 = 99.607;

const UNFOLD_POLY_DEGREE: usize = 7;
const SPECTRUM_EDGE_TRIM: usize = 3;

/// Scan parameters for the descending threshold search.
#[derive(Debug, Clone, Copy)]
pub struct RmtScanOpts {
    pub th_start: f64,
    pub th_step: f64,
    pub chi_sought: f64,
    pub th_floor: f64,
}

impl Default for RmtScanOpts {
    fn default() -> Self {
        RmtScanOpts {
            th_start: 0.96,
            th_step: 0.001,
            chi_sought: 200.0,
            th_floor: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RmtDecision {
    pub threshold: f64,
    pub iterations: usize,
}

/// Chi-square distances of an observed spacing histogram from the
/// Poisson and GOE (Wigner surmise) expectations.
#[derive(Debug, Clone, Copy)]
pub struct NnsdChi2 {
    pub poisson: f64,
    pub goe: f64,
    pub n_spacings: usize,
}

/// Build the pruned adjacency at threshold `th` from the stored lower
/// triangle: a gene survives iff it has at least one finite off-diagonal
/// |s| >= th, and the surviving genes form a compact symmetric matrix
/// with |s| entries and a zero diagonal.
pub fn build_pruned_adjacency(reader: &SimMatrixReader, th: f64) -> anyhow::Result<DMatrix<f64>> {
    let num_genes = reader.layout().num_genes;
    let mut kept: Vec<(usize, usize, f64)> = Vec::new();
    let mut used = vec![false; num_genes];

    reader.for_each_cell(|j, k, v| {
        if j != k {
            let a = (v as f64).abs();
            if a.is_finite() && a >= th {
                kept.push((j, k, a));
                used[j] = true;
                used[k] = true;
            }
        }
        Ok(())
    })?;

    let mut index = vec![usize::MAX; num_genes];
    let mut n = 0usize;
    for (g, &u) in used.iter().enumerate() {
        if u {
            index[g] = n;
            n += 1;
        }
    }

    let mut adj = DMatrix::<f64>::zeros(n, n);
    for (j, k, a) in kept {
        let (jj, kk) = (index[j], index[k]);
        adj[(jj, kk)] = a;
        adj[(kk, jj)] = a;
    }
    Ok(adj)
}

/// All real eigenvalues of a symmetric matrix, ascending.
pub fn sorted_eigenvalues(adj: &DMatrix<f64>) -> anyhow::Result<Vec<f64>> {
    let mut evs: Vec<f64> = adj.symmetric_eigenvalues().iter().copied().collect();
    if evs.iter().any(|v| !v.is_finite()) {
        return Err(
            PipelineError::EigensolverFailed("non-finite eigenvalue in spectrum".to_string())
                .into(),
        );
    }
    evs.sort_by(|a, b| a.partial_cmp(b).unwrap());
    Ok(evs)
}

/// Drop consecutive eigenvalues closer than `eps`, keeping the first of
/// each run.
pub fn dedup_eigenvalues(evs: Vec<f64>, eps: f64) -> Vec<f64> {
    let mut out: Vec<f64> = Vec::with_capacity(evs.len());
    for v in evs {
        match out.last() {
            Some(&prev) if (v - prev).abs() < eps => {}
            _ => out.push(v),
        }
    }
    out
}

/// Unfold a sorted spectrum: least-squares polynomial fit of the
/// empirical CDF (on eigenvalues rescaled to [-1, 1] for conditioning),
/// then map each eigenvalue through M * F(lambda). The result has unit
/// mean spacing by construction.
pub fn unfold_spectrum(evs: &[f64]) -> anyhow::Result<Vec<f64>> {
    let m = evs.len();
    if m < UNFOLD_POLY_DEGREE + 2 {
        anyhow::bail!("{} distinct eigenvalues are too few to unfold", m);
    }
    let lo = evs[0];
    let hi = evs[m - 1];
    if !(hi > lo) {
        anyhow::bail!("degenerate spectrum, all eigenvalues equal");
    }

    let z: Vec<f64> = evs
        .iter()
        .map(|&v| 2.0 * (v - lo) / (hi - lo) - 1.0)
        .collect();
    let cdf: Vec<f64> = (0..m).map(|i| (i as f64 + 0.5) / m as f64).collect();

    let coef = polyfit(&z, &cdf, UNFOLD_POLY_DEGREE)?;

    let mut unfolded: Vec<f64> = z.iter().map(|&zi| m as f64 * polyval(&coef, zi)).collect();
    // the fitted CDF can wiggle at the edges; spacings need sorted input
    unfolded.sort_by(|a, b| a.partial_cmp(b).unwrap());
    Ok(unfolded)
}

/// Least-squares polynomial coefficients (constant term first).
pub fn polyfit(x: &[f64], y: &[f64], degree: usize) -> anyhow::Result<Vec<f64>> {
    let vand = DMatrix::<f64>::from_fn(x.len(), degree + 1, |i, j| x[i].powi(j as i32));
    let rhs = DVector::<f64>::from_column_slice(y);
    let coef = vand
        .svd(true, true)
        .solve(&rhs, 1e-12)
        .map_err(|e| anyhow::anyhow!("polynomial fit failed: {}", e))?;
    Ok(coef.iter().copied().collect())
}

pub fn polyval(coef: &[f64], z: f64) -> f64 {
    let mut acc = 0.0;
    for &c in coef.iter().rev() {
        acc = acc * z + c;
    }
    acc
}

/// Nearest-neighbor spacings of an unfolded spectrum, with a few edge
/// eigenvalues trimmed off each end.
pub fn nn_spacings(unfolded: &[f64]) -> Vec<f64> {
    let m = unfolded.len();
    if m <= 2 * SPECTRUM_EDGE_TRIM + 1 {
        return Vec::new();
    }
    let core = &unfolded[SPECTRUM_EDGE_TRIM..m - SPECTRUM_EDGE_TRIM];
    core.windows(2).map(|w| w[1] - w[0]).collect()
}

fn goe_tail(s: f64) -> f64 {
    (-std::f64::consts::PI * s * s / 4.0).exp()
}

/// Histogram the spacings and measure chi-square against both
/// reference ensembles; each bin's expectation is the integrated PDF
/// mass, with the tail folded into the last bin.
pub fn nnsd_chi2(spacings: &[f64]) -> NnsdChi2 {
    let n = spacings.len();
    let nf = n as f64;

    let mut obs = vec![0.0f64; NNSD_NUM_BINS];
    for &s in spacings {
        let k = ((s / NNSD_BIN_WIDTH) as usize).min(NNSD_NUM_BINS - 1);
        obs[k] += 1.0;
    }

    let mut poisson = 0.0;
    let mut goe = 0.0;
    for (k, &o) in obs.iter().enumerate() {
        let lo = k as f64 * NNSD_BIN_WIDTH;
        let hi = lo + NNSD_BIN_WIDTH;
        let last = k == NNSD_NUM_BINS - 1;

        let e_p = nf * ((-lo).exp() - if last { 0.0 } else { (-hi).exp() });
        let e_g = nf * (goe_tail(lo) - if last { 0.0 } else { goe_tail(hi) });

        poisson += (o - e_p) * (o - e_p) / e_p;
        goe += (o - e_g) * (o - e_g) / e_g;
    }

    NnsdChi2 {
        poisson,
        goe,
        n_spacings: n,
    }
}

/// Descend from `th_start` and report the last threshold whose NNSD was
/// still Poisson-consistent once the spectrum turns GOE-like (chi-square
/// past `chi_sought`). Reaching the floor first is a failure.
pub fn find_threshold(reader: &SimMatrixReader, opts: &RmtScanOpts) -> anyhow::Result<RmtDecision> {
    let mut th = opts.th_start + opts.th_step;
    let mut chosen: Option<f64> = None;
    let mut iterations = 0usize;

    loop {
        th -= opts.th_step;
        if th < opts.th_floor {
            return Err(PipelineError::RmtNoCrossover(opts.th_floor).into());
        }
        iterations += 1;

        let adj = build_pruned_adjacency(reader, th)?;
        let n = adj.nrows();
        if n < MIN_PRUNED_GENES {
            info!("t={:.4}: {} genes retained, spectrum too small", th, n);
            continue;
        }

        let evs = dedup_eigenvalues(sorted_eigenvalues(&adj)?, EIGEN_DEDUP_EPS);
        let unfolded = match unfold_spectrum(&evs) {
            Ok(u) => u,
            Err(e) => {
                info!("t={:.4}: {}", th, e);
                continue;
            }
        };
        let spacings = nn_spacings(&unfolded);
        if spacings.is_empty() {
            continue;
        }

        let chi = nnsd_chi2(&spacings);
        info!(
            "t={:.4}: N={} distinct={} chi2[poisson]={:.2} chi2[goe]={:.2}",
            th,
            n,
            evs.len(),
            chi.poisson,
            chi.goe
        );

        if chi.poisson < CHI2_POISSON_CRITICAL {
            chosen = Some(th);
        }
        if chi.poisson > opts.chi_sought {
            return match chosen {
                Some(threshold) => Ok(RmtDecision {
                    threshold,
                    iterations,
                }),
                None => Err(PipelineError::RmtNoCrossover(opts.th_floor).into()),
            };
        }
    }
}
