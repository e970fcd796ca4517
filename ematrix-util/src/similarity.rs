use crate::pairwise::PairWiseSet;

/// Pairwise similarity methods. Selection is data: the CLI parses the
/// short codes once and everything downstream matches on the enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimilarityMethod {
    Pearson,
    Spearman,
    Mi,
}

impl SimilarityMethod {
    /// Parse a short method code ("pc", "sc", "mi").
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "pc" => Some(SimilarityMethod::Pearson),
            "sc" => Some(SimilarityMethod::Spearman),
            "mi" => Some(SimilarityMethod::Mi),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            SimilarityMethod::Pearson => "pc",
            SimilarityMethod::Spearman => "sc",
            SimilarityMethod::Mi => "mi",
        }
    }

    /// Directory the method's outputs live in.
    pub fn dir_name(&self) -> &'static str {
        match self {
            SimilarityMethod::Pearson => "Pearson",
            SimilarityMethod::Spearman => "Spearman",
            SimilarityMethod::Mi => "MI",
        }
    }
}

/// B-spline estimator parameters for mutual information.
#[derive(Debug, Clone, Copy)]
pub struct MiParams {
    pub bins: usize,
    pub degree: usize,
}

impl Default for MiParams {
    fn default() -> Self {
        MiParams { bins: 10, degree: 3 }
    }
}

/// Dispatch one pairwise comparison to the requested kernel.
pub fn pairwise_score(
    method: SimilarityMethod,
    pws: &PairWiseSet,
    min_obs: usize,
    mi_params: &MiParams,
) -> f64 {
    match method {
        SimilarityMethod::Pearson => pearson(&pws.x, &pws.y, min_obs),
        SimilarityMethod::Spearman => spearman(&pws.x, &pws.y, min_obs),
        SimilarityMethod::Mi => mi_signed(&pws.x, &pws.y, min_obs, mi_params),
    }
}

/// Sample Pearson correlation, clamped to [-1, 1] to absorb
/// floating-point drift. `NaN` when fewer than `min_obs` observations
/// remain or either vector has zero variance.
pub fn pearson(x: &[f64], y: &[f64], min_obs: usize) -> f64 {
    let n = x.len();
    if n != y.len() || n < min_obs || n < 2 {
        return f64::NAN;
    }

    let nf = n as f64;
    let mean_x = x.iter().sum::<f64>() / nf;
    let mean_y = y.iter().sum::<f64>() / nf;

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (&a, &b) in x.iter().zip(y.iter()) {
        let dx = a - mean_x;
        let dy = b - mean_y;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }

    if sxx == 0.0 || syy == 0.0 {
        return f64::NAN;
    }

    (sxy / (sxx.sqrt() * syy.sqrt())).clamp(-1.0, 1.0)
}

/// Spearman rank correlation: Pearson on tie-averaged ranks.
pub fn spearman(x: &[f64], y: &[f64], min_obs: usize) -> f64 {
    if x.len() != y.len() || x.len() < min_obs || x.len() < 2 {
        return f64::NAN;
    }
    let rx = rank_vector(x);
    let ry = rank_vector(y);
    pearson(&rx, &ry, min_obs)
}

/// Rank a vector with tie correction: equal values share the average of
/// the ranks they span, so the result is stable in the input order.
pub fn rank_vector(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    if n == 0 {
        return Vec::new();
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        values[a]
            .partial_cmp(&values[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut ranks = vec![0.0; n];
    let mut i = 0;
    while i < n {
        let current = values[order[i]];
        let start = i;
        while i < n && values[order[i]] == current {
            i += 1;
        }
        // 1-based ranks start+1 ..= i averaged over the tie run
        let avg_rank = (start + i + 1) as f64 / 2.0;
        for &idx in &order[start..i] {
            ranks[idx] = avg_rank;
        }
    }
    ranks
}

/// Raw B-spline mutual information in bits (Daub et al. estimator).
/// Both vectors are min-max normalized to [0, 1]; a constant vector is
/// degenerate and yields `NaN`. Non-negative up to estimator noise.
pub fn mutual_information(x: &[f64], y: &[f64], min_obs: usize, params: &MiParams) -> f64 {
    let n = x.len();
    if n != y.len() || n < min_obs || n == 0 {
        return f64::NAN;
    }
    if params.bins <= params.degree {
        return f64::NAN;
    }

    let ux = match normalize_unit(x) {
        Some(v) => v,
        None => return f64::NAN,
    };
    let uy = match normalize_unit(y) {
        Some(v) => v,
        None => return f64::NAN,
    };

    let bins = params.bins;
    let order = params.degree + 1;
    let knots = clamped_knots(bins, order);

    let mut px = vec![0.0; bins];
    let mut py = vec![0.0; bins];
    let mut pxy = vec![0.0; bins * bins];

    let mut bx = vec![0.0; bins];
    let mut by = vec![0.0; bins];
    for s in 0..n {
        bspline_basis(ux[s], bins, order, &knots, &mut bx);
        bspline_basis(uy[s], bins, order, &knots, &mut by);
        for i in 0..bins {
            px[i] += bx[i];
            py[i] += by[i];
            let w = bx[i];
            if w != 0.0 {
                for j in 0..bins {
                    pxy[i * bins + j] += w * by[j];
                }
            }
        }
    }

    let nf = n as f64;
    let mut mi = 0.0;
    for i in 0..bins {
        for j in 0..bins {
            let joint = pxy[i * bins + j] / nf;
            if joint > 0.0 {
                let marginal = (px[i] / nf) * (py[j] / nf);
                mi += joint * (joint / marginal).log2();
            }
        }
    }
    mi
}

/// Signed MI similarity on the same [-1, 1] scale as the correlation
/// kernels: `sign(pearson) * min(1, MI / log2(bins))`. Independence
/// lands at 0 and a saturated b-bin histogram at |1|.
pub fn mi_signed(x: &[f64], y: &[f64], min_obs: usize, params: &MiParams) -> f64 {
    let mi = mutual_information(x, y, min_obs, params);
    if mi.is_nan() {
        return f64::NAN;
    }
    let scaled = (mi.max(0.0) / (params.bins as f64).log2()).min(1.0);
    let r = pearson(x, y, min_obs);
    if r < 0.0 {
        -scaled
    } else {
        scaled
    }
}

/// Min-max normalize to [0, 1]; `None` when the vector is constant.
fn normalize_unit(values: &[f64]) -> Option<Vec<f64>> {
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for &v in values {
        lo = lo.min(v);
        hi = hi.max(v);
    }
    if !(hi > lo) {
        return None;
    }
    let span = hi - lo;
    Some(values.iter().map(|&v| (v - lo) / span).collect())
}

/// Clamped uniform knot vector over [0, 1]: `order` copies of 0,
/// `nbasis - order` interior knots, `order` copies of 1. Length is
/// `nbasis + order` (= bins + degree + 1).
pub fn clamped_knots(nbasis: usize, order: usize) -> Vec<f64> {
    let n_knots = nbasis + order;
    let n_spans = (nbasis - order + 1) as f64;
    let mut knots = Vec::with_capacity(n_knots);
    for i in 0..n_knots {
        if i < order {
            knots.push(0.0);
        } else if i < nbasis {
            knots.push((i - order + 1) as f64 / n_spans);
        } else {
            knots.push(1.0);
        }
    }
    knots
}

/// Evaluate all `nbasis` B-spline basis functions of the given order at
/// `u` in [0, 1] by the Cox-de Boor recursion. The results form a
/// partition of unity.
pub fn bspline_basis(u: f64, nbasis: usize, order: usize, knots: &[f64], out: &mut [f64]) {
    let n_knots = knots.len();
    let mut work = vec![0.0; n_knots - 1];

    // order-1 indicator functions; u == 1 belongs to the last real span
    if u >= 1.0 {
        let mut last = None;
        for i in 0..n_knots - 1 {
            if knots[i] < knots[i + 1] {
                last = Some(i);
            }
        }
        if let Some(i) = last {
            work[i] = 1.0;
        }
    } else {
        for (i, w) in work.iter_mut().enumerate() {
            if knots[i] <= u && u < knots[i + 1] {
                *w = 1.0;
            }
        }
    }

    for m in 2..=order {
        for i in 0..(n_knots - m) {
            let left_den = knots[i + m - 1] - knots[i];
            let right_den = knots[i + m] - knots[i + 1];
            let left = if left_den > 0.0 {
                (u - knots[i]) / left_den * work[i]
            } else {
                0.0
            };
            let right = if right_den > 0.0 {
                (knots[i + m] - u) / right_den * work[i + 1]
            } else {
                0.0
            };
            work[i] = left + right;
        }
    }

    out[..nbasis].copy_from_slice(&work[..nbasis]);
}
