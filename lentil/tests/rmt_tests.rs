use std::fs;
use std::path::Path;

use approx::assert_abs_diff_eq;
use nalgebra::DMatrix;
use tempfile::tempdir;

use ematrix_util::similarity::SimilarityMethod;
use lentil::error::PipelineError;
use lentil::rmt::{
    build_pruned_adjacency, dedup_eigenvalues, find_threshold, nn_spacings, nnsd_chi2, polyfit,
    polyval, sorted_eigenvalues, unfold_spectrum, RmtScanOpts, CHI2_POISSON_CRITICAL,
};
use lentil::sim_blocks::{block_path, BlockLayout, SimBlockWriter, SimMatrixReader};

const PC: SimilarityMethod = SimilarityMethod::Pearson;

#[test]
fn eigenvalues_of_a_known_matrix() -> anyhow::Result<()> {
    let adj = DMatrix::from_row_slice(2, 2, &[2.0, 1.0, 1.0, 2.0]);
    let evs = sorted_eigenvalues(&adj)?;
    assert_eq!(evs.len(), 2);
    assert_abs_diff_eq!(evs[0], 1.0, epsilon = 1e-10);
    assert_abs_diff_eq!(evs[1], 3.0, epsilon = 1e-10);
    Ok(())
}

#[test]
fn near_degenerate_eigenvalues_collapse() {
    let evs = vec![1.0, 1.0 + 1e-9, 1.0 + 2e-9, 2.0, 3.0, 3.0];
    let deduped = dedup_eigenvalues(evs, 1e-6);
    assert_eq!(deduped, vec![1.0, 2.0, 3.0]);
}

#[test]
fn polynomial_fit_recovers_polynomial_data() -> anyhow::Result<()> {
    let x: Vec<f64> = (0..40).map(|i| -1.0 + 2.0 * i as f64 / 39.0).collect();
    let y: Vec<f64> = x.iter().map(|&v| 2.0 + 3.0 * v - 0.5 * v * v).collect();

    let coef = polyfit(&x, &y, 7)?;
    for (&xi, &yi) in x.iter().zip(y.iter()) {
        assert_abs_diff_eq!(polyval(&coef, xi), yi, epsilon = 1e-6);
    }
    Ok(())
}

#[test]
fn unfolding_a_uniform_spectrum_gives_unit_spacings() -> anyhow::Result<()> {
    let evs: Vec<f64> = (0..200).map(|i| i as f64).collect();
    let unfolded = unfold_spectrum(&evs)?;
    assert_eq!(unfolded.len(), evs.len());

    let spacings = nn_spacings(&unfolded);
    assert!(!spacings.is_empty());

    let mean = spacings.iter().sum::<f64>() / spacings.len() as f64;
    assert_abs_diff_eq!(mean, 1.0, epsilon = 1e-3);
    for &s in &spacings {
        assert_abs_diff_eq!(s, 1.0, epsilon = 1e-2);
    }
    Ok(())
}

/// Quantile draws match a distribution's histogram bin by bin, so the
/// chi-square against the matching ensemble stays near zero while the
/// other ensemble is far away.
#[test]
fn nnsd_chi_square_separates_the_ensembles() {
    let n = 2000;

    // exponential (Poisson process) spacing quantiles
    let poissonish: Vec<f64> = (0..n)
        .map(|i| -(1.0 - (i as f64 + 0.5) / n as f64).ln())
        .collect();
    let chi = nnsd_chi2(&poissonish);
    assert_eq!(chi.n_spacings, n);
    assert!(chi.poisson < CHI2_POISSON_CRITICAL, "chi2 {}", chi.poisson);
    assert!(chi.goe > 200.0);

    // Wigner surmise spacing quantiles
    let goeish: Vec<f64> = (0..n)
        .map(|i| {
            let q = (i as f64 + 0.5) / n as f64;
            (-(4.0 / std::f64::consts::PI) * (1.0 - q).ln()).sqrt()
        })
        .collect();
    let chi = nnsd_chi2(&goeish);
    assert!(chi.goe < CHI2_POISSON_CRITICAL, "chi2 {}", chi.goe);
    assert!(chi.poisson > 200.0);
}

/// A dense symmetric Gaussian matrix is the GOE itself, so after
/// unfolding its spacings must sit far closer to the Wigner surmise
/// than to the Poisson curve.
#[test]
fn gaussian_ensemble_spacings_look_goe_not_poisson() -> anyhow::Result<()> {
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use rand_distr::StandardNormal;

    let n = 300;
    let mut rng = StdRng::seed_from_u64(7);
    let mut adj = DMatrix::<f64>::zeros(n, n);
    for i in 0..n {
        for j in 0..=i {
            let v: f64 = rng.sample(StandardNormal);
            adj[(i, j)] = v;
            adj[(j, i)] = v;
        }
    }

    let evs = dedup_eigenvalues(sorted_eigenvalues(&adj)?, 1e-6);
    let unfolded = unfold_spectrum(&evs)?;
    let spacings = nn_spacings(&unfolded);
    let chi = nnsd_chi2(&spacings);

    assert!(
        chi.goe < chi.poisson,
        "chi2[goe] {} should undercut chi2[poisson] {}",
        chi.goe,
        chi.poisson
    );
    Ok(())
}

/// Deterministic scores for the pruning tests.
fn synthetic_score(j: usize, k: usize) -> f32 {
    ((j * 7 + k * 13) % 10) as f32 / 10.0
}

fn write_synthetic_matrix(dir: &Path, num_genes: usize, rows_per_block: usize) -> anyhow::Result<SimMatrixReader> {
    fs::create_dir_all(dir.join(PC.dir_name()))?;
    let layout = BlockLayout::with_rows_per_block(num_genes, rows_per_block);

    for b in 0..layout.num_blocks() {
        let (r0, rows) = layout.block_rows(b);
        let mut w = SimBlockWriter::create(
            &block_path(dir, "syn", PC, b),
            num_genes,
            r0,
            rows,
        )?;
        for j in r0..r0 + rows {
            let row: Vec<f32> = (0..=j)
                .map(|k| if j == k { 1.0 } else { synthetic_score(j, k) })
                .collect();
            w.write_row(&row)?;
        }
        w.finish()?;
    }

    Ok(SimMatrixReader::new(dir, "syn", PC, layout))
}

#[test]
fn pruned_size_is_monotone_in_the_threshold() -> anyhow::Result<()> {
    let tmp = tempdir()?;
    let reader = write_synthetic_matrix(tmp.path(), 12, 5)?;

    let mut previous = usize::MAX;
    for th in [0.2, 0.5, 0.8, 0.95] {
        let adj = build_pruned_adjacency(&reader, th)?;
        let n = adj.nrows();
        assert!(n <= previous, "N grew from {} to {} at t={}", previous, n, th);
        previous = n;

        // symmetric, zero diagonal, entries are |s| at or above t
        for i in 0..n {
            assert_eq!(adj[(i, i)], 0.0);
            for j in 0..i {
                assert_eq!(adj[(i, j)], adj[(j, i)]);
                let v = adj[(i, j)];
                assert!(v == 0.0 || v >= th);
            }
        }
    }
    Ok(())
}

#[test]
fn pruned_entries_match_the_stored_triangle() -> anyhow::Result<()> {
    let tmp = tempdir()?;
    let reader = write_synthetic_matrix(tmp.path(), 12, 5)?;

    let th = 0.7;
    let adj = build_pruned_adjacency(&reader, th)?;

    // every retained gene has at least one edge
    let n = adj.nrows();
    for i in 0..n {
        let degree = (0..n).filter(|&j| adj[(i, j)] > 0.0).count();
        assert!(degree > 0, "gene {} retained without edges", i);
    }

    // edge count agrees with a direct scan of the scores
    let mut expected = 0;
    for j in 0..12 {
        for k in 0..j {
            if synthetic_score(j, k) as f64 >= th {
                expected += 1;
            }
        }
    }
    let stored = (0..n)
        .map(|i| (0..i).filter(|&j| adj[(i, j)] > 0.0).count())
        .sum::<usize>();
    assert_eq!(stored, expected);
    Ok(())
}

#[test]
fn scan_fails_cleanly_when_the_matrix_stays_small() -> anyhow::Result<()> {
    let tmp = tempdir()?;
    // far fewer than the 100 genes the spacing statistics need
    let reader = write_synthetic_matrix(tmp.path(), 12, 5)?;

    let opts = RmtScanOpts {
        th_start: 0.9,
        th_step: 0.1,
        chi_sought: 200.0,
        th_floor: 0.5,
    };
    let err = find_threshold(&reader, &opts).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::RmtNoCrossover(_))
    ));
    Ok(())
}
