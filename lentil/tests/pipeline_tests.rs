use std::fs;
use std::path::Path;

use tempfile::tempdir;

use ematrix_util::ematrix::{EMatrix, LoadOpts, Transform};
use ematrix_util::error::EMatrixError;
use ematrix_util::pairwise::PairWiseSet;
use ematrix_util::similarity::{pairwise_score, MiParams, SimilarityMethod};
use lentil::common::EMatrixArgs;
use lentil::error::PipelineError;
use lentil::run_extract::{run_extract, ExtractArgs};
use lentil::run_similarity::{run_similarity, SimilarityArgs};
use lentil::run_threshold::{run_threshold, ThresholdArgs};
use lentil::sim_blocks::{BlockLayout, SimMatrixReader};

const EXPR: &str = "\
g0 NA NA NA NA NA NA 1.0 2.0
g1 0.5 1.5 2.5 3.0 4.0 5.5 6.0 7.5
g2 7.0 6.0 5.0 4.5 3.5 2.0 1.5 0.5
g3 1.0 2.0 1.5 3.5 2.5 4.5 3.0 5.0
g4 2.0 2.0 3.0 3.0 4.0 4.0 5.0 5.0
g5 0.3 0.6 0.9 1.2 1.8 2.2 2.9 3.1
";

fn write_expression(dir: &Path) -> anyhow::Result<std::path::PathBuf> {
    let path = dir.join("expr.txt");
    fs::write(&path, EXPR)?;
    Ok(path)
}

fn ematrix_args(path: &Path) -> EMatrixArgs {
    EMatrixArgs {
        ematrix: path.to_string_lossy().into(),
        rows: 6,
        cols: 9,
        headers: false,
        omit_na: true,
        na_val: Some("NA".into()),
        func: "none".into(),
    }
}

fn similarity_args(path: &Path, outdir: &Path) -> SimilarityArgs {
    SimilarityArgs {
        ematrix: ematrix_args(path),
        method: vec!["pc".into(), "sc".into(), "mi".into()],
        min_obs: 3,
        mi_bins: 10,
        mi_degree: 3,
        th: None,
        hist: true,
        block_size: 2,
        outdir: outdir.to_string_lossy().into(),
    }
}

fn load_expression(path: &Path) -> anyhow::Result<EMatrix> {
    let opts = LoadOpts {
        rows: 6,
        cols: 9,
        headers: false,
        omit_na: true,
        na_val: Some("NA".into()),
        transform: Transform::None,
    };
    EMatrix::from_file(path.to_str().unwrap(), &opts)
}

/// Every method gets its own block file, and every stored cell matches
/// a fresh kernel computation bit for bit.
#[test]
fn similarity_blocks_round_trip() -> anyhow::Result<()> {
    let tmp = tempdir()?;
    let matrix_file = write_expression(tmp.path())?;

    run_similarity(&similarity_args(&matrix_file, tmp.path()))?;

    let ematrix = load_expression(&matrix_file)?;
    let mi_params = MiParams::default();
    let layout = BlockLayout::new(ematrix.num_genes());

    for method in [
        SimilarityMethod::Pearson,
        SimilarityMethod::Spearman,
        SimilarityMethod::Mi,
    ] {
        let block_file = tmp
            .path()
            .join(method.dir_name())
            .join(format!("expr.{}0.bin", method.code()));
        assert!(block_file.exists(), "missing {}", block_file.display());

        let reader = SimMatrixReader::new(tmp.path(), "expr", method, layout);
        for j in 0..ematrix.num_genes() {
            for k in 0..=j {
                let got = reader.cell(j, k)?;
                let expected = if j == k {
                    1.0f32
                } else {
                    let pws = PairWiseSet::build(&ematrix, j, k, None);
                    pairwise_score(method, &pws, 3, &mi_params) as f32
                };
                if expected.is_nan() {
                    assert!(got.is_nan(), "{:?} cell ({}, {})", method, j, k);
                } else {
                    assert_eq!(
                        got.to_bits(),
                        expected.to_bits(),
                        "{:?} cell ({}, {})",
                        method,
                        j,
                        k
                    );
                }
            }
        }

        // gene 0 shares too few samples with anyone
        assert!(reader.cell(1, 0)?.is_nan());

        let hist_file = tmp
            .path()
            .join(format!("expr.{}.corrhist.txt", method.code()));
        let body = fs::read_to_string(&hist_file)?;
        assert_eq!(body.lines().count(), 100);
    }

    Ok(())
}

#[test]
fn duplicate_methods_are_rejected() -> anyhow::Result<()> {
    let tmp = tempdir()?;
    let matrix_file = write_expression(tmp.path())?;

    let mut args = similarity_args(&matrix_file, tmp.path());
    args.method = vec!["pc".into(), "pc".into()];

    let err = run_similarity(&args).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::InvalidArgs(_))
    ));
    Ok(())
}

/// A six-gene matrix never reaches the hundred genes the spacing
/// statistics need, so the scan runs to its floor and reports failure.
#[test]
fn threshold_scan_fails_on_a_tiny_matrix() -> anyhow::Result<()> {
    let tmp = tempdir()?;
    let matrix_file = write_expression(tmp.path())?;
    run_similarity(&similarity_args(&matrix_file, tmp.path()))?;

    let args = ThresholdArgs {
        ematrix: ematrix_args(&matrix_file),
        method: "pc".into(),
        th_start: 0.9,
        th_step: 0.01,
        chi: 200.0,
        outdir: tmp.path().to_string_lossy().into(),
    };

    let err = run_threshold(&args).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::RmtNoCrossover(_))
    ));
    Ok(())
}

#[test]
fn extract_resolves_gene_names() -> anyhow::Result<()> {
    let tmp = tempdir()?;
    let matrix_file = write_expression(tmp.path())?;
    run_similarity(&similarity_args(&matrix_file, tmp.path()))?;

    let mut args = ExtractArgs {
        ematrix: ematrix_args(&matrix_file),
        method: "pc".into(),
        th: None,
        x: None,
        y: None,
        gene1: Some("g2".into()),
        gene2: Some("g1".into()),
        outdir: tmp.path().to_string_lossy().into(),
    };
    run_extract(&args)?;

    args.gene1 = Some("nope".into());
    let err = run_extract(&args).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<EMatrixError>(),
        Some(EMatrixError::UnknownGene(_))
    ));
    Ok(())
}

#[test]
fn extract_writes_the_edge_list() -> anyhow::Result<()> {
    let tmp = tempdir()?;
    let matrix_file = write_expression(tmp.path())?;
    run_similarity(&similarity_args(&matrix_file, tmp.path()))?;

    let args = ExtractArgs {
        ematrix: ematrix_args(&matrix_file),
        method: "pc".into(),
        th: Some(0.9),
        x: None,
        y: None,
        gene1: None,
        gene2: None,
        outdir: tmp.path().to_string_lossy().into(),
    };
    run_extract(&args)?;

    let edges_file = tmp.path().join("expr.pc.th0.9.coexpnet.edges.txt");
    assert!(edges_file.exists());

    // count the qualifying pairs straight from the kernels
    let ematrix = load_expression(&matrix_file)?;
    let mi_params = MiParams::default();
    let mut expected = 0;
    for j in 0..ematrix.num_genes() {
        for k in 0..j {
            let pws = PairWiseSet::build(&ematrix, j, k, None);
            let s = pairwise_score(SimilarityMethod::Pearson, &pws, 3, &mi_params) as f32;
            if s.abs() as f64 >= 0.9 {
                expected += 1;
            }
        }
    }

    let body = fs::read_to_string(&edges_file)?;
    assert_eq!(body.lines().count(), expected);
    for line in body.lines() {
        let fields: Vec<&str> = line.split('\t').collect();
        assert_eq!(fields.len(), 3);
        assert_ne!(fields[0], fields[1]);
        assert!(fields[2].parse::<f64>()?.abs() >= 0.9);
    }
    Ok(())
}
