use ndarray::ArrayView1;

use crate::ematrix::EMatrix;

/// Aligned sample pairs for one gene pair: the samples missing in
/// neither row, in their original order. Built per comparison and
/// dropped right after; this is the only place sample filtering
/// happens, the kernels just consume `(x, y, n)`.
pub struct PairWiseSet {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub n: usize,
}

impl PairWiseSet {
    /// Pair up rows `j` and `k` of the matrix. A sample survives iff
    /// both values are present and, when `min_expr` is given, both are
    /// at or above that floor.
    pub fn build(ematrix: &EMatrix, j: usize, k: usize, min_expr: Option<f64>) -> Self {
        Self::from_rows(ematrix.row(j), ematrix.row(k), min_expr)
    }

    pub fn from_rows(
        row_x: ArrayView1<f64>,
        row_y: ArrayView1<f64>,
        min_expr: Option<f64>,
    ) -> Self {
        let mut x = Vec::with_capacity(row_x.len());
        let mut y = Vec::with_capacity(row_y.len());

        for (&a, &b) in row_x.iter().zip(row_y.iter()) {
            if a.is_nan() || b.is_nan() {
                continue;
            }
            if let Some(floor) = min_expr {
                if a < floor || b < floor {
                    continue;
                }
            }
            x.push(a);
            y.push(b);
        }

        let n = x.len();
        PairWiseSet { x, y, n }
    }
}
