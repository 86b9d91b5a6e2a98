//! Small dense linear algebra helpers over nalgebra

use nalgebra::{DMatrix, DVector};
use ndarray::ArrayView2;

pub fn to_dmatrix(a: &ArrayView2<'_, f64>) -> DMatrix<f64> {
    DMatrix::from_fn(a.nrows(), a.ncols(), |i, j| a[[i, j]])
}

/// X' diag(w) X
pub fn weighted_gram(x: &ArrayView2<'_, f64>, w: &[f64]) -> DMatrix<f64> {
    let p = x.ncols();
    let mut g = DMatrix::zeros(p, p);
    for (row, &wi) in x.rows().into_iter().zip(w) {
        for a in 0..p {
            let ra = row[a] * wi;
            if ra == 0.0 {
                continue;
            }
            for b in a..p {
                g[(a, b)] += ra * row[b];
            }
        }
    }
    for a in 0..p {
        for b in 0..a {
            g[(a, b)] = g[(b, a)];
        }
    }
    g
}

/// Solve a symmetric positive definite system, falling back to LU
pub fn solve_spd(a: &DMatrix<f64>, b: &DVector<f64>) -> Option<DVector<f64>> {
    match a.clone().cholesky() {
        Some(chol) => Some(chol.solve(b)),
        None => a.clone().lu().solve(b),
    }
}

/// Inverse of a symmetric positive definite matrix, falling back to LU
pub fn inverse_spd(a: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    match a.clone().cholesky() {
        Some(chol) => Some(chol.inverse()),
        None => a.clone().try_inverse(),
    }
}

/// ln det of a symmetric positive definite matrix; None if not positive definite
pub fn log_det_spd(a: &DMatrix<f64>) -> Option<f64> {
    let chol = a.clone().cholesky()?;
    let l = chol.l();
    Some(2.0 * (0..l.nrows()).map(|i| l[(i, i)].ln()).sum::<f64>())
}
