//! GLM fitting using Iteratively Reweighted Least Squares (IRLS)

use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;

use super::design::{create_design_matrix, DesignInfo};
use super::linalg::{inverse_spd, solve_spd, to_dmatrix, weighted_gram};
use super::negative_binomial::{nb_log_likelihood_sum, nb_weight, LARGE_BETA, MIN_MU};
use crate::data::DgeDataSet;
use crate::error::{DgeError, Result};

/// Ridge penalty applied to every coefficient of an unpenalized fit (log2 scale)
pub const DEFAULT_RIDGE: f64 = 1e-6;

/// Configurable parameters for GLM fitting
#[derive(Debug, Clone)]
pub struct GlmFitParams {
    /// Maximum IRLS iterations
    pub maxit: usize,
    /// Relative deviance change that counts as converged
    pub beta_tol: f64,
}

impl Default for GlmFitParams {
    fn default() -> Self {
        Self {
            maxit: 100,
            beta_tol: 1e-8,
        }
    }
}

/// Fit of one gene
#[derive(Debug, Clone)]
pub struct GeneFit {
    /// Natural-log coefficients
    pub coefficients: Vec<f64>,
    pub standard_errors: Vec<f64>,
    pub mu: Vec<f64>,
    pub hat_diagonals: Vec<f64>,
    pub converged: bool,
    pub log_likelihood: f64,
}

/// Per-gene fits stacked into matrices
#[derive(Debug, Clone)]
pub struct GlmFitResult {
    pub coefficients: Array2<f64>,
    pub standard_errors: Array2<f64>,
    pub mu: Array2<f64>,
    pub hat_diagonals: Array2<f64>,
    pub converged: Vec<bool>,
}

/// Convert per-coefficient log2-scale ridge penalties to the natural-log scale
pub fn natural_log_lambda(lambda_log2: &[f64]) -> Vec<f64> {
    let ln2_sq = std::f64::consts::LN_2.powi(2);
    lambda_log2.iter().map(|l| l / ln2_sq).collect()
}

fn linear_predictor(design: &ArrayView2<'_, f64>, beta: &DVector<f64>, sf: &ArrayView1<'_, f64>) -> Vec<f64> {
    design
        .rows()
        .into_iter()
        .zip(sf.iter())
        .map(|(row, &s)| {
            let eta: f64 = row.iter().zip(beta.iter()).map(|(x, b)| x * b).sum();
            (s * eta.clamp(-700.0, 700.0).exp()).max(MIN_MU)
        })
        .collect()
}

/// Fit one gene by IRLS with a ridge penalty `lambda` (natural-log scale,
/// one entry per coefficient).
///
/// Standard errors use the sandwich form
/// `(X'WX + L)^-1 X'WX (X'WX + L)^-1`.
pub fn fit_single_gene(
    y: ArrayView1<'_, f64>,
    design: ArrayView2<'_, f64>,
    size_factors: ArrayView1<'_, f64>,
    alpha: f64,
    lambda: &[f64],
    params: &GlmFitParams,
) -> GeneFit {
    let n = y.len();
    let p = design.ncols();

    // Nothing to fit: every coefficient and fitted mean is zero
    if y.iter().all(|&c| c == 0.0) {
        return GeneFit {
            coefficients: vec![0.0; p],
            standard_errors: vec![0.0; p],
            mu: vec![0.0; n],
            hat_diagonals: vec![0.0; n],
            converged: true,
            log_likelihood: 0.0,
        };
    }

    let ridge = DMatrix::from_diagonal(&DVector::from_column_slice(lambda));

    // Start from least squares on log normalized counts
    let log_norm: Vec<f64> = y
        .iter()
        .zip(size_factors.iter())
        .map(|(&c, &s)| (c / s + 0.1).ln())
        .collect();
    let xtx = weighted_gram(&design, &vec![1.0; n]);
    let x = to_dmatrix(&design);
    let xty = x.transpose() * DVector::from_vec(log_norm);
    let mut beta = solve_spd(&xtx, &xty)
        .filter(|b| b.iter().all(|v| v.is_finite()))
        .unwrap_or_else(|| {
            let mut b = DVector::zeros(p);
            let mean = y.iter().zip(size_factors.iter()).map(|(c, s)| c / s).sum::<f64>() / n as f64;
            b[0] = mean.max(0.1).ln();
            b
        });

    let mut mu = linear_predictor(&design, &beta, &size_factors);
    let mut dev_old = 0.0;
    let mut converged = false;

    for iter in 0..params.maxit {
        let w: Vec<f64> = mu.iter().map(|&m| nb_weight(m, alpha)).collect();
        let z: Vec<f64> = (0..n)
            .map(|i| (mu[i] / size_factors[i]).ln() + (y[i] - mu[i]) / mu[i])
            .collect();
        let wz = DVector::from_iterator(n, w.iter().zip(&z).map(|(wi, zi)| wi * zi));
        let lhs = weighted_gram(&design, &w) + &ridge;
        let rhs = x.transpose() * wz;

        beta = match solve_spd(&lhs, &rhs) {
            Some(b) => b,
            None => break,
        };
        if beta.iter().any(|b| !b.is_finite() || b.abs() > LARGE_BETA) {
            break;
        }

        mu = linear_predictor(&design, &beta, &size_factors);
        let dev = -2.0 * nb_log_likelihood_sum(&y, &ArrayView1::from(&mu[..]), alpha);
        let conv = (dev - dev_old).abs() / (dev.abs() + 0.1);
        if conv.is_nan() {
            break;
        }
        if iter > 0 && conv < params.beta_tol {
            converged = true;
            break;
        }
        dev_old = dev;
    }

    let w: Vec<f64> = mu.iter().map(|&m| nb_weight(m, alpha)).collect();
    let xtwx = weighted_gram(&design, &w);
    let (standard_errors, hat_diagonals) = match inverse_spd(&(&xtwx + &ridge)) {
        Some(inv) => {
            let sandwich = &inv * &xtwx * &inv;
            let se = (0..p).map(|k| sandwich[(k, k)].max(0.0).sqrt()).collect();
            let hat = design
                .rows()
                .into_iter()
                .zip(&w)
                .map(|(row, &wi)| {
                    let xi = DVector::from_iterator(p, row.iter().copied());
                    wi * (xi.transpose() * &inv * &xi)[(0, 0)]
                })
                .collect();
            (se, hat)
        }
        None => (vec![f64::NAN; p], vec![f64::NAN; n]),
    };

    let log_likelihood = nb_log_likelihood_sum(&y, &ArrayView1::from(&mu[..]), alpha);
    GeneFit {
        coefficients: beta.iter().copied().collect(),
        standard_errors,
        mu,
        hat_diagonals,
        converged,
        log_likelihood,
    }
}

/// Fit every gene (rows of `counts`) in parallel
pub fn fit_nb_glm(
    counts: ArrayView2<'_, f64>,
    size_factors: ArrayView1<'_, f64>,
    design: ArrayView2<'_, f64>,
    dispersions: ArrayView1<'_, f64>,
    lambda: &[f64],
    params: &GlmFitParams,
) -> GlmFitResult {
    let (n_genes, n_samples) = counts.dim();
    let p = design.ncols();

    let fits: Vec<GeneFit> = (0..n_genes)
        .into_par_iter()
        .map(|i| {
            fit_single_gene(
                counts.row(i),
                design,
                size_factors,
                dispersions[i],
                lambda,
                params,
            )
        })
        .collect();

    let mut result = GlmFitResult {
        coefficients: Array2::zeros((n_genes, p)),
        standard_errors: Array2::zeros((n_genes, p)),
        mu: Array2::zeros((n_genes, n_samples)),
        hat_diagonals: Array2::zeros((n_genes, n_samples)),
        converged: Vec::with_capacity(n_genes),
    };
    for (i, fit) in fits.into_iter().enumerate() {
        result
            .coefficients
            .row_mut(i)
            .assign(&Array1::from(fit.coefficients));
        result
            .standard_errors
            .row_mut(i)
            .assign(&Array1::from(fit.standard_errors));
        result.mu.row_mut(i).assign(&Array1::from(fit.mu));
        result
            .hat_diagonals
            .row_mut(i)
            .assign(&Array1::from(fit.hat_diagonals));
        result.converged.push(fit.converged);
    }
    result
}

/// Fit the negative binomial GLM for every gene of the dataset and store
/// coefficients, standard errors, fitted means and hat diagonals.
pub fn fit_glm(dds: &mut DgeDataSet, params: &GlmFitParams) -> Result<DesignInfo> {
    let size_factors = dds.size_factors().cloned().ok_or_else(|| DgeError::InvalidInput {
        reason: "size factors must be estimated before fitting the GLM".to_string(),
    })?;
    let dispersions = dds.dispersions().cloned().ok_or_else(|| DgeError::InvalidInput {
        reason: "dispersions must be estimated before fitting the GLM".to_string(),
    })?;

    let (design, info) = create_design_matrix(dds)?;
    let lambda = natural_log_lambda(&vec![DEFAULT_RIDGE; design.ncols()]);

    let fit = fit_nb_glm(
        dds.model_counts(),
        size_factors.view(),
        design.view(),
        dispersions.view(),
        &lambda,
        params,
    );

    let n_unconverged = fit.converged.iter().filter(|c| !**c).count();
    if n_unconverged > 0 {
        log::warn!("{} genes did not converge in the GLM fit", n_unconverged);
    }
    log::debug!(
        "GLM fit: {} genes, {} coefficients ({})",
        dds.n_genes(),
        design.ncols(),
        info.coef_names.join(", ")
    );

    dds.set_design(design, info.coef_names.clone())?;
    dds.set_coefficients(fit.coefficients)?;
    dds.set_standard_errors(fit.standard_errors)?;
    dds.set_mu(fit.mu)?;
    dds.set_hat_diagonals(fit.hat_diagonals)?;
    dds.set_converged(fit.converged)?;

    Ok(info)
}

/// Overwrite the fit of selected genes, e.g. after outlier replacement
pub(crate) fn merge_rows(target: &mut Array2<f64>, rows: &[usize], source: &Array2<f64>) {
    for (k, &i) in rows.iter().enumerate() {
        target.row_mut(i).assign(&source.index_axis(Axis(0), k));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn two_group_design() -> Array2<f64> {
        array![[1.0, 0.0], [1.0, 0.0], [1.0, 1.0], [1.0, 1.0]]
    }

    #[test]
    fn test_fit_recovers_group_means() {
        let y = array![100.0, 100.0, 200.0, 200.0];
        let sf = array![1.0, 1.0, 1.0, 1.0];
        let design = two_group_design();
        let lambda = natural_log_lambda(&[DEFAULT_RIDGE; 2]);
        let fit = fit_single_gene(
            y.view(),
            design.view(),
            sf.view(),
            0.01,
            &lambda,
            &GlmFitParams::default(),
        );
        assert!(fit.converged);
        assert!((fit.coefficients[0] - 100.0_f64.ln()).abs() < 1e-4);
        assert!((fit.coefficients[1] / std::f64::consts::LN_2 - 1.0).abs() < 1e-4);
        assert!(fit.standard_errors.iter().all(|s| *s > 0.0));
        // Saturated two-group model: leverages sum to the number of coefficients
        let h: f64 = fit.hat_diagonals.iter().sum();
        assert!((h - 2.0).abs() < 1e-4);
    }

    #[test]
    fn test_size_factors_enter_as_offsets() {
        let y = array![50.0, 50.0, 200.0, 200.0];
        let sf = array![0.5, 0.5, 1.0, 1.0];
        let design = two_group_design();
        let lambda = natural_log_lambda(&[DEFAULT_RIDGE; 2]);
        let fit = fit_single_gene(y.view(), design.view(), sf.view(), 0.05, &lambda, &GlmFitParams::default());
        assert!((fit.coefficients[1] / std::f64::consts::LN_2 - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_strong_ridge_shrinks_coefficient() {
        let y = array![10.0, 12.0, 30.0, 28.0];
        let sf = array![1.0, 1.0, 1.0, 1.0];
        let design = two_group_design();
        let params = GlmFitParams::default();
        let weak = fit_single_gene(y.view(), design.view(), sf.view(), 0.1, &natural_log_lambda(&[1e-6, 1e-6]), &params);
        let strong = fit_single_gene(y.view(), design.view(), sf.view(), 0.1, &natural_log_lambda(&[1e-6, 50.0]), &params);
        assert!(strong.coefficients[1].abs() < weak.coefficients[1].abs());
        assert!(strong.coefficients[1] > 0.0);
    }

    #[test]
    fn test_fit_all_genes() {
        let counts = array![[100.0, 100.0, 200.0, 200.0], [80.0, 90.0, 40.0, 45.0]];
        let sf = array![1.0, 1.0, 1.0, 1.0];
        let disp = array![0.01, 0.02];
        let design = two_group_design();
        let lambda = natural_log_lambda(&[DEFAULT_RIDGE; 2]);
        let fit = fit_nb_glm(counts.view(), sf.view(), design.view(), disp.view(), &lambda, &GlmFitParams::default());
        assert_eq!(fit.coefficients.dim(), (2, 2));
        assert!(fit.coefficients[[0, 1]] > 0.0);
        assert!(fit.coefficients[[1, 1]] < 0.0);
        assert_eq!(fit.mu.dim(), (2, 4));
    }
}
