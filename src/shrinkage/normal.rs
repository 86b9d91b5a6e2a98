//! Normal-prior empirical Bayes shrinkage of log fold changes
//!
//! A zero-centred normal prior is fitted to the MLE fold changes, then every
//! gene is refit with the prior as a ridge penalty. Genes with little
//! information (low counts, high dispersion) move most toward zero.

use std::f64::consts::{LN_2, LOG2_E};

use ndarray::Axis;

use crate::data::DgeDataSet;
use crate::error::{DgeError, Result};
use crate::glm::{fit_nb_glm, natural_log_lambda, DesignInfo, GlmFitParams, DEFAULT_RIDGE};
use crate::io::ResultsTable;
use crate::stats::match_weighted_upper_quantile_for_variance;

/// Share of the weighted |LFC| distribution above the prior's 97.5% point
pub const DEFAULT_UPPER_QUANTILE: f64 = 0.05;

/// Prior variance (log2 scale) of one coefficient from the MLE estimates,
/// weighting each gene by `1 / (1 / baseMean + trended dispersion)`.
/// Estimates with `|lfc| >= 10` and genes with a zero base mean are ignored.
pub fn beta_prior_variance(
    log2_coefficients: &[f64],
    base_means: &[f64],
    trended: &[f64],
    upper_quantile: f64,
) -> f64 {
    let (betas, weights): (Vec<f64>, Vec<f64>) = log2_coefficients
        .iter()
        .zip(base_means.iter().zip(trended))
        .filter(|(b, (m, t))| b.is_finite() && b.abs() < 10.0 && **m > 0.0 && t.is_finite())
        .map(|(&b, (&m, &t))| (b, 1.0 / (1.0 / m + t)))
        .unzip();

    if betas.is_empty() {
        return 1e6;
    }
    match_weighted_upper_quantile_for_variance(&betas, &weights, upper_quantile)
}

/// Shrink the fold changes of `table`, which must report `coefficient`
/// (either direction), and return a new table. `table` is left untouched;
/// only the fold change and its standard error differ in the result.
pub fn shrink_lfc(
    dds: &DgeDataSet,
    design_info: &DesignInfo,
    table: &ResultsTable,
    coefficient: &str,
) -> Result<ResultsTable> {
    let coef_idx = design_info.coef_index(coefficient)?;
    let coef_contrast = design_info.contrast_for(coefficient)?;
    let table_contrast = table.contrast();
    let sign = if *table_contrast == coef_contrast {
        1.0
    } else if table_contrast.numerator == coef_contrast.denominator
        && table_contrast.denominator == coef_contrast.numerator
    {
        -1.0
    } else {
        return Err(DgeError::InvalidContrast {
            reason: format!(
                "table reports '{}' but coefficient '{}' was requested",
                table_contrast.name(),
                coefficient
            ),
        });
    };
    if table.n_genes() != dds.n_genes() {
        return Err(DgeError::DimensionMismatch {
            expected: format!("{} genes", dds.n_genes()),
            got: format!("{}", table.n_genes()),
        });
    }

    let missing = |what: &str| DgeError::InvalidInput {
        reason: format!("{} required for fold change shrinkage", what),
    };
    let coefficients = dds.coefficients().ok_or_else(|| missing("GLM coefficients"))?;
    let trended = dds.trended_dispersions().ok_or_else(|| missing("trended dispersions"))?;
    let dispersions = dds.dispersions().ok_or_else(|| missing("dispersions"))?;
    let size_factors = dds.size_factors().ok_or_else(|| missing("size factors"))?;
    let design = dds.design_matrix().ok_or_else(|| missing("a design matrix"))?;

    let base_means = table.base_means();
    let trended = trended.to_vec();
    let n_coefs = design.ncols();

    let mut lambda_log2 = vec![DEFAULT_RIDGE; n_coefs];
    for (k, lambda) in lambda_log2.iter_mut().enumerate().skip(1) {
        let betas: Vec<f64> = coefficients
            .index_axis(Axis(1), k)
            .iter()
            .map(|b| b * LOG2_E)
            .collect();
        let prior_var = beta_prior_variance(&betas, base_means, &trended, DEFAULT_UPPER_QUANTILE);
        log::info!("Fold change prior variance for {}: {:.6}", design_info.coef_names[k], prior_var);
        *lambda = 1.0 / prior_var;
    }

    let fit = fit_nb_glm(
        dds.model_counts(),
        size_factors.view(),
        design.view(),
        dispersions.view(),
        &natural_log_lambda(&lambda_log2),
        &GlmFitParams::default(),
    );

    let (lfc, se): (Vec<f64>, Vec<f64>) = (0..dds.n_genes())
        .map(|i| {
            if base_means[i] == 0.0 {
                (f64::NAN, f64::NAN)
            } else {
                (
                    sign * fit.coefficients[[i, coef_idx]] / LN_2,
                    fit.standard_errors[[i, coef_idx]] / LN_2,
                )
            }
        })
        .unzip();

    table.with_shrunken_lfc(lfc, se)
}
