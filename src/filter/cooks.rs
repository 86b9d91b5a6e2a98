//! Cook's distance outlier detection, count replacement and refitting
//!
//! Cook's distance measures how strongly one sample moves a gene's fit:
//! `(y - mu)^2 / (mu + alpha mu^2) / p * h / (1 - h)^2`, with `alpha` a
//! robust moments estimate that an outlier cannot inflate.

use ndarray::{Array1, Array2, ArrayView2, Axis};
use rayon::prelude::*;
use statrs::distribution::{ContinuousCDF, FisherSnedecor};

use crate::data::DgeDataSet;
use crate::dispersion::{reestimate_dispersions, DispersionParams};
use crate::error::{DgeError, Result};
use crate::glm::{fit_nb_glm, merge_rows, natural_log_lambda, GlmFitParams, DEFAULT_RIDGE};
use crate::stats::trimmed_mean;

/// Replicates a level needs before its outlier counts are replaced
pub const MIN_REPLICATES_FOR_REPLACE: usize = 7;

/// Replicates a level needs before its samples count toward Cook's filtering
pub const MIN_REPLICATES_FOR_COOKS: usize = 3;

/// Floor of the robust moments dispersion
const MIN_MOM_DISP: f64 = 0.04;

/// Replicates per level, indexed like `groups`
fn group_sizes(groups: &[usize]) -> Vec<usize> {
    let n_groups = groups.iter().copied().max().map_or(0, |g| g + 1);
    let mut sizes = vec![0; n_groups];
    for &g in groups {
        sizes[g] += 1;
    }
    sizes
}

/// `(trim, scale)` for a trimmed variance over `n` values
fn trim_constants(n: usize) -> (f64, f64) {
    if n <= 3 {
        (1.0 / 3.0, 2.04)
    } else if n <= 23 {
        (1.0 / 4.0, 1.86)
    } else {
        (1.0 / 8.0, 1.51)
    }
}

fn trimmed_variance_of(values: &[f64], trim: f64, scale: f64) -> f64 {
    let center = trimmed_mean(values, trim);
    let sq: Vec<f64> = values.iter().map(|v| (v - center).powi(2)).collect();
    scale * trimmed_mean(&sq, trim)
}

/// Per-gene dispersion from a trimmed variance: the largest within-level
/// trimmed variance over levels with at least three samples, or a trimmed
/// variance over all samples when no level is that large.
pub fn robust_method_of_moments_disp(normalized: ArrayView2<'_, f64>, groups: &[usize]) -> Vec<f64> {
    let sizes = group_sizes(groups);
    let eligible: Vec<usize> = (0..sizes.len())
        .filter(|&g| sizes[g] >= MIN_REPLICATES_FOR_COOKS)
        .collect();

    normalized
        .axis_iter(Axis(0))
        .map(|row| {
            let values = row.to_vec();
            let variance = if eligible.is_empty() {
                trimmed_variance_of(&values, 1.0 / 8.0, 1.51)
            } else {
                eligible
                    .iter()
                    .map(|&g| {
                        let cell: Vec<f64> = values
                            .iter()
                            .zip(groups)
                            .filter(|(_, &sg)| sg == g)
                            .map(|(&v, _)| v)
                            .collect();
                        let (trim, scale) = trim_constants(cell.len());
                        trimmed_variance_of(&cell, trim, scale)
                    })
                    .fold(0.0, f64::max)
            };
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            if mean > 0.0 {
                ((variance - mean) / (mean * mean)).max(MIN_MOM_DISP)
            } else {
                MIN_MOM_DISP
            }
        })
        .collect()
}

/// Cook's distances (genes x samples) for the dataset's current fit
pub fn calculate_cooks_distance(dds: &DgeDataSet) -> Result<Array2<f64>> {
    let missing = |what: &str| DgeError::InvalidInput {
        reason: format!("{} required for Cook's distances", what),
    };
    let mu = dds.mu().ok_or_else(|| missing("fitted means"))?;
    let hat = dds.hat_diagonals().ok_or_else(|| missing("hat diagonals"))?;
    let normalized = dds.normalized_counts().ok_or_else(|| missing("normalized counts"))?;
    let n_coefs = dds
        .design_matrix()
        .ok_or_else(|| missing("a design matrix"))?
        .ncols() as f64;

    let counts = dds.model_counts();
    let alphas = robust_method_of_moments_disp(normalized.view(), &dds.sample_groups());
    let (n_genes, n_samples) = counts.dim();

    let rows: Vec<Vec<f64>> = (0..n_genes)
        .into_par_iter()
        .map(|i| {
            let alpha = alphas[i];
            (0..n_samples)
                .map(|j| {
                    let (y, m, h) = (counts[[i, j]], mu[[i, j]], hat[[i, j]]);
                    let pearson_sq = (y - m).powi(2) / (m + alpha * m * m);
                    pearson_sq / n_coefs * h / (1.0 - h).powi(2)
                })
                .collect()
        })
        .collect();

    let mut cooks = Array2::zeros((n_genes, n_samples));
    for (i, row) in rows.into_iter().enumerate() {
        cooks.row_mut(i).assign(&Array1::from(row));
    }
    Ok(cooks)
}

/// 99% quantile of F(p, m - p); infinite when there are no residual degrees
/// of freedom
pub fn cooks_cutoff(n_samples: usize, n_coefs: usize) -> f64 {
    if n_samples <= n_coefs {
        return f64::INFINITY;
    }
    match FisherSnedecor::new(n_coefs as f64, (n_samples - n_coefs) as f64) {
        Ok(f) => f.inverse_cdf(0.99),
        Err(_) => f64::INFINITY,
    }
}

/// Largest Cook's distance per gene over samples in levels with at least
/// three replicates, with the sample it occurs in. `None` when no sample
/// qualifies.
pub fn max_cooks(cooks: &Array2<f64>, groups: &[usize]) -> Vec<Option<(usize, f64)>> {
    let sizes = group_sizes(groups);
    let eligible: Vec<usize> = (0..groups.len())
        .filter(|&j| sizes[groups[j]] >= MIN_REPLICATES_FOR_COOKS)
        .collect();

    cooks
        .axis_iter(Axis(0))
        .map(|row| {
            eligible
                .iter()
                .map(|&j| (j, row[j]))
                .filter(|(_, c)| c.is_finite())
                .fold(None, |best: Option<(usize, f64)>, (j, c)| match best {
                    Some((_, b)) if b >= c => best,
                    _ => Some((j, c)),
                })
        })
        .collect()
}

/// Genes whose p-values should be discarded because of a Cook's outlier.
///
/// With a two-level factor a gene is kept when at least three samples have
/// a count above the outlier sample's count.
pub fn cooks_outliers(dds: &DgeDataSet, cutoff: f64) -> Vec<bool> {
    let cooks = match dds.cooks() {
        Some(c) => c,
        None => return vec![false; dds.n_genes()],
    };
    let counts = dds.model_counts();
    let two_level = dds.levels().len() == 2;

    max_cooks(cooks, &dds.sample_groups())
        .into_iter()
        .enumerate()
        .map(|(i, max)| match max {
            Some((j, c)) if c > cutoff => {
                if two_level {
                    let outlier_count = counts[[i, j]];
                    let n_above = counts.row(i).iter().filter(|&&y| y > outlier_count).count();
                    n_above < 3
                } else {
                    true
                }
            }
            _ => false,
        })
        .collect()
}

/// Counts with outliers replaced, and which cells were replaced.
///
/// Only samples of levels with at least seven replicates are replaced, by
/// the 20%-trimmed mean of the gene's normalized counts times the sample's
/// size factor, truncated to an integer.
pub fn replace_outliers(dds: &DgeDataSet, cutoff: f64) -> Result<(Array2<f64>, Array2<bool>)> {
    let missing = |what: &str| DgeError::InvalidInput {
        reason: format!("{} required to replace outliers", what),
    };
    let cooks = dds.cooks().ok_or_else(|| missing("Cook's distances"))?;
    let size_factors = dds.size_factors().ok_or_else(|| missing("size factors"))?;
    let normalized = dds.normalized_counts().ok_or_else(|| missing("normalized counts"))?;

    let groups = dds.sample_groups();
    let sizes = group_sizes(&groups);
    let replaceable: Vec<bool> = groups
        .iter()
        .map(|&g| sizes[g] >= MIN_REPLICATES_FOR_REPLACE)
        .collect();

    let mut counts = dds.model_counts().to_owned();
    let mut replaced = Array2::from_elem(counts.dim(), false);
    if !replaceable.iter().any(|r| *r) {
        return Ok((counts, replaced));
    }

    for (i, norm_row) in normalized.axis_iter(Axis(0)).enumerate() {
        let mut trimmed_base_mean = None;
        for j in 0..counts.ncols() {
            let c = cooks[[i, j]];
            if replaceable[j] && c.is_finite() && c > cutoff {
                let tbm = *trimmed_base_mean.get_or_insert_with(|| trimmed_mean(&norm_row.to_vec(), 0.2));
                counts[[i, j]] = (tbm * size_factors[j]).floor();
                replaced[[i, j]] = true;
            }
        }
    }
    Ok((counts, replaced))
}

/// Replace outlier counts and refit the affected genes: dispersions are
/// re-estimated against the original trend and prior, then the GLM is refit
/// and Cook's distances are recomputed, with replaced cells set to zero.
///
/// Returns the indices of the refit genes.
pub fn refit_without_outliers(
    dds: &mut DgeDataSet,
    dispersion_params: &DispersionParams,
    glm_params: &GlmFitParams,
) -> Result<Vec<usize>> {
    let n_coefs = dds
        .design_matrix()
        .map(|d| d.ncols())
        .ok_or_else(|| DgeError::InvalidInput {
            reason: "the GLM must be fit before refitting outliers".to_string(),
        })?;
    let cutoff = cooks_cutoff(dds.n_samples(), n_coefs);

    let (counts, replaced_cells) = replace_outliers(dds, cutoff)?;
    let flags: Vec<bool> = replaced_cells
        .axis_iter(Axis(0))
        .map(|row| row.iter().any(|r| *r))
        .collect();
    let rows: Vec<usize> = flags
        .iter()
        .enumerate()
        .filter(|(_, f)| **f)
        .map(|(i, _)| i)
        .collect();

    if rows.is_empty() {
        log::debug!("No outlier counts to replace");
        return Ok(rows);
    }
    log::info!(
        "Replacing outliers and refitting {} genes (Cook's cutoff {:.3})",
        rows.len(),
        cutoff
    );

    dds.set_replaced_counts(counts, flags)?;
    reestimate_dispersions(dds, &rows, dispersion_params)?;

    let missing = |what: &str| DgeError::InvalidInput {
        reason: format!("{} missing during the outlier refit", what),
    };
    let size_factors = dds.size_factors().cloned().ok_or_else(|| missing("size factors"))?;
    let design = dds.design_matrix().cloned().ok_or_else(|| missing("design matrix"))?;
    let dispersions = dds.dispersions().ok_or_else(|| missing("dispersions"))?.select(Axis(0), &rows);
    let sub_counts = dds.model_counts().select(Axis(0), &rows);
    let lambda = natural_log_lambda(&vec![DEFAULT_RIDGE; n_coefs]);

    let fit = fit_nb_glm(
        sub_counts.view(),
        size_factors.view(),
        design.view(),
        dispersions.view(),
        &lambda,
        glm_params,
    );

    let mut coefficients = dds.coefficients().cloned().ok_or_else(|| missing("coefficients"))?;
    let mut standard_errors = dds.standard_errors().cloned().ok_or_else(|| missing("standard errors"))?;
    let mut mu = dds.mu().cloned().ok_or_else(|| missing("fitted means"))?;
    let mut hat = dds.hat_diagonals().cloned().ok_or_else(|| missing("hat diagonals"))?;
    let mut converged = dds.converged().cloned().ok_or_else(|| missing("convergence flags"))?;

    merge_rows(&mut coefficients, &rows, &fit.coefficients);
    merge_rows(&mut standard_errors, &rows, &fit.standard_errors);
    merge_rows(&mut mu, &rows, &fit.mu);
    merge_rows(&mut hat, &rows, &fit.hat_diagonals);
    for (k, &i) in rows.iter().enumerate() {
        converged[i] = fit.converged[k];
    }

    dds.set_coefficients(coefficients)?;
    dds.set_standard_errors(standard_errors)?;
    dds.set_mu(mu)?;
    dds.set_hat_diagonals(hat)?;
    dds.set_converged(converged)?;

    let mut cooks = calculate_cooks_distance(dds)?;
    cooks.zip_mut_with(&replaced_cells, |c, &r| {
        if r {
            *c = 0.0;
        }
    });
    dds.set_cooks(cooks)?;

    Ok(rows)
}
