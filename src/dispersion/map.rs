//! Maximum a posteriori dispersion shrinkage toward the trend

use ndarray::{Array1, ArrayView1, ArrayView2};
use rayon::prelude::*;

use super::{maximize_log_alpha, DispersionParams};
use crate::glm::{dispersion_log_posterior, LogNormalPrior};
use crate::stats::{mad, trigamma};

/// Spread of the log gene-wise estimates around the trend, and the prior
/// variance derived from it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorVariance {
    /// Squared MAD of `ln(gene) - ln(trend)`
    pub var_log_disp_ests: f64,
    pub prior_var: f64,
}

/// Estimate the prior variance of `ln(alpha)` around the trend.
///
/// The sampling variance of a log dispersion estimate, `trigamma((m - p) / 2)`,
/// is subtracted from the observed spread; the result is floored at
/// `params.min_prior_var`.
pub fn estimate_prior_variance(
    gene_dispersions: &[f64],
    trended: &[f64],
    n_samples: usize,
    n_coefs: usize,
    params: &DispersionParams,
) -> PriorVariance {
    let residuals: Vec<f64> = gene_dispersions
        .iter()
        .zip(trended)
        .filter(|(&g, &t)| g.is_finite() && t > 0.0 && g >= 100.0 * params.min_disp)
        .map(|(&g, &t)| g.ln() - t.ln())
        .collect();

    let var_log_disp_ests = if residuals.len() >= 2 {
        mad(&residuals).powi(2)
    } else {
        0.0
    };

    if n_samples <= n_coefs || residuals.len() < 2 {
        log::debug!("Using the minimum dispersion prior variance {}", params.min_prior_var);
        return PriorVariance {
            var_log_disp_ests,
            prior_var: params.min_prior_var,
        };
    }

    let expected = trigamma((n_samples - n_coefs) as f64 / 2.0);
    let prior_var = (var_log_disp_ests - expected).max(params.min_prior_var);
    log::debug!(
        "Dispersion prior: varLogDispEsts={:.4}, expected sampling variance={:.4}, prior variance={:.4}",
        var_log_disp_ests,
        expected,
        prior_var
    );
    PriorVariance {
        var_log_disp_ests,
        prior_var,
    }
}

/// Final dispersions with their outlier flags
#[derive(Debug, Clone)]
pub struct MapFit {
    pub dispersions: Array1<f64>,
    /// Genes whose gene-wise estimate lies far above the trend; these keep
    /// the gene-wise value
    pub outliers: Vec<bool>,
}

/// Maximize the posterior of `ln(alpha)` per gene under a normal prior
/// centred on the log trend.
pub fn estimate_map(
    counts: ArrayView2<'_, f64>,
    mu: ArrayView2<'_, f64>,
    design: ArrayView2<'_, f64>,
    gene_dispersions: ArrayView1<'_, f64>,
    trended: ArrayView1<'_, f64>,
    prior: PriorVariance,
    params: &DispersionParams,
) -> MapFit {
    let n_genes = counts.nrows();
    let max_disp = params.max_disp(counts.ncols());
    let outlier_cut = params.outlier_sd * prior.var_log_disp_ests.sqrt();

    let fits: Vec<(f64, bool)> = (0..n_genes)
        .into_par_iter()
        .map(|i| {
            let gene = gene_dispersions[i];
            let trend = trended[i];
            if !gene.is_finite() || !(trend > 0.0) {
                return (f64::NAN, false);
            }
            if gene.ln() - trend.ln() > outlier_cut {
                return (gene, true);
            }

            let log_prior = LogNormalPrior {
                mean: trend.ln(),
                variance: prior.prior_var,
            };
            let start = if gene > 0.1 * trend { gene } else { trend };
            let y = counts.row(i);
            let m = mu.row(i);
            let log_alpha = maximize_log_alpha(
                |la| dispersion_log_posterior(la, &y, &m, &design, Some(log_prior)),
                params.min_disp.ln(),
                max_disp.ln(),
                start.clamp(params.min_disp, max_disp).ln(),
                params,
            );
            (log_alpha.exp().clamp(params.min_disp, max_disp), false)
        })
        .collect();

    let (dispersions, outliers): (Vec<f64>, Vec<bool>) = fits.into_iter().unzip();
    let n_outliers = outliers.iter().filter(|o| **o).count();
    if n_outliers > 0 {
        log::info!("{} genes are dispersion outliers and keep their gene-wise estimate", n_outliers);
    }

    MapFit {
        dispersions: Array1::from(dispersions),
        outliers,
    }
}
