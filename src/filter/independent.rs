//! Independent filtering on the mean of normalized counts
//!
//! Genes below a base-mean cut-off are excluded from the multiple-testing
//! adjustment. The cut-off is chosen among 50 quantiles of the base means
//! where a smoothed curve of BH rejections comes close to its maximum.

use crate::stats::{lowess, quantile_type7};
use crate::testing::benjamini_hochberg;

const N_THETA: usize = 50;

/// Outcome of independent filtering
#[derive(Debug, Clone)]
pub struct IndependentFilter {
    /// Adjusted p-values; NaN for genes below the cut-off
    pub padj: Vec<f64>,
    /// Quantile of the base means used as the cut-off
    pub theta: f64,
    pub cutoff: f64,
    /// Rejections at `alpha` with the chosen cut-off
    pub rejections: usize,
}

/// Choose a base-mean cut-off maximizing rejections at `alpha` and return the
/// adjusted p-values under it.
pub fn independent_filtering(pvalues: &[f64], base_means: &[f64], alpha: f64) -> IndependentFilter {
    let n = pvalues.len();
    let mut sorted: Vec<f64> = base_means.iter().copied().filter(|m| m.is_finite()).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));

    if n == 0 || sorted.is_empty() {
        return IndependentFilter {
            padj: benjamini_hochberg(pvalues),
            theta: 0.0,
            cutoff: 0.0,
            rejections: 0,
        };
    }

    let lower = base_means.iter().filter(|&&m| m == 0.0).count() as f64 / n as f64;
    let upper = if lower < 0.95 { 0.95 } else { 1.0 };
    let thetas: Vec<f64> = (0..N_THETA)
        .map(|i| lower + (upper - lower) * i as f64 / (N_THETA - 1) as f64)
        .collect();
    let cutoffs: Vec<f64> = thetas.iter().map(|&t| quantile_type7(&sorted, t)).collect();

    let adjusted: Vec<Vec<f64>> = cutoffs
        .iter()
        .map(|&cutoff| {
            let kept: Vec<f64> = pvalues
                .iter()
                .zip(base_means)
                .map(|(&p, &m)| if m >= cutoff { p } else { f64::NAN })
                .collect();
            benjamini_hochberg(&kept)
        })
        .collect();
    let num_rej: Vec<f64> = adjusted
        .iter()
        .map(|padj| padj.iter().filter(|&&p| p < alpha).count() as f64)
        .collect();

    let best = choose_theta(&thetas, &num_rej);
    log::debug!(
        "Independent filtering: theta={:.3}, base mean cut-off={:.3}, rejections={}",
        thetas[best],
        cutoffs[best],
        num_rej[best]
    );

    IndependentFilter {
        rejections: num_rej[best] as usize,
        theta: thetas[best],
        cutoff: cutoffs[best],
        padj: adjusted.into_iter().nth(best).unwrap_or_default(),
    }
}

/// First theta whose rejection count exceeds the smoothed maximum minus the
/// residual RMSE, falling back to 90% and then 80% of that maximum. No
/// filtering when at most ten genes are ever rejected.
fn choose_theta(thetas: &[f64], num_rej: &[f64]) -> usize {
    let max_rej = num_rej.iter().copied().fold(0.0, f64::max);
    if max_rej <= 10.0 {
        return 0;
    }

    let fit = lowess(thetas, num_rej, 0.2, 3);
    let residuals: Vec<f64> = num_rej
        .iter()
        .zip(&fit)
        .filter(|(&r, _)| r > 0.0)
        .map(|(r, f)| r - f)
        .collect();
    let rmse = if residuals.is_empty() {
        0.0
    } else {
        (residuals.iter().map(|r| r * r).sum::<f64>() / residuals.len() as f64).sqrt()
    };
    let max_fit = fit.iter().copied().fold(f64::MIN, f64::max);

    [max_fit - rmse, 0.9 * max_fit, 0.8 * max_fit]
        .iter()
        .find_map(|&threshold| num_rej.iter().position(|&r| r > threshold))
        .unwrap_or(0)
}
