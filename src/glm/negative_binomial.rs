//! Negative binomial likelihoods

use ndarray::{ArrayView1, ArrayView2};
use statrs::function::gamma::ln_gamma;

use super::linalg::{log_det_spd, weighted_gram};

/// Lower bound on fitted means during fitting
pub const MIN_MU: f64 = 0.5;

/// Coefficient magnitude (natural log scale) at which IRLS gives up
pub const LARGE_BETA: f64 = 30.0;

/// Normal prior on ln(alpha)
#[derive(Debug, Clone, Copy)]
pub struct LogNormalPrior {
    /// Prior mean of ln(alpha), the log of the trended dispersion
    pub mean: f64,
    pub variance: f64,
}

/// Log-likelihood of one observation with mean `mu` and dispersion `alpha`
pub fn nb_log_likelihood(y: f64, mu: f64, alpha: f64) -> f64 {
    if mu <= 0.0 || alpha <= 0.0 {
        return f64::NEG_INFINITY;
    }
    let r = 1.0 / alpha;
    ln_gamma(y + r) - ln_gamma(r) - ln_gamma(y + 1.0) - r * (1.0 + mu * alpha).ln()
        + y * (mu.ln() - (mu + r).ln())
}

/// IRLS working weight mu / (1 + alpha mu)
pub fn nb_weight(mu: f64, alpha: f64) -> f64 {
    mu / (1.0 + alpha * mu)
}

/// Summed log-likelihood over samples
pub fn nb_log_likelihood_sum(y: &ArrayView1<'_, f64>, mu: &ArrayView1<'_, f64>, alpha: f64) -> f64 {
    y.iter()
        .zip(mu.iter())
        .map(|(&yi, &mi)| nb_log_likelihood(yi, mi, alpha))
        .sum()
}

/// Cox-Reid adjusted profile log-likelihood of `ln(alpha)`, plus the prior
/// term when a prior is given. Terms constant in alpha are dropped.
pub fn dispersion_log_posterior(
    log_alpha: f64,
    y: &ArrayView1<'_, f64>,
    mu: &ArrayView1<'_, f64>,
    design: &ArrayView2<'_, f64>,
    prior: Option<LogNormalPrior>,
) -> f64 {
    let alpha = log_alpha.exp();
    let r = 1.0 / alpha;
    let lgamma_r = ln_gamma(r);

    let ll: f64 = y
        .iter()
        .zip(mu.iter())
        .map(|(&yi, &mi)| {
            ln_gamma(yi + r) - lgamma_r - yi * (mi + r).ln() - r * (1.0 + mi * alpha).ln()
        })
        .sum();

    let w: Vec<f64> = mu.iter().map(|&m| nb_weight(m, alpha)).collect();
    let cr = match log_det_spd(&weighted_gram(design, &w)) {
        Some(ld) => -0.5 * ld,
        None => f64::NEG_INFINITY,
    };

    let prior_term = prior
        .map(|p| -(log_alpha - p.mean).powi(2) / (2.0 * p.variance))
        .unwrap_or(0.0);

    ll + cr + prior_term
}
