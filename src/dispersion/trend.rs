//! Dispersion trend fitting

use ndarray::Array1;

use super::DispersionParams;
use crate::data::DgeDataSet;
use crate::error::{DgeError, Result};
use crate::stats::trimmed_mean;

/// Fitted relationship between mean expression and dispersion
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DispersionFunction {
    /// `asympt_disp + extra_pois / mean`
    Parametric { asympt_disp: f64, extra_pois: f64 },
    /// A single dispersion for every gene
    Mean(f64),
}

impl DispersionFunction {
    /// Trended dispersion at a mean normalized count. NaN for a zero mean
    /// under the parametric form.
    pub fn eval(&self, mean: f64) -> f64 {
        match *self {
            DispersionFunction::Parametric {
                asympt_disp,
                extra_pois,
            } => {
                if mean > 0.0 {
                    asympt_disp + extra_pois / mean
                } else {
                    f64::NAN
                }
            }
            DispersionFunction::Mean(a) => a,
        }
    }
}

/// Fit the dispersion function: parametric first, then the mean of the
/// gene-wise estimates when the parametric fit fails.
pub fn fit_dispersion_function(
    means: &[f64],
    gene_dispersions: &[f64],
    params: &DispersionParams,
) -> DispersionFunction {
    match fit_parametric_trend(means, gene_dispersions, params.min_disp) {
        Ok((asympt_disp, extra_pois)) => {
            log::debug!(
                "Parametric dispersion trend: asymptDisp={:.6}, extraPois={:.4}",
                asympt_disp,
                extra_pois
            );
            DispersionFunction::Parametric {
                asympt_disp,
                extra_pois,
            }
        }
        Err(e) => {
            let mean = fit_mean_trend(gene_dispersions, params.min_disp);
            log::warn!("{}; using mean dispersion {:.6} as the trend", e, mean);
            DispersionFunction::Mean(mean)
        }
    }
}

/// Fit the trend on the dataset's gene-wise dispersions and store the
/// function and the trended values.
pub fn fit_dispersion_trend(dds: &mut DgeDataSet, params: &DispersionParams) -> Result<()> {
    let gene_dispersions = dds
        .gene_dispersions()
        .cloned()
        .ok_or_else(|| DgeError::TrendFittingFailed {
            reason: "gene-wise dispersions must be estimated first".to_string(),
        })?;
    let means = base_means(dds)?;

    let function = fit_dispersion_function(&means, &gene_dispersions.to_vec(), params);
    let trended: Array1<f64> = means.iter().map(|&m| function.eval(m)).collect();

    dds.set_dispersion_function(function);
    dds.set_trended_dispersions(trended)
}

/// Mean normalized count per gene
pub(crate) fn base_means(dds: &DgeDataSet) -> Result<Vec<f64>> {
    let normalized = dds.normalized_counts().ok_or_else(|| DgeError::TrendFittingFailed {
        reason: "normalized counts required for trend fitting".to_string(),
    })?;
    let n = dds.n_samples() as f64;
    Ok(normalized.rows().into_iter().map(|row| row.sum() / n).collect())
}

/// Iterative gamma-family fit of `a0 + a1 / mean`, dropping points whose
/// ratio to the current fit falls outside `(1e-4, 15)` on each pass.
/// Both coefficients must come out positive.
pub fn fit_parametric_trend(
    means: &[f64],
    dispersions: &[f64],
    min_disp: f64,
) -> Result<(f64, f64)> {
    let data: Vec<(f64, f64)> = means
        .iter()
        .zip(dispersions)
        .filter(|(&m, &d)| m > 0.0 && d.is_finite() && d > 100.0 * min_disp)
        .map(|(&m, &d)| (m, d))
        .collect();

    if data.len() < 3 {
        return Err(DgeError::TrendFittingFailed {
            reason: format!("only {} genes usable for the parametric trend", data.len()),
        });
    }

    let mut coefs = (0.1_f64, 1.0_f64);
    for iter in 0..11 {
        let old = coefs;
        let good: Vec<(f64, f64)> = data
            .iter()
            .filter(|&&(m, d)| {
                let fitted = coefs.0 + coefs.1 / m;
                let ratio = d / fitted;
                fitted > 0.0 && ratio > 1e-4 && ratio < 15.0
            })
            .copied()
            .collect();

        if good.len() < 3 {
            return Err(DgeError::TrendFittingFailed {
                reason: "too few genes left after residual filtering".to_string(),
            });
        }

        let (next, glm_converged) = gamma_identity_fit(&good, coefs);
        coefs = next;
        log::debug!(
            "Trend iteration {}: {} genes, a0={:.6}, a1={:.4}",
            iter + 1,
            good.len(),
            coefs.0,
            coefs.1
        );

        if !(coefs.0 > 0.0 && coefs.1 > 0.0) {
            return Err(DgeError::TrendFittingFailed {
                reason: format!(
                    "parametric coefficients not positive (a0={:.4}, a1={:.4})",
                    coefs.0, coefs.1
                ),
            });
        }

        let change = (coefs.0 / old.0).ln().powi(2) + (coefs.1 / old.1).ln().powi(2);
        if change < 1e-6 && glm_converged {
            return Ok(coefs);
        }
    }

    Err(DgeError::TrendFittingFailed {
        reason: "parametric dispersion fit did not converge".to_string(),
    })
}

/// Gamma GLM with identity link, `disp ~ 1 + 1/mean`, by IRLS
fn gamma_identity_fit(data: &[(f64, f64)], start: (f64, f64)) -> ((f64, f64), bool) {
    let deviance = |a0: f64, a1: f64| -> f64 {
        data.iter()
            .map(|&(m, d)| {
                let mu = (a0 + a1 / m).max(1e-8);
                2.0 * (-(d / mu).ln() + (d - mu) / mu)
            })
            .sum()
    };

    let (mut a0, mut a1) = start;
    let mut dev_old = deviance(a0, a1);

    for _ in 0..25 {
        let (mut sw, mut swx, mut swz, mut swxx, mut swxz) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for &(m, d) in data {
            let x = 1.0 / m;
            let mu = (a0 + a1 * x).max(1e-8);
            let w = 1.0 / (mu * mu);
            sw += w;
            swx += w * x;
            swz += w * d;
            swxx += w * x * x;
            swxz += w * x * d;
        }

        let det = sw * swxx - swx * swx;
        if det.abs() < 1e-12 {
            return ((a0, a1), false);
        }
        a0 = (swxx * swz - swx * swxz) / det;
        a1 = (sw * swxz - swx * swz) / det;

        let dev = deviance(a0, a1);
        if (dev_old - dev).abs() / (0.1 + dev.abs()) < 1e-8 {
            return ((a0, a1), true);
        }
        dev_old = dev;
    }
    ((a0, a1), false)
}

/// Mean of the gene-wise estimates above `10 * min_disp`, lightly trimmed
pub fn fit_mean_trend(dispersions: &[f64], min_disp: f64) -> f64 {
    let usable: Vec<f64> = dispersions
        .iter()
        .copied()
        .filter(|d| d.is_finite() && *d > 10.0 * min_disp)
        .collect();
    if usable.is_empty() {
        return min_disp;
    }
    trimmed_mean(&usable, 0.001)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parametric_recovers_coefficients() {
        let means: Vec<f64> = (1..200).map(|i| i as f64 * 5.0).collect();
        // Multiplicative scatter around 0.05 + 2/mean
        let disps: Vec<f64> = means
            .iter()
            .enumerate()
            .map(|(i, m)| (0.05 + 2.0 / m) * (1.0 + 0.2 * ((i as f64) * 1.3).sin()))
            .collect();
        let (a0, a1) = fit_parametric_trend(&means, &disps, 1e-8).unwrap();
        assert!((a0 - 0.05).abs() < 0.01, "a0 = {}", a0);
        assert!((a1 - 2.0).abs() < 0.4, "a1 = {}", a1);
    }

    #[test]
    fn test_too_few_points_falls_back_to_mean() {
        let means = vec![10.0, 20.0];
        let disps = vec![0.1, 0.3];
        let f = fit_dispersion_function(&means, &disps, &DispersionParams::default());
        match f {
            DispersionFunction::Mean(a) => assert!((a - 0.2).abs() < 1e-12),
            other => panic!("expected mean fit, got {:?}", other),
        }
    }

    #[test]
    fn test_mean_trend_without_usable_estimates() {
        assert_eq!(fit_mean_trend(&[1e-8, f64::NAN], 1e-8), 1e-8);
    }

    #[test]
    fn test_eval() {
        let f = DispersionFunction::Parametric {
            asympt_disp: 0.1,
            extra_pois: 2.0,
        };
        assert!((f.eval(4.0) - 0.6).abs() < 1e-12);
        assert!(f.eval(0.0).is_nan());
        assert_eq!(DispersionFunction::Mean(0.3).eval(0.0), 0.3);
    }
}
