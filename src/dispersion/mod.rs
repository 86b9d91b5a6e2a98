//! Dispersion estimation for negative binomial models

mod gene_wise;
mod map;
mod trend;

pub use gene_wise::{estimate_gene_wise, GeneWiseFit};
pub use map::{estimate_map, estimate_prior_variance, MapFit, PriorVariance};
pub use trend::{
    fit_dispersion_function, fit_dispersion_trend, fit_mean_trend, fit_parametric_trend,
    DispersionFunction,
};
pub(crate) use trend::base_means;

use ndarray::{Array1, Axis};

use crate::data::DgeDataSet;
use crate::error::{DgeError, Result};
use crate::glm::create_design_matrix;

/// Configurable parameters for dispersion estimation
#[derive(Debug, Clone)]
pub struct DispersionParams {
    /// Lower bound of every dispersion estimate
    pub min_disp: f64,
    /// Width of the final golden-section bracket on the `ln(alpha)` scale
    pub disp_tol: f64,
    /// Points in the coarse `ln(alpha)` grid preceding the refinement
    pub grid_points: usize,
    /// Gene-wise estimates more than this many prior SDs above the trend
    /// are not shrunk
    pub outlier_sd: f64,
    pub min_prior_var: f64,
}

impl Default for DispersionParams {
    fn default() -> Self {
        Self {
            min_disp: 1e-8,
            disp_tol: 1e-6,
            grid_points: 20,
            outlier_sd: 2.0,
            min_prior_var: 0.25,
        }
    }
}

impl DispersionParams {
    /// Upper bound of the search: `max(10, n_samples)`
    pub fn max_disp(&self, n_samples: usize) -> f64 {
        (n_samples as f64).max(10.0)
    }
}

/// Maximize a unimodal-ish function of `ln(alpha)` on `[lower, upper]`:
/// coarse grid plus the starting value, then golden-section refinement
/// around the best grid point.
pub(crate) fn maximize_log_alpha<F>(
    f: F,
    lower: f64,
    upper: f64,
    start: f64,
    params: &DispersionParams,
) -> f64
where
    F: Fn(f64) -> f64,
{
    let n = params.grid_points.max(3);
    let step = (upper - lower) / (n - 1) as f64;

    let start = start.clamp(lower, upper);
    let mut best = (start, f(start));
    for k in 0..n {
        let x = lower + step * k as f64;
        let v = f(x);
        if v > best.1 || !best.1.is_finite() {
            best = (x, v);
        }
    }

    let (mut a, mut b) = ((best.0 - step).max(lower), (best.0 + step).min(upper));
    let ratio = (5.0_f64.sqrt() - 1.0) / 2.0;
    let mut c = b - ratio * (b - a);
    let mut d = a + ratio * (b - a);
    let (mut fc, mut fd) = (f(c), f(d));
    while (b - a).abs() > params.disp_tol {
        if fc > fd {
            b = d;
            d = c;
            fd = fc;
            c = b - ratio * (b - a);
            fc = f(c);
        } else {
            a = c;
            c = d;
            fc = fd;
            d = a + ratio * (b - a);
            fd = f(d);
        }
    }

    let refined = 0.5 * (a + b);
    if f(refined) >= best.1 {
        refined
    } else {
        best.0
    }
}

/// Estimate gene-wise, trended and final (MAP) dispersions and store them
/// with the dispersion function, the prior variance and the outlier flags.
pub fn estimate_dispersions(dds: &mut DgeDataSet, params: &DispersionParams) -> Result<()> {
    let size_factors = dds.size_factors().cloned().ok_or_else(|| {
        DgeError::DispersionEstimationFailed {
            reason: "size factors must be estimated first".to_string(),
        }
    })?;
    let (design, _) = create_design_matrix(dds)?;
    if design.nrows() <= design.ncols() {
        return Err(DgeError::DispersionEstimationFailed {
            reason: format!(
                "{} samples for {} coefficients leaves no replicates",
                design.nrows(),
                design.ncols()
            ),
        });
    }
    let groups = dds.sample_groups();

    let gene_wise = estimate_gene_wise(
        dds.model_counts(),
        size_factors.view(),
        design.view(),
        &groups,
        params,
    );
    log::info!("Estimated gene-wise dispersions for {} genes", dds.n_genes());
    dds.set_gene_dispersions(gene_wise.dispersions.clone())?;

    fit_dispersion_trend(dds, params)?;
    let trended = dds
        .trended_dispersions()
        .cloned()
        .ok_or_else(|| DgeError::TrendFittingFailed {
            reason: "trended dispersions missing after the fit".to_string(),
        })?;

    let prior = estimate_prior_variance(
        &gene_wise.dispersions.to_vec(),
        &trended.to_vec(),
        design.nrows(),
        design.ncols(),
        params,
    );
    let map = estimate_map(
        dds.model_counts(),
        gene_wise.mu.view(),
        design.view(),
        gene_wise.dispersions.view(),
        trended.view(),
        prior,
        params,
    );
    log::info!("Shrunk dispersions toward the trend");

    dds.set_dispersion_prior_var(prior.prior_var);
    dds.set_var_log_disp_ests(prior.var_log_disp_ests);
    dds.set_map_dispersions(map.dispersions)?;
    dds.set_dispersion_outliers(map.outliers)
}

/// Re-estimate the dispersions of the given genes against the current model
/// counts, keeping the dispersion function and prior variance of the
/// original fit.
pub fn reestimate_dispersions(
    dds: &mut DgeDataSet,
    rows: &[usize],
    params: &DispersionParams,
) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    let missing = |what: &str| DgeError::DispersionEstimationFailed {
        reason: format!("{} required before re-estimating dispersions", what),
    };
    let size_factors = dds.size_factors().cloned().ok_or_else(|| missing("size factors"))?;
    let function = dds.dispersion_function().ok_or_else(|| missing("a dispersion function"))?;
    let prior = PriorVariance {
        prior_var: dds.dispersion_prior_var().ok_or_else(|| missing("a prior variance"))?,
        var_log_disp_ests: dds.var_log_disp_ests().unwrap_or(0.0),
    };
    let mut gene_all = dds.gene_dispersions().cloned().ok_or_else(|| missing("gene-wise dispersions"))?;
    let mut trend_all = dds.trended_dispersions().cloned().ok_or_else(|| missing("trended dispersions"))?;
    let mut map_all = dds.map_dispersions().cloned().ok_or_else(|| missing("final dispersions"))?;
    let mut outliers_all = dds.dispersion_outliers().cloned().unwrap_or_else(|| vec![false; dds.n_genes()]);

    let (design, _) = create_design_matrix(dds)?;
    let groups = dds.sample_groups();
    let counts = dds.model_counts().select(Axis(0), rows);
    let means = base_means(dds)?;

    let gene_wise = estimate_gene_wise(
        counts.view(),
        size_factors.view(),
        design.view(),
        &groups,
        params,
    );
    let trended: Array1<f64> = rows.iter().map(|&i| function.eval(means[i])).collect();
    let map = estimate_map(
        counts.view(),
        gene_wise.mu.view(),
        design.view(),
        gene_wise.dispersions.view(),
        trended.view(),
        prior,
        params,
    );

    for (k, &i) in rows.iter().enumerate() {
        gene_all[i] = gene_wise.dispersions[k];
        trend_all[i] = trended[k];
        map_all[i] = map.dispersions[k];
        outliers_all[i] = map.outliers[k];
    }
    log::debug!("Re-estimated dispersions for {} genes", rows.len());

    dds.set_gene_dispersions(gene_all)?;
    dds.set_trended_dispersions(trend_all)?;
    dds.set_map_dispersions(map_all)?;
    dds.set_dispersion_outliers(outliers_all)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CountMatrix, SampleMetadata};
    use crate::normalization::{estimate_size_factors, SizeFactorMethod};
    use ndarray::Array2;

    fn dataset() -> DgeDataSet {
        let n_genes = 60;
        let mut counts = Array2::zeros((n_genes, 6));
        for i in 0..n_genes {
            let base = 20.0 + 15.0 * i as f64;
            for j in 0..6 {
                // Deterministic wobble growing with the mean
                let wobble = 1.0 + 0.15 * (((i * 7 + j * 3) % 5) as f64 - 2.0);
                let fold = if j >= 3 && i % 4 == 0 { 2.0 } else { 1.0 };
                counts[[i, j]] = (base * wobble * fold).round();
            }
        }
        let genes = (0..n_genes).map(|i| format!("g{}", i)).collect();
        let samples: Vec<String> = (1..=6).map(|j| format!("s{}", j)).collect();
        let counts = CountMatrix::new(counts, genes, samples.clone()).unwrap();
        let mut meta = SampleMetadata::new(samples).unwrap();
        meta.add_attribute(
            "condition",
            ["a", "a", "a", "b", "b", "b"].iter().map(|s| s.to_string()).collect(),
        )
        .unwrap();
        let mut dds = DgeDataSet::new(counts, meta, "condition", Some("a")).unwrap();
        estimate_size_factors(&mut dds, SizeFactorMethod::Ratio).unwrap();
        dds
    }

    #[test]
    fn test_maximize_quadratic() {
        let params = DispersionParams::default();
        let x = maximize_log_alpha(|x| -(x - 1.3).powi(2), -5.0, 5.0, 0.0, &params);
        assert!((x - 1.3).abs() < 1e-4);
    }

    #[test]
    fn test_maximize_at_boundary() {
        let params = DispersionParams::default();
        let x = maximize_log_alpha(|x| -x, -3.0, 2.0, 0.5, &params);
        assert!((x + 3.0).abs() < 1e-4);
    }

    #[test]
    fn test_estimate_dispersions_fills_dataset() {
        let mut dds = dataset();
        estimate_dispersions(&mut dds, &DispersionParams::default()).unwrap();
        let gene = dds.gene_dispersions().unwrap();
        let map = dds.map_dispersions().unwrap();
        assert_eq!(gene.len(), 60);
        assert!(map.iter().all(|d| d.is_finite() && *d >= 1e-8));
        assert!(dds.dispersion_function().is_some());
        assert!(dds.dispersion_prior_var().unwrap() >= 0.25);
        assert_eq!(dds.dispersion_outliers().unwrap().len(), 60);
    }

    #[test]
    fn test_reestimate_touches_only_selected_rows() {
        let mut dds = dataset();
        let params = DispersionParams::default();
        estimate_dispersions(&mut dds, &params).unwrap();
        let before = dds.map_dispersions().unwrap().clone();
        reestimate_dispersions(&mut dds, &[3, 10], &params).unwrap();
        let after = dds.map_dispersions().unwrap();
        for i in 0..60 {
            if i != 3 && i != 10 {
                assert_eq!(before[i], after[i]);
            }
        }
        // Same counts, same result
        assert!((before[3] - after[3]).abs() < 1e-6 * before[3].max(1e-8));
    }
}
