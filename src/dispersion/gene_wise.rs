//! Gene-wise dispersion estimation using the Cox-Reid adjusted profile likelihood

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;

use super::{maximize_log_alpha, DispersionParams};
use crate::glm::{dispersion_log_posterior, MIN_MU};

/// Gene-wise estimates with the fitted means they were computed against
#[derive(Debug, Clone)]
pub struct GeneWiseFit {
    /// NaN for genes with no counts at all
    pub dispersions: Array1<f64>,
    pub mu: Array2<f64>,
}

/// Group means of the normalized counts, back on the count scale.
/// The design is a one-way layout, so this is the least-squares fit.
pub(crate) fn linear_mu(
    y: ArrayView1<'_, f64>,
    size_factors: ArrayView1<'_, f64>,
    groups: &[usize],
    n_groups: usize,
) -> Vec<f64> {
    let means = group_means(y, size_factors, groups, n_groups);
    groups
        .iter()
        .zip(size_factors.iter())
        .map(|(&g, &s)| (means[g] * s).max(MIN_MU))
        .collect()
}

fn group_means(
    y: ArrayView1<'_, f64>,
    size_factors: ArrayView1<'_, f64>,
    groups: &[usize],
    n_groups: usize,
) -> Vec<f64> {
    let mut sums = vec![0.0; n_groups];
    let mut sizes = vec![0usize; n_groups];
    for ((&c, &s), &g) in y.iter().zip(size_factors.iter()).zip(groups) {
        sums[g] += c / s;
        sizes[g] += 1;
    }
    sums.iter()
        .zip(&sizes)
        .map(|(s, &n)| if n > 0 { s / n as f64 } else { 0.0 })
        .collect()
}

/// Starting value: the smaller of the residual-based and the moments-based
/// estimate, clamped to the search range.
fn starting_dispersion(
    y: ArrayView1<'_, f64>,
    size_factors: ArrayView1<'_, f64>,
    groups: &[usize],
    n_groups: usize,
    xim: f64,
    n_coefs: usize,
    params: &DispersionParams,
) -> f64 {
    let m = y.len();
    let max_disp = params.max_disp(m);
    let norm: Vec<f64> = y.iter().zip(size_factors.iter()).map(|(c, s)| c / s).collect();
    let means = group_means(y, size_factors, groups, n_groups);

    let df = (m.saturating_sub(n_coefs)).max(1) as f64;
    let rough = norm
        .iter()
        .zip(groups)
        .map(|(&v, &g)| {
            let mu = means[g].max(1.0);
            ((v - mu).powi(2) - mu) / (mu * mu)
        })
        .sum::<f64>()
        / df;

    let mean = norm.iter().sum::<f64>() / m as f64;
    let var = norm.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (m as f64 - 1.0).max(1.0);
    let moments = (var - xim * mean) / (mean * mean);

    let start = rough.max(0.0).min(moments);
    if start.is_finite() {
        start.clamp(params.min_disp, max_disp)
    } else {
        params.min_disp
    }
}

/// Estimate one dispersion per gene (rows of `counts`) in parallel.
///
/// `groups` gives each sample's level index; `design` enters only through
/// the Cox-Reid adjustment.
pub fn estimate_gene_wise(
    counts: ArrayView2<'_, f64>,
    size_factors: ArrayView1<'_, f64>,
    design: ArrayView2<'_, f64>,
    groups: &[usize],
    params: &DispersionParams,
) -> GeneWiseFit {
    let (n_genes, n_samples) = counts.dim();
    let n_groups = groups.iter().copied().max().map_or(1, |g| g + 1);
    let n_coefs = design.ncols();
    let max_disp = params.max_disp(n_samples);
    let xim = size_factors.iter().map(|s| 1.0 / s).sum::<f64>() / n_samples as f64;

    let fits: Vec<(f64, Vec<f64>)> = (0..n_genes)
        .into_par_iter()
        .map(|i| {
            let y = counts.row(i);
            let mu = linear_mu(y, size_factors, groups, n_groups);
            if y.iter().all(|&c| c == 0.0) {
                return (f64::NAN, mu);
            }

            let start = starting_dispersion(
                y,
                size_factors,
                groups,
                n_groups,
                xim,
                n_coefs,
                params,
            );
            let mu_view = ArrayView1::from(&mu[..]);
            let log_alpha = maximize_log_alpha(
                |la| dispersion_log_posterior(la, &y, &mu_view, &design, None),
                params.min_disp.ln(),
                max_disp.ln(),
                start.ln(),
                params,
            );
            (log_alpha.exp().clamp(params.min_disp, max_disp), mu)
        })
        .collect();

    let mut dispersions = Array1::zeros(n_genes);
    let mut mu = Array2::zeros((n_genes, n_samples));
    for (i, (d, m)) in fits.into_iter().enumerate() {
        dispersions[i] = d;
        mu.index_axis_mut(Axis(0), i).assign(&Array1::from(m));
    }

    GeneWiseFit { dispersions, mu }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glm::intercept_design;
    use ndarray::array;

    fn two_groups() -> (Array2<f64>, Vec<usize>) {
        let design = array![
            [1.0, 0.0],
            [1.0, 0.0],
            [1.0, 0.0],
            [1.0, 1.0],
            [1.0, 1.0],
            [1.0, 1.0]
        ];
        (design, vec![0, 0, 0, 1, 1, 1])
    }

    #[test]
    fn test_linear_mu_is_group_mean() {
        let y = array![10.0, 20.0, 40.0, 60.0];
        let sf = array![1.0, 2.0, 1.0, 1.0];
        let mu = linear_mu(y.view(), sf.view(), &[0, 0, 1, 1], 2);
        // Normalized group means 10 and 50
        assert_eq!(mu, vec![10.0, 20.0, 50.0, 50.0]);
    }

    #[test]
    fn test_overdispersed_gene_gets_larger_estimate() {
        let counts = array![
            [100.0, 104.0, 98.0, 200.0, 205.0, 196.0],
            [40.0, 160.0, 90.0, 300.0, 110.0, 220.0]
        ];
        let sf = Array1::ones(6);
        let (design, groups) = two_groups();
        let fit = estimate_gene_wise(
            counts.view(),
            sf.view(),
            design.view(),
            &groups,
            &DispersionParams::default(),
        );
        assert!(fit.dispersions[1] > 0.05);
        assert!(fit.dispersions[1] > 10.0 * fit.dispersions[0]);
        assert_eq!(fit.mu.dim(), (2, 6));
    }

    #[test]
    fn test_all_zero_gene_is_nan() {
        let counts = array![[0.0, 0.0, 0.0, 0.0], [5.0, 7.0, 6.0, 9.0]];
        let sf = Array1::ones(4);
        let design = intercept_design(4);
        let fit = estimate_gene_wise(
            counts.view(),
            sf.view(),
            design.view(),
            &[0, 0, 0, 0],
            &DispersionParams::default(),
        );
        assert!(fit.dispersions[0].is_nan());
        assert!(fit.dispersions[1].is_finite());
    }

    #[test]
    fn test_poisson_like_gene_hits_lower_bound_region() {
        let counts = array![[100.0, 100.0, 100.0, 100.0]];
        let sf = Array1::ones(4);
        let design = intercept_design(4);
        let params = DispersionParams::default();
        let fit = estimate_gene_wise(counts.view(), sf.view(), design.view(), &[0; 4], &params);
        assert!(fit.dispersions[0] < 1e-3);
        assert!(fit.dispersions[0] >= params.min_disp);
    }
}
