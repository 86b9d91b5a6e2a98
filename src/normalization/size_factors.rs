//! Size factor estimation using the median of ratios method

use ndarray::{Array1, ArrayView2, Axis};

use crate::data::DgeDataSet;
use crate::error::{DgeError, Result};
use crate::stats::median;

/// Method for size factor estimation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SizeFactorMethod {
    /// Median of ratios against geometric means of genes with no zero count
    #[default]
    Ratio,
    /// Geometric means over positive counts only; for data where every gene
    /// has a zero somewhere
    PosCounts,
}

/// Estimate size factors and store them (and normalized counts) on the dataset.
///
/// With [`SizeFactorMethod::Ratio`], falls back to positive-count geometric
/// means when no gene is free of zeros.
pub fn estimate_size_factors(dds: &mut DgeDataSet, method: SizeFactorMethod) -> Result<()> {
    let counts = dds.counts().counts();
    let size_factors = match method {
        SizeFactorMethod::Ratio => match median_of_ratios(counts) {
            Err(DgeError::SizeFactorFailed { reason }) => {
                log::warn!("{}; using positive-count geometric means", reason);
                positive_counts_ratios(counts)?
            }
            other => other?,
        },
        SizeFactorMethod::PosCounts => positive_counts_ratios(counts)?,
    };

    log::debug!("Size factors: {:?}", size_factors.to_vec());
    dds.set_size_factors(size_factors)
}

/// Median over genes of count / geometric mean, per sample.
/// Genes with any zero count do not contribute.
pub fn median_of_ratios(counts: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
    let (n_genes, n_samples) = counts.dim();
    if n_genes == 0 || n_samples == 0 {
        return Err(DgeError::EmptyData {
            reason: "Count matrix is empty".to_string(),
        });
    }

    let log_geo_means: Vec<(usize, f64)> = counts
        .axis_iter(Axis(0))
        .enumerate()
        .filter(|(_, row)| row.iter().all(|&x| x > 0.0))
        .map(|(i, row)| (i, row.iter().map(|x| x.ln()).sum::<f64>() / n_samples as f64))
        .collect();

    if log_geo_means.is_empty() {
        return Err(DgeError::SizeFactorFailed {
            reason: "every gene contains at least one zero".to_string(),
        });
    }

    let sf: Array1<f64> = (0..n_samples)
        .map(|j| {
            let ratios: Vec<f64> = log_geo_means
                .iter()
                .map(|&(i, lg)| (counts[[i, j]].ln() - lg).exp())
                .collect();
            median(&ratios)
        })
        .collect();

    validate(sf)
}

/// Median of ratios with geometric means over the positive counts only,
/// rescaled to a geometric mean of one.
pub fn positive_counts_ratios(counts: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
    let (_, n_samples) = counts.dim();
    let log_geo_means: Vec<(usize, f64)> = counts
        .axis_iter(Axis(0))
        .enumerate()
        .filter(|(_, row)| row.iter().any(|&x| x > 0.0))
        .map(|(i, row)| {
            let s: f64 = row.iter().filter(|&&x| x > 0.0).map(|x| x.ln()).sum();
            (i, s / n_samples as f64)
        })
        .collect();

    if log_geo_means.is_empty() {
        return Err(DgeError::SizeFactorFailed {
            reason: "no gene has a positive count".to_string(),
        });
    }

    let sf: Vec<f64> = (0..n_samples)
        .map(|j| {
            let ratios: Vec<f64> = log_geo_means
                .iter()
                .filter(|&&(i, _)| counts[[i, j]] > 0.0)
                .map(|&(i, lg)| (counts[[i, j]].ln() - lg).exp())
                .collect();
            median(&ratios)
        })
        .collect();

    let log_center = sf.iter().map(|s| s.ln()).sum::<f64>() / n_samples as f64;
    validate(sf.iter().map(|s| s / log_center.exp()).collect())
}

fn validate(sf: Array1<f64>) -> Result<Array1<f64>> {
    if sf.iter().any(|&x| !x.is_finite() || x <= 0.0) {
        return Err(DgeError::SizeFactorFailed {
            reason: "non-positive or non-finite size factor".to_string(),
        });
    }
    Ok(sf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_median_of_ratios_depth_scaling() {
        // Second sample sequenced twice as deep
        let counts = array![[10.0, 20.0], [100.0, 200.0], [50.0, 100.0]];
        let sf = median_of_ratios(counts.view()).unwrap();
        assert!((sf[1] / sf[0] - 2.0).abs() < 1e-12);
        assert!((sf[0] * sf[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_genes_with_zero_skipped() {
        let counts = array![[10.0, 10.0], [0.0, 500.0], [20.0, 20.0]];
        let sf = median_of_ratios(counts.view()).unwrap();
        assert!((sf[0] - 1.0).abs() < 1e-12);
        assert!((sf[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_all_genes_with_zero() {
        let counts = array![[0.0, 10.0], [5.0, 0.0]];
        assert!(matches!(
            median_of_ratios(counts.view()),
            Err(DgeError::SizeFactorFailed { .. })
        ));
        let sf = positive_counts_ratios(counts.view()).unwrap();
        assert!(sf.iter().all(|s| s.is_finite() && *s > 0.0));
    }
}
