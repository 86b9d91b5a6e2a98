//! Wald test on a single GLM coefficient

use ndarray::Axis;

use super::pvalue::wald_pvalue;
use crate::data::DgeDataSet;
use crate::error::{DgeError, Result};

/// Per-gene Wald test output on the log2 scale
#[derive(Debug, Clone, Default)]
pub struct WaldColumns {
    pub base_means: Vec<f64>,
    pub log2_fold_changes: Vec<f64>,
    pub lfc_se: Vec<f64>,
    pub stat: Vec<f64>,
    pub pvalues: Vec<f64>,
}

/// Test coefficient `coef_idx` of the fitted GLM, multiplied by `sign`
/// (`-1` reverses the comparison).
///
/// Genes with a zero base mean get a fold change and standard error of zero
/// and NaN statistic and p-value.
pub fn wald_test(dds: &DgeDataSet, coef_idx: usize, sign: f64) -> Result<WaldColumns> {
    let not_fit = || DgeError::InvalidInput {
        reason: "the GLM must be fit before testing".to_string(),
    };
    let coefficients = dds.coefficients().ok_or_else(not_fit)?;
    let standard_errors = dds.standard_errors().ok_or_else(not_fit)?;
    let normalized = dds.normalized_counts().ok_or_else(not_fit)?;
    if coef_idx >= coefficients.ncols() {
        return Err(DgeError::InvalidContrast {
            reason: format!(
                "coefficient index {} out of range ({} coefficients)",
                coef_idx,
                coefficients.ncols()
            ),
        });
    }

    let ln2 = std::f64::consts::LN_2;
    let n_samples = dds.n_samples() as f64;
    let mut out = WaldColumns::default();

    for (i, row) in normalized.axis_iter(Axis(0)).enumerate() {
        let base_mean = row.sum() / n_samples;
        out.base_means.push(base_mean);

        // No reads: the fold change is undefined
        if base_mean == 0.0 {
            out.log2_fold_changes.push(f64::NAN);
            out.lfc_se.push(f64::NAN);
            out.stat.push(f64::NAN);
            out.pvalues.push(f64::NAN);
            continue;
        }

        let beta = sign * coefficients[[i, coef_idx]];
        let se = standard_errors[[i, coef_idx]];
        let stat = beta / se;
        out.log2_fold_changes.push(beta / ln2);
        out.lfc_se.push(se / ln2);
        out.stat.push(stat);
        out.pvalues.push(wald_pvalue(stat));
    }

    log::debug!(
        "Wald test on coefficient {}: {} genes, {} with zero base mean",
        coef_idx,
        out.base_means.len(),
        out.base_means.iter().filter(|m| **m == 0.0).count()
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CountMatrix, SampleMetadata};
    use crate::dispersion::{estimate_dispersions, DispersionParams};
    use crate::glm::{fit_glm, GlmFitParams};
    use crate::normalization::{estimate_size_factors, SizeFactorMethod};
    use ndarray::array;

    fn fitted() -> DgeDataSet {
        let samples: Vec<String> = (1..=6).map(|i| format!("s{}", i)).collect();
        let counts = CountMatrix::new(
            array![
                [100.0, 110.0, 90.0, 400.0, 420.0, 380.0],
                [500.0, 520.0, 480.0, 500.0, 510.0, 490.0],
                [200.0, 210.0, 190.0, 50.0, 55.0, 45.0],
                [0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
                [30.0, 35.0, 28.0, 33.0, 31.0, 29.0]
            ],
            vec![
                "gene_up".to_string(),
                "gene_nc".to_string(),
                "gene_down".to_string(),
                "gene_zero".to_string(),
                "gene_low".to_string(),
            ],
            samples.clone(),
        )
        .unwrap();
        let mut metadata = SampleMetadata::new(samples).unwrap();
        metadata
            .add_attribute(
                "treatment",
                ["control", "control", "control", "treated", "treated", "treated"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            )
            .unwrap();

        let mut dds = DgeDataSet::new(counts, metadata, "treatment", None).unwrap();
        estimate_size_factors(&mut dds, SizeFactorMethod::Ratio).unwrap();
        estimate_dispersions(&mut dds, &DispersionParams::default()).unwrap();
        fit_glm(&mut dds, &GlmFitParams::default()).unwrap();
        dds
    }

    #[test]
    fn test_wald_directions() {
        let dds = fitted();
        let res = wald_test(&dds, 1, 1.0).unwrap();
        assert!(res.log2_fold_changes[0] > 1.5);
        assert!(res.log2_fold_changes[1].abs() < 0.5);
        assert!(res.log2_fold_changes[2] < -1.5);
        assert!(res.pvalues[0] < 0.01);
        for p in res.pvalues.iter().filter(|p| p.is_finite()) {
            assert!((0.0..=1.0).contains(p));
        }
    }

    #[test]
    fn test_zero_gene() {
        let dds = fitted();
        let res = wald_test(&dds, 1, 1.0).unwrap();
        assert_eq!(res.base_means[3], 0.0);
        assert!(res.log2_fold_changes[3].is_nan());
        assert!(res.lfc_se[3].is_nan());
        assert!(res.stat[3].is_nan());
        assert!(res.pvalues[3].is_nan());
        assert!(res.log2_fold_changes[0].is_finite());
    }

    #[test]
    fn test_sign_reverses() {
        let dds = fitted();
        let fwd = wald_test(&dds, 1, 1.0).unwrap();
        let rev = wald_test(&dds, 1, -1.0).unwrap();
        assert_eq!(fwd.log2_fold_changes[0], -rev.log2_fold_changes[0]);
        assert_eq!(fwd.pvalues[0], rev.pvalues[0]);
        assert!(wald_test(&dds, 5, 1.0).is_err());
    }
}
