//! Design matrix creation for GLM

use ndarray::Array2;

use crate::data::DgeDataSet;
use crate::error::{DgeError, Result};
use crate::io::Contrast;

use super::linalg::to_dmatrix;

/// Name of the intercept coefficient
pub const INTERCEPT: &str = "Intercept";

/// Layout of a single-factor treatment-coded design
#[derive(Debug, Clone, PartialEq)]
pub struct DesignInfo {
    /// Design factor name
    pub factor: String,
    /// Coefficient names, intercept first
    pub coef_names: Vec<String>,
    /// Reference level (absorbed into the intercept)
    pub reference_level: String,
    /// All levels, reference first
    pub levels: Vec<String>,
}

impl DesignInfo {
    /// Column of a named coefficient
    pub fn coef_index(&self, name: &str) -> Result<usize> {
        self.coef_names
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| DgeError::InvalidContrast {
                reason: format!(
                    "coefficient '{}' not found (available: {})",
                    name,
                    self.coef_names.join(", ")
                ),
            })
    }

    /// Last non-intercept coefficient; the default comparison
    pub fn default_coefficient(&self) -> &str {
        self.coef_names
            .last()
            .map(|s| s.as_str())
            .unwrap_or(INTERCEPT)
    }

    /// Contrast described by a non-intercept coefficient
    pub fn contrast_for(&self, coef: &str) -> Result<Contrast> {
        let idx = self.coef_index(coef)?;
        if idx == 0 {
            return Err(DgeError::InvalidContrast {
                reason: "the intercept is not a contrast".to_string(),
            });
        }
        Ok(Contrast::new(
            &self.factor,
            &self.levels[idx],
            &self.reference_level,
        ))
    }

    /// Column and sign for `numerator` vs `denominator`; one side must be
    /// the reference level
    pub fn contrast_index(&self, numerator: &str, denominator: &str) -> Result<(usize, f64)> {
        let level_idx = |l: &str| self.levels.iter().position(|x| x == l);
        match (level_idx(numerator), level_idx(denominator)) {
            (Some(n), Some(0)) if n > 0 => Ok((n, 1.0)),
            (Some(0), Some(d)) if d > 0 => Ok((d, -1.0)),
            (Some(_), Some(_)) => Err(DgeError::InvalidContrast {
                reason: format!(
                    "contrast '{}' vs '{}' must involve the reference level '{}'",
                    numerator, denominator, self.reference_level
                ),
            }),
            _ => Err(DgeError::InvalidContrast {
                reason: format!(
                    "levels '{}' / '{}' not found in '{}'",
                    numerator, denominator, self.factor
                ),
            }),
        }
    }
}

/// Treatment-coded design for the dataset's factor: an intercept column plus
/// one indicator column per non-reference level.
pub fn create_design_matrix(dds: &DgeDataSet) -> Result<(Array2<f64>, DesignInfo)> {
    let levels = dds.levels().to_vec();
    let factor = dds.design_factor().to_string();
    let reference = levels[0].clone();
    let groups = dds.sample_groups();

    let n_samples = dds.n_samples();
    let mut design = Array2::zeros((n_samples, levels.len()));
    for (i, &g) in groups.iter().enumerate() {
        design[[i, 0]] = 1.0;
        if g > 0 {
            design[[i, g]] = 1.0;
        }
    }

    let mut coef_names = vec![INTERCEPT.to_string()];
    coef_names.extend(
        levels
            .iter()
            .skip(1)
            .map(|l| Contrast::new(&factor, l, &reference).name()),
    );

    check_full_rank(&design)?;
    Ok((
        design,
        DesignInfo {
            factor,
            coef_names,
            reference_level: reference,
            levels,
        },
    ))
}

/// Single column of ones
pub fn intercept_design(n_samples: usize) -> Array2<f64> {
    Array2::ones((n_samples, 1))
}

/// Reject designs whose columns are linearly dependent
pub fn check_full_rank(matrix: &Array2<f64>) -> Result<()> {
    if matrix.nrows() == 0 || matrix.ncols() == 0 {
        return Err(DgeError::InvalidDesign {
            reason: "design matrix has zero rows or columns".to_string(),
        });
    }
    let rank = to_dmatrix(&matrix.view()).rank(1e-10);
    if rank < matrix.ncols() {
        return Err(DgeError::InvalidDesign {
            reason: format!(
                "design matrix is not full rank ({} of {} columns); \
                 a level may have no samples",
                rank,
                matrix.ncols()
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CountMatrix, SampleMetadata};
    use ndarray::array;

    fn dataset(reference: Option<&str>) -> DgeDataSet {
        let ids: Vec<String> = (1..=4).map(|i| format!("s{}", i)).collect();
        let counts = CountMatrix::new(
            array![[10.0, 20.0, 30.0, 40.0]],
            vec!["g1".into()],
            ids.clone(),
        )
        .unwrap();
        let mut meta = SampleMetadata::new(ids).unwrap();
        meta.add_attribute(
            "condition",
            vec!["untrt".into(), "untrt".into(), "cis".into(), "cis".into()],
        )
        .unwrap();
        DgeDataSet::new(counts, meta, "condition", reference).unwrap()
    }

    #[test]
    fn test_reference_level_is_intercept() {
        let (design, info) = create_design_matrix(&dataset(Some("untrt"))).unwrap();
        assert_eq!(info.coef_names, vec!["Intercept", "condition_cis_vs_untrt"]);
        assert_eq!(design.column(1).to_vec(), vec![0.0, 0.0, 1.0, 1.0]);
        assert_eq!(design.column(0).to_vec(), vec![1.0; 4]);
    }

    #[test]
    fn test_default_reference_is_first_sorted() {
        let (design, info) = create_design_matrix(&dataset(None)).unwrap();
        assert_eq!(info.reference_level, "cis");
        assert_eq!(info.default_coefficient(), "condition_untrt_vs_cis");
        assert_eq!(design.column(1).to_vec(), vec![1.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_contrast_lookup() {
        let (_, info) = create_design_matrix(&dataset(Some("untrt"))).unwrap();
        assert_eq!(info.contrast_index("cis", "untrt").unwrap(), (1, 1.0));
        assert_eq!(info.contrast_index("untrt", "cis").unwrap(), (1, -1.0));
        assert!(info.contrast_index("cis", "placebo").is_err());
        assert!(info.coef_index("condition_foo_vs_untrt").is_err());

        let c = info.contrast_for("condition_cis_vs_untrt").unwrap();
        assert_eq!(c.numerator, "cis");
        assert!(info.contrast_for(INTERCEPT).is_err());
    }

    #[test]
    fn test_rank_check() {
        let bad = array![[1.0, 1.0], [1.0, 1.0], [1.0, 1.0]];
        assert!(check_full_rank(&bad).is_err());
        assert!(check_full_rank(&intercept_design(3)).is_ok());
    }
}
