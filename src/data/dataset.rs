//! DgeDataSet - model state for differential expression analysis

use ndarray::{Array1, Array2, ArrayView2};

use super::{CountMatrix, SampleMetadata};
use crate::dispersion::DispersionFunction;
use crate::error::{DgeError, Result};

/// Counts, clinical records and everything the model fit derives from them.
///
/// Created by [`DgeDataSet::new`], filled in by [`crate::run_deseq`] and
/// [`crate::transform::vst`]; read-only for plotting and testing.
#[derive(Debug, Clone)]
pub struct DgeDataSet {
    counts: CountMatrix,
    metadata: SampleMetadata,
    design_factor: String,
    /// Factor levels with the reference level first
    levels: Vec<String>,

    size_factors: Option<Array1<f64>>,
    normalized_counts: Option<Array2<f64>>,
    /// Counts after Cook's outlier replacement (genes x samples)
    replaced_counts: Option<Array2<f64>>,
    /// Genes whose counts were replaced and whose fit was redone
    replaced_genes: Option<Vec<bool>>,

    gene_dispersions: Option<Array1<f64>>,
    trended_dispersions: Option<Array1<f64>>,
    map_dispersions: Option<Array1<f64>>,
    dispersion_function: Option<DispersionFunction>,
    dispersion_prior_var: Option<f64>,
    var_log_disp_ests: Option<f64>,
    dispersion_outliers: Option<Vec<bool>>,

    design_matrix: Option<Array2<f64>>,
    coef_names: Option<Vec<String>>,
    coefficients: Option<Array2<f64>>,
    standard_errors: Option<Array2<f64>>,
    mu: Option<Array2<f64>>,
    hat_diagonals: Option<Array2<f64>>,
    converged: Option<Vec<bool>>,
    cooks: Option<Array2<f64>>,

    vst_layer: Option<Array2<f64>>,
}

impl DgeDataSet {
    /// Create a dataset for a single-factor design.
    ///
    /// The factor must exist and have at least two levels. Without an explicit
    /// reference the alphabetically first level is used.
    pub fn new(
        counts: CountMatrix,
        metadata: SampleMetadata,
        design_factor: &str,
        reference_level: Option<&str>,
    ) -> Result<Self> {
        if counts.sample_ids() != metadata.sample_ids() {
            return Err(DgeError::InvalidMetadata {
                reason: "Sample IDs in counts and metadata do not match".to_string(),
            });
        }

        let sorted_levels = metadata.levels(design_factor).map_err(|_| DgeError::InvalidDesign {
            reason: format!("Design factor '{}' not found in metadata", design_factor),
        })?;
        if sorted_levels.len() < 2 {
            return Err(DgeError::InvalidDesign {
                reason: format!(
                    "Design factor '{}' has only one level ('{}')",
                    design_factor,
                    sorted_levels.first().map(|s| s.as_str()).unwrap_or("")
                ),
            });
        }

        let reference = match reference_level {
            Some(r) if sorted_levels.iter().any(|l| l == r) => r.to_string(),
            Some(r) => {
                return Err(DgeError::InvalidDesign {
                    reason: format!(
                        "Reference level '{}' is not a level of '{}' (levels: {})",
                        r,
                        design_factor,
                        sorted_levels.join(", ")
                    ),
                })
            }
            None => sorted_levels[0].clone(),
        };

        let mut levels = vec![reference.clone()];
        levels.extend(sorted_levels.into_iter().filter(|l| *l != reference));

        Ok(Self {
            counts,
            metadata,
            design_factor: design_factor.to_string(),
            levels,
            size_factors: None,
            normalized_counts: None,
            replaced_counts: None,
            replaced_genes: None,
            gene_dispersions: None,
            trended_dispersions: None,
            map_dispersions: None,
            dispersion_function: None,
            dispersion_prior_var: None,
            var_log_disp_ests: None,
            dispersion_outliers: None,
            design_matrix: None,
            coef_names: None,
            coefficients: None,
            standard_errors: None,
            mu: None,
            hat_diagonals: None,
            converged: None,
            cooks: None,
            vst_layer: None,
        })
    }

    pub fn counts(&self) -> &CountMatrix {
        &self.counts
    }

    /// Counts the model is fitted to: replaced counts after a Cook's refit,
    /// otherwise the raw counts
    pub fn model_counts(&self) -> ArrayView2<'_, f64> {
        match &self.replaced_counts {
            Some(r) => r.view(),
            None => self.counts.counts(),
        }
    }

    pub fn metadata(&self) -> &SampleMetadata {
        &self.metadata
    }

    pub fn design_factor(&self) -> &str {
        &self.design_factor
    }

    pub fn reference_level(&self) -> &str {
        &self.levels[0]
    }

    /// Levels with the reference first
    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    /// Level of the design factor for each sample
    pub fn sample_levels(&self) -> &[String] {
        self.metadata
            .attribute(&self.design_factor)
            .unwrap_or_default()
    }

    /// Index into [`levels`](Self::levels) for each sample
    pub fn sample_groups(&self) -> Vec<usize> {
        self.sample_levels()
            .iter()
            .map(|v| self.levels.iter().position(|l| l == v).unwrap_or(0))
            .collect()
    }

    pub fn gene_ids(&self) -> &[String] {
        self.counts.gene_ids()
    }

    pub fn n_genes(&self) -> usize {
        self.counts.n_genes()
    }

    pub fn n_samples(&self) -> usize {
        self.counts.n_samples()
    }

    pub fn size_factors(&self) -> Option<&Array1<f64>> {
        self.size_factors.as_ref()
    }

    pub fn normalized_counts(&self) -> Option<&Array2<f64>> {
        self.normalized_counts.as_ref()
    }

    pub fn replaced_genes(&self) -> Option<&Vec<bool>> {
        self.replaced_genes.as_ref()
    }

    pub fn gene_dispersions(&self) -> Option<&Array1<f64>> {
        self.gene_dispersions.as_ref()
    }

    pub fn trended_dispersions(&self) -> Option<&Array1<f64>> {
        self.trended_dispersions.as_ref()
    }

    pub fn map_dispersions(&self) -> Option<&Array1<f64>> {
        self.map_dispersions.as_ref()
    }

    /// Final dispersions: MAP if estimated, otherwise gene-wise
    pub fn dispersions(&self) -> Option<&Array1<f64>> {
        self.map_dispersions
            .as_ref()
            .or(self.gene_dispersions.as_ref())
    }

    pub fn dispersion_function(&self) -> Option<DispersionFunction> {
        self.dispersion_function
    }

    pub fn dispersion_prior_var(&self) -> Option<f64> {
        self.dispersion_prior_var
    }

    pub fn var_log_disp_ests(&self) -> Option<f64> {
        self.var_log_disp_ests
    }

    pub fn dispersion_outliers(&self) -> Option<&Vec<bool>> {
        self.dispersion_outliers.as_ref()
    }

    pub fn design_matrix(&self) -> Option<&Array2<f64>> {
        self.design_matrix.as_ref()
    }

    pub fn coef_names(&self) -> Option<&Vec<String>> {
        self.coef_names.as_ref()
    }

    /// Natural-log GLM coefficients (genes x coefficients)
    pub fn coefficients(&self) -> Option<&Array2<f64>> {
        self.coefficients.as_ref()
    }

    pub fn standard_errors(&self) -> Option<&Array2<f64>> {
        self.standard_errors.as_ref()
    }

    pub fn mu(&self) -> Option<&Array2<f64>> {
        self.mu.as_ref()
    }

    pub fn hat_diagonals(&self) -> Option<&Array2<f64>> {
        self.hat_diagonals.as_ref()
    }

    pub fn converged(&self) -> Option<&Vec<bool>> {
        self.converged.as_ref()
    }

    pub fn cooks(&self) -> Option<&Array2<f64>> {
        self.cooks.as_ref()
    }

    /// Variance-stabilized expression (genes x samples), present after VST
    pub fn vst_layer(&self) -> Option<&Array2<f64>> {
        self.vst_layer.as_ref()
    }

    fn check_genes(&self, len: usize, what: &str) -> Result<()> {
        if len != self.n_genes() {
            return Err(DgeError::DimensionMismatch {
                expected: format!("{} {}", self.n_genes(), what),
                got: format!("{}", len),
            });
        }
        Ok(())
    }

    fn check_shape(&self, m: &Array2<f64>, what: &str) -> Result<()> {
        if m.dim() != (self.n_genes(), self.n_samples()) {
            return Err(DgeError::DimensionMismatch {
                expected: format!("{}x{} {}", self.n_genes(), self.n_samples(), what),
                got: format!("{}x{}", m.nrows(), m.ncols()),
            });
        }
        Ok(())
    }

    pub fn set_size_factors(&mut self, size_factors: Array1<f64>) -> Result<()> {
        if size_factors.len() != self.n_samples() {
            return Err(DgeError::DimensionMismatch {
                expected: format!("{} size factors", self.n_samples()),
                got: format!("{}", size_factors.len()),
            });
        }
        if size_factors.iter().any(|&x| !x.is_finite() || x <= 0.0) {
            return Err(DgeError::InvalidInput {
                reason: "size factors must be positive finite values".to_string(),
            });
        }
        self.size_factors = Some(size_factors);
        self.compute_normalized_counts();
        Ok(())
    }

    pub fn set_gene_dispersions(&mut self, dispersions: Array1<f64>) -> Result<()> {
        self.check_genes(dispersions.len(), "dispersions")?;
        self.gene_dispersions = Some(dispersions);
        Ok(())
    }

    pub fn set_trended_dispersions(&mut self, dispersions: Array1<f64>) -> Result<()> {
        self.check_genes(dispersions.len(), "dispersions")?;
        self.trended_dispersions = Some(dispersions);
        Ok(())
    }

    pub fn set_map_dispersions(&mut self, dispersions: Array1<f64>) -> Result<()> {
        self.check_genes(dispersions.len(), "dispersions")?;
        self.map_dispersions = Some(dispersions);
        Ok(())
    }

    pub fn set_dispersion_function(&mut self, f: DispersionFunction) {
        self.dispersion_function = Some(f);
    }

    pub fn set_dispersion_prior_var(&mut self, var: f64) {
        self.dispersion_prior_var = Some(var);
    }

    pub fn set_var_log_disp_ests(&mut self, var: f64) {
        self.var_log_disp_ests = Some(var);
    }

    pub fn set_dispersion_outliers(&mut self, outliers: Vec<bool>) -> Result<()> {
        self.check_genes(outliers.len(), "outlier flags")?;
        self.dispersion_outliers = Some(outliers);
        Ok(())
    }

    pub fn set_design(&mut self, matrix: Array2<f64>, coef_names: Vec<String>) -> Result<()> {
        if matrix.nrows() != self.n_samples() || matrix.ncols() != coef_names.len() {
            return Err(DgeError::DimensionMismatch {
                expected: format!("{}x{} design matrix", self.n_samples(), coef_names.len()),
                got: format!("{}x{}", matrix.nrows(), matrix.ncols()),
            });
        }
        self.design_matrix = Some(matrix);
        self.coef_names = Some(coef_names);
        Ok(())
    }

    pub fn set_coefficients(&mut self, coefficients: Array2<f64>) -> Result<()> {
        self.check_genes(coefficients.nrows(), "coefficient rows")?;
        self.coefficients = Some(coefficients);
        Ok(())
    }

    pub fn set_standard_errors(&mut self, se: Array2<f64>) -> Result<()> {
        self.check_genes(se.nrows(), "standard error rows")?;
        self.standard_errors = Some(se);
        Ok(())
    }

    pub fn set_mu(&mut self, mu: Array2<f64>) -> Result<()> {
        self.check_shape(&mu, "mu matrix")?;
        self.mu = Some(mu);
        Ok(())
    }

    pub fn set_hat_diagonals(&mut self, h: Array2<f64>) -> Result<()> {
        self.check_shape(&h, "hat diagonals")?;
        self.hat_diagonals = Some(h);
        Ok(())
    }

    pub fn set_converged(&mut self, converged: Vec<bool>) -> Result<()> {
        self.check_genes(converged.len(), "convergence flags")?;
        self.converged = Some(converged);
        Ok(())
    }

    pub fn set_cooks(&mut self, cooks: Array2<f64>) -> Result<()> {
        self.check_shape(&cooks, "Cook's distances")?;
        self.cooks = Some(cooks);
        Ok(())
    }

    /// Install outlier-replaced counts; normalized counts follow them
    pub fn set_replaced_counts(&mut self, counts: Array2<f64>, replaced: Vec<bool>) -> Result<()> {
        self.check_shape(&counts, "replaced counts")?;
        self.check_genes(replaced.len(), "replacement flags")?;
        self.replaced_counts = Some(counts);
        self.replaced_genes = Some(replaced);
        self.compute_normalized_counts();
        Ok(())
    }

    pub fn set_vst_layer(&mut self, layer: Array2<f64>) -> Result<()> {
        self.check_shape(&layer, "VST layer")?;
        self.vst_layer = Some(layer);
        Ok(())
    }

    fn compute_normalized_counts(&mut self) {
        if let Some(sf) = &self.size_factors {
            let mut normalized = self.model_counts().to_owned();
            for (mut col, &s) in normalized.columns_mut().into_iter().zip(sf.iter()) {
                col.mapv_inplace(|x| x / s);
            }
            self.normalized_counts = Some(normalized);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn create_test_dataset(reference: Option<&str>) -> Result<DgeDataSet> {
        let counts = CountMatrix::new(
            array![
                [100.0, 200.0, 50.0, 150.0],
                [500.0, 600.0, 400.0, 550.0],
                [10.0, 20.0, 15.0, 25.0]
            ],
            strings(&["gene1", "gene2", "gene3"]),
            strings(&["s1", "s2", "s3", "s4"]),
        )
        .unwrap();

        let mut metadata = SampleMetadata::new(strings(&["s1", "s2", "s3", "s4"])).unwrap();
        metadata
            .add_attribute("condition", strings(&["untrt", "untrt", "cis", "cis"]))
            .unwrap();

        DgeDataSet::new(counts, metadata, "condition", reference)
    }

    #[test]
    fn test_dataset_creation() {
        let dds = create_test_dataset(None).unwrap();
        assert_eq!(dds.n_genes(), 3);
        assert_eq!(dds.n_samples(), 4);
        assert_eq!(dds.design_factor(), "condition");
        assert_eq!(dds.reference_level(), "cis");
    }

    #[test]
    fn test_explicit_reference_goes_first() {
        let dds = create_test_dataset(Some("untrt")).unwrap();
        assert_eq!(dds.levels(), &["untrt".to_string(), "cis".to_string()]);
        assert_eq!(dds.sample_groups(), vec![0, 0, 1, 1]);
    }

    #[test]
    fn test_unknown_reference_rejected() {
        assert!(matches!(
            create_test_dataset(Some("placebo")),
            Err(DgeError::InvalidDesign { .. })
        ));
    }

    #[test]
    fn test_size_factor_setting() {
        let mut dds = create_test_dataset(None).unwrap();
        dds.set_size_factors(Array1::from_vec(vec![1.0, 2.0, 0.5, 1.0]))
            .unwrap();
        let norm = dds.normalized_counts().unwrap();
        assert!((norm[[0, 1]] - 100.0).abs() < 1e-12);
        assert!((norm[[0, 2]] - 100.0).abs() < 1e-12);

        assert!(dds
            .set_size_factors(Array1::from_vec(vec![1.0, 0.0, 1.0, 1.0]))
            .is_err());
    }

    #[test]
    fn test_replaced_counts_drive_normalization() {
        let mut dds = create_test_dataset(None).unwrap();
        dds.set_size_factors(Array1::ones(4)).unwrap();
        let mut replaced = dds.counts().counts().to_owned();
        replaced[[0, 0]] = 7.0;
        dds.set_replaced_counts(replaced, vec![true, false, false])
            .unwrap();
        assert_eq!(dds.normalized_counts().unwrap()[[0, 0]], 7.0);
        assert_eq!(dds.counts().counts()[[0, 0]], 100.0);
    }
}
