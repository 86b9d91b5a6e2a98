//! dgeflow: RNA-seq differential expression and pathway enrichment
//!
//! A negative binomial DGE engine (size factors, dispersion shrinkage, GLM,
//! Wald tests, fold change shrinkage, VST) plus the surrounding workflow:
//! clinical/count table loading, diagnostic plots, up/down gene sets,
//! BioMart identifier mapping and Enrichr over-representation analysis.
//!
//! # Example
//!
//! ```ignore
//! use dgeflow::prelude::*;
//!
//! let (counts, clinical) = load_dataset("clinical.tsv", "counts.tsv", "sampleID")?;
//! let counts = filter_low_counts(&counts, 10.0)?;
//! let mut dds = DgeDataSet::new(counts, clinical, "condition", Some("untrt"))?;
//! let info = run_deseq(&mut dds, &ModelParams::default())?;
//! let table = results(&dds, &info, &TestParams::default())?;
//! let shrunk = shrink_lfc(&dds, &info, &table, "condition_cis_vs_untrt")?;
//! let regulated = split_regulated(&shrunk, &SplitThresholds::default())?;
//! ```

pub mod cli;
pub mod data;
pub mod dispersion;
pub mod enrichment;
pub mod error;
pub mod filter;
pub mod glm;
pub mod io;
pub mod mapping;
pub mod normalization;
pub mod plot;
pub mod shrinkage;
pub mod split;
pub mod stats;
pub mod testing;
pub mod transform;
pub mod workflow;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::data::{CountMatrix, DgeDataSet, SampleMetadata};
    pub use crate::dispersion::{estimate_dispersions, DispersionFunction, DispersionParams};
    pub use crate::enrichment::{enrich_gene_set, EnrichmentService, EnrichmentTable, EnrichrClient};
    pub use crate::error::{DgeError, Result};
    pub use crate::filter::{filter_low_counts, independent_filtering, refit_without_outliers};
    pub use crate::glm::{fit_glm, DesignInfo, GlmFitParams};
    pub use crate::io::{load_dataset, read_clinical, read_counts, write_results, Contrast, ResultsTable};
    pub use crate::mapping::{map_identifiers, BiomartClient, IdentifierLookup, UnmappedPolicy};
    pub use crate::normalization::{estimate_size_factors, SizeFactorMethod};
    pub use crate::shrinkage::shrink_lfc;
    pub use crate::split::{split_regulated, RegulatedGenes, SplitThresholds};
    pub use crate::testing::{benjamini_hochberg, results, wald_test, TestParams};
    pub use crate::transform::{vst, VstResult};
    pub use crate::workflow::{run_workflow, WorkflowConfig, WorkflowReport};
    pub use crate::{run_deseq, ModelParams};
}

use prelude::*;

/// Parameters of [`run_deseq`]
#[derive(Debug, Clone)]
pub struct ModelParams {
    pub size_factor_method: SizeFactorMethod,
    pub dispersion: DispersionParams,
    pub glm: GlmFitParams,
    /// Replace Cook's outliers in levels with enough replicates and refit
    pub refit_cooks: bool,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            size_factor_method: SizeFactorMethod::Ratio,
            dispersion: DispersionParams::default(),
            glm: GlmFitParams::default(),
            refit_cooks: true,
        }
    }
}

/// Fit the full model: size factors (unless already set), dispersions, the
/// negative binomial GLM and Cook's distances, then optionally replace
/// outliers and refit the affected genes.
pub fn run_deseq(dds: &mut DgeDataSet, params: &ModelParams) -> Result<DesignInfo> {
    if dds.size_factors().is_none() {
        log::info!("Estimating size factors");
        estimate_size_factors(dds, params.size_factor_method)?;
    }

    log::info!("Estimating dispersions");
    estimate_dispersions(dds, &params.dispersion)?;

    log::info!("Fitting negative binomial GLM");
    let design_info = fit_glm(dds, &params.glm)?;

    let cooks = filter::calculate_cooks_distance(dds)?;
    dds.set_cooks(cooks)?;

    if params.refit_cooks {
        let refit = refit_without_outliers(dds, &params.dispersion, &params.glm)?;
        if !refit.is_empty() {
            log::info!("Refit {} genes after replacing outlier counts", refit.len());
        }
    }

    Ok(design_info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn six_sample_dataset(reference: &str) -> DgeDataSet {
        let counts = CountMatrix::new(
            array![
                [100.0, 110.0, 90.0, 400.0, 420.0, 380.0],
                [500.0, 520.0, 480.0, 500.0, 510.0, 490.0],
                [300.0, 310.0, 290.0, 75.0, 80.0, 70.0],
                [50.0, 55.0, 45.0, 50.0, 52.0, 48.0],
                [200.0, 220.0, 180.0, 200.0, 210.0, 190.0],
                [150.0, 160.0, 140.0, 300.0, 320.0, 280.0],
                [400.0, 420.0, 380.0, 100.0, 110.0, 90.0],
                [80.0, 85.0, 75.0, 80.0, 82.0, 78.0],
                [600.0, 620.0, 580.0, 600.0, 610.0, 590.0],
                [250.0, 260.0, 240.0, 500.0, 520.0, 480.0],
                [3.0, 0.0, 2.0, 9.0, 4.0, 12.0],
                [1.0, 2.0, 0.0, 0.0, 5.0, 1.0],
            ],
            (0..12).map(|i| format!("gene{}", i)).collect(),
            strings(&["s1", "s2", "s3", "s4", "s5", "s6"]),
        )
        .unwrap();
        let mut metadata = SampleMetadata::new(strings(&["s1", "s2", "s3", "s4", "s5", "s6"])).unwrap();
        metadata
            .add_attribute("condition", strings(&["untrt", "untrt", "untrt", "cis", "cis", "cis"]))
            .unwrap();
        DgeDataSet::new(counts, metadata, "condition", Some(reference)).unwrap()
    }

    #[test]
    fn test_full_pipeline_directions() {
        let mut dds = six_sample_dataset("untrt");
        let info = run_deseq(&mut dds, &ModelParams::default()).unwrap();
        assert_eq!(info.coef_names, vec!["Intercept", "condition_cis_vs_untrt"]);

        let table = results(&dds, &info, &TestParams::default()).unwrap();
        assert_eq!(table.contrast().name(), "condition_cis_vs_untrt");
        assert!(table.log2_fold_changes()[0] > 1.0);
        assert!(table.log2_fold_changes()[2] < -1.0);
        assert!(table.log2_fold_changes()[1].abs() < 0.5);
        // Too few replicates per level for outlier replacement
        assert!(dds.replaced_genes().map_or(true, |r| r.iter().all(|x| !x)));
    }

    #[test]
    fn test_reference_swap_negates_fold_changes() {
        let mut a = six_sample_dataset("untrt");
        let info_a = run_deseq(&mut a, &ModelParams::default()).unwrap();
        let res_a = results(&a, &info_a, &TestParams::default()).unwrap();

        let mut b = six_sample_dataset("cis");
        let info_b = run_deseq(&mut b, &ModelParams::default()).unwrap();
        let res_b = results(&b, &info_b, &TestParams::default()).unwrap();
        assert_eq!(res_b.contrast().name(), "condition_untrt_vs_cis");

        for (x, y) in res_a.log2_fold_changes().iter().zip(res_b.log2_fold_changes()) {
            assert!((x + y).abs() < 1e-4, "{} vs {}", x, y);
        }
        for (x, y) in res_a.pvalues().iter().zip(res_b.pvalues()) {
            assert!((x - y).abs() < 1e-6 || (x.is_nan() && y.is_nan()));
        }
    }

    #[test]
    fn test_two_by_two_fold_change_scale() {
        // 2 untrt + 2 cis samples with equal depth: doubling gives lfc +1,
        // halving gives -1
        let mut rows: Vec<[f64; 4]> = (0..12)
            .map(|i| {
                let c = 100.0 + 40.0 * i as f64;
                [c, c + 3.0, c + 1.0, c + 2.0]
            })
            .collect();
        rows.push([200.0, 200.0, 400.0, 400.0]);
        rows.push([800.0, 800.0, 400.0, 400.0]);
        let mut counts = Array2::zeros((rows.len(), 4));
        for (i, r) in rows.iter().enumerate() {
            for j in 0..4 {
                counts[[i, j]] = r[j];
            }
        }
        let samples = strings(&["k1", "k2", "k3", "k4"]);
        let cm = CountMatrix::new(counts, (0..14).map(|i| format!("g{}", i)).collect(), samples.clone()).unwrap();
        let mut meta = SampleMetadata::new(samples).unwrap();
        meta.add_attribute("condition", strings(&["untrt", "untrt", "cis", "cis"]))
            .unwrap();
        let mut dds = DgeDataSet::new(cm, meta, "condition", Some("untrt")).unwrap();
        let info = run_deseq(&mut dds, &ModelParams::default()).unwrap();
        let table = results(&dds, &info, &TestParams::default()).unwrap();

        let sf = dds.size_factors().unwrap();
        assert!(sf.iter().all(|s| (s - 1.0).abs() < 0.02));
        assert!((table.log2_fold_changes()[12] - 1.0).abs() < 0.05);
        assert!((table.log2_fold_changes()[13] + 1.0).abs() < 0.05);
    }

    #[test]
    fn test_gene_without_reads_has_no_fold_change() {
        let mut rows: Vec<[f64; 4]> = (0..12)
            .map(|i| {
                let c = 100.0 + 40.0 * i as f64;
                [c, c + 3.0, c + 1.0, c + 2.0]
            })
            .collect();
        rows.push([0.0, 0.0, 50.0, 60.0]);
        rows.push([0.0, 0.0, 0.0, 0.0]);
        rows.push([70.0, 80.0, 0.0, 0.0]);
        let mut counts = Array2::zeros((rows.len(), 4));
        for (i, r) in rows.iter().enumerate() {
            for j in 0..4 {
                counts[[i, j]] = r[j];
            }
        }
        let samples = strings(&["k1", "k2", "k3", "k4"]);
        let cm = CountMatrix::new(counts, (0..15).map(|i| format!("g{}", i)).collect(), samples.clone()).unwrap();
        let mut meta = SampleMetadata::new(samples).unwrap();
        meta.add_attribute("condition", strings(&["untrt", "untrt", "cis", "cis"]))
            .unwrap();
        let mut dds = DgeDataSet::new(cm, meta, "condition", Some("untrt")).unwrap();
        let info = run_deseq(&mut dds, &ModelParams::default()).unwrap();
        let table = results(&dds, &info, &TestParams::default()).unwrap();

        assert!(table.log2_fold_changes()[12] > 3.0);
        assert!(table.log2_fold_changes()[14] < -3.0);
        let empty = 13;
        assert_eq!(table.base_means()[empty], 0.0);
        assert!(table.log2_fold_changes()[empty].is_nan());
        assert!(table.lfc_se()[empty].is_nan());
        assert!(table.pvalues()[empty].is_nan());
        assert!(table.padj()[empty].is_nan());

        let shrunk = shrink_lfc(&dds, &info, &table, "condition_cis_vs_untrt").unwrap();
        assert!(shrunk.log2_fold_changes()[empty].is_nan());
        assert!(shrunk.log2_fold_changes()[12].is_finite());
    }

    #[test]
    fn test_shrinkage_returns_new_table() {
        let mut dds = six_sample_dataset("untrt");
        let info = run_deseq(&mut dds, &ModelParams::default()).unwrap();
        let table = results(&dds, &info, &TestParams::default()).unwrap();
        let before = table.log2_fold_changes().to_vec();

        let shrunk = shrink_lfc(&dds, &info, &table, "condition_cis_vs_untrt").unwrap();
        assert!(shrunk.is_shrunk());
        assert!(!table.is_shrunk());
        assert_eq!(table.log2_fold_changes(), &before[..]);
        assert_eq!(shrunk.pvalues().len(), table.pvalues().len());
        for (a, b) in shrunk.padj().iter().zip(table.padj()) {
            assert!(a == b || (a.is_nan() && b.is_nan()));
        }

        // The noisy low-count gene is pulled toward zero
        let low = 10;
        assert!(shrunk.log2_fold_changes()[low] != table.log2_fold_changes()[low]);
        assert!(shrunk.log2_fold_changes()[low].abs() < table.log2_fold_changes()[low].abs());
        assert!(shrink_lfc(&dds, &info, &table, "condition_x_vs_untrt").is_err());
    }

    #[test]
    fn test_cooks_refit_with_seven_replicates() {
        let n_genes = 30;
        let mut counts = Array2::zeros((n_genes, 14));
        for i in 0..n_genes {
            for j in 0..14 {
                let base = 80.0 + 15.0 * i as f64;
                let level = if j >= 7 && i % 3 == 0 { 2.0 } else { 1.0 };
                counts[[i, j]] = (base * level + ((i * 5 + j * 3) % 13) as f64).round();
            }
        }
        // One wild count in an untreated sample
        counts[[4, 2]] = 20000.0;

        let samples: Vec<String> = (1..=14).map(|j| format!("s{:02}", j)).collect();
        let cm = CountMatrix::new(counts, (0..n_genes).map(|i| format!("g{}", i)).collect(), samples.clone())
            .unwrap();
        let mut meta = SampleMetadata::new(samples).unwrap();
        let labels: Vec<String> = (0..14)
            .map(|j| if j < 7 { "untrt".to_string() } else { "cis".to_string() })
            .collect();
        meta.add_attribute("condition", labels).unwrap();
        let mut dds = DgeDataSet::new(cm, meta, "condition", Some("untrt")).unwrap();

        run_deseq(&mut dds, &ModelParams::default()).unwrap();
        let replaced = dds.replaced_genes().unwrap();
        assert!(replaced[4]);
        assert!(dds.model_counts()[[4, 2]] < 1000.0);
        // Raw counts are kept
        assert_eq!(dds.counts().counts()[[4, 2]], 20000.0);
        assert_eq!(dds.cooks().unwrap()[[4, 2]], 0.0);

        let mut untouched = DgeDataSet::new(dds.counts().clone(), dds.metadata().clone(), "condition", Some("untrt"))
            .unwrap();
        let params = ModelParams {
            refit_cooks: false,
            ..ModelParams::default()
        };
        run_deseq(&mut untouched, &params).unwrap();
        assert!(untouched.replaced_genes().is_none());
        assert!(untouched.cooks().unwrap()[[4, 2]] > 10.0);
    }
}
