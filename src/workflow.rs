//! End-to-end workflow: load, filter, model, plot, test, split, map, enrich

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::data::DgeDataSet;
use crate::enrichment::{enrich_gene_set, EnrichmentService};
use crate::error::{DgeError, Result};
use crate::filter::filter_low_counts;
use crate::io::{load_dataset, write_results, Contrast, ResultsSummary, DEFAULT_ID_COLUMN};
use crate::mapping::{map_identifiers, BiomartConfig, IdentifierLookup, UnmappedPolicy, DEFAULT_BATCH_SIZE};
use crate::normalization::{estimate_size_factors, SizeFactorMethod};
use crate::plot::{
    dispersion_points, dotplot_points, ma_points, pca, render_dispersion, render_dotplot, render_ma,
    render_pca, render_volcano, volcano_points, PcaParams, VolcanoThresholds,
};
use crate::shrinkage::shrink_lfc;
use crate::split::{split_regulated, SplitThresholds};
use crate::testing::{results, TestParams};
use crate::transform::vst;
use crate::{run_deseq, ModelParams};

/// Restrict the differential analysis to samples whose `attribute` equals
/// `value`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleSubset {
    pub attribute: String,
    pub value: String,
}

impl std::str::FromStr for SampleSubset {
    type Err = DgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('=') {
            Some((attribute, value)) if !attribute.is_empty() && !value.is_empty() => Ok(Self {
                attribute: attribute.to_string(),
                value: value.to_string(),
            }),
            _ => Err(DgeError::InvalidInput {
                reason: format!("invalid subset '{}', expected attribute=value", s),
            }),
        }
    }
}

/// Every setting of [`run_workflow`]; all fields have defaults so a JSON
/// file only needs the ones it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub clinical: PathBuf,
    pub counts: PathBuf,
    pub id_column: String,
    pub design_factor: String,
    pub reference_level: Option<String>,
    /// Level compared against the reference; the last level when unset
    pub numerator: Option<String>,
    pub subset: Option<SampleSubset>,
    pub min_total_count: f64,
    pub refit_cooks: bool,
    pub blind_vst: bool,
    pub pca_top_genes: usize,
    pub pca_color_by: String,
    pub pca_symbol_by: String,
    pub alpha: f64,
    pub split: SplitThresholds,
    pub volcano: VolcanoThresholds,
    pub batch_size: usize,
    pub unmapped_policy: UnmappedPolicy,
    pub biomart: BiomartConfig,
    pub libraries: Vec<String>,
    pub organism: String,
    pub top_terms: usize,
    pub term_cutoff: f64,
    pub output_dir: PathBuf,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            clinical: PathBuf::from("clinical.tsv"),
            counts: PathBuf::from("counts.tsv"),
            id_column: DEFAULT_ID_COLUMN.to_string(),
            design_factor: "condition".to_string(),
            reference_level: Some("untrt".to_string()),
            numerator: None,
            subset: None,
            min_total_count: crate::filter::DEFAULT_MIN_TOTAL,
            refit_cooks: true,
            blind_vst: true,
            pca_top_genes: 500,
            pca_color_by: "organ".to_string(),
            pca_symbol_by: "condition".to_string(),
            alpha: 0.05,
            split: SplitThresholds::default(),
            volcano: VolcanoThresholds::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            unmapped_policy: UnmappedPolicy::Drop,
            biomart: BiomartConfig::default(),
            libraries: vec!["GO_Biological_Process_2021".to_string()],
            organism: "mouse".to_string(),
            top_terms: 10,
            term_cutoff: 0.05,
            output_dir: PathBuf::from("dgeflow_output"),
        }
    }
}

impl WorkflowConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn pca_params(&self) -> PcaParams {
        PcaParams {
            n_top: self.pca_top_genes,
            use_vst: true,
            color_by: self.pca_color_by.clone(),
            symbol_by: self.pca_symbol_by.clone(),
        }
    }

    fn model_params(&self) -> ModelParams {
        ModelParams {
            refit_cooks: self.refit_cooks,
            ..ModelParams::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
        }
    }
}

/// Enrichment outcome of one regulated gene set
#[derive(Debug, Clone)]
pub struct DirectionReport {
    pub direction: Direction,
    pub n_genes: usize,
    pub n_symbols: usize,
    pub n_unmapped: usize,
    pub n_terms: usize,
    pub n_significant_terms: usize,
    /// Set when the gene set was empty and enrichment was not attempted
    pub skipped: bool,
}

/// What [`run_workflow`] did
#[derive(Debug, Clone)]
pub struct WorkflowReport {
    pub n_genes_loaded: usize,
    pub n_genes_kept: usize,
    pub n_samples: usize,
    pub n_samples_analysed: usize,
    pub pca_variance_ratio: Vec<f64>,
    pub contrast: Contrast,
    pub summary: ResultsSummary,
    pub refit_genes: usize,
    pub directions: Vec<DirectionReport>,
    pub outputs: Vec<PathBuf>,
}

impl fmt::Display for WorkflowReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Genes: {} loaded, {} after low-count filter",
            self.n_genes_loaded, self.n_genes_kept
        )?;
        writeln!(f, "Samples: {} loaded, {} analysed", self.n_samples, self.n_samples_analysed)?;
        write!(f, "{}", self.summary)?;
        for d in &self.directions {
            if d.skipped {
                writeln!(f, "{}: no genes, enrichment skipped", d.direction)?;
            } else {
                writeln!(
                    f,
                    "{}: {} genes, {} symbols, {} terms ({} significant)",
                    d.direction, d.n_genes, d.n_symbols, d.n_terms, d.n_significant_terms
                )?;
            }
        }
        writeln!(f, "Wrote {} files to output directory", self.outputs.len())
    }
}

/// Run every stage in order, writing tables and plots into
/// `config.output_dir`. Remote services are passed in so the workflow can
/// run offline.
pub fn run_workflow(
    config: &WorkflowConfig,
    lookup: &dyn IdentifierLookup,
    enrichment: &dyn EnrichmentService,
) -> Result<WorkflowReport> {
    fs::create_dir_all(&config.output_dir)?;
    let out = |name: &str| config.output_dir.join(name);
    let mut outputs = Vec::new();

    // Load and filter
    let (counts, clinical) = load_dataset(&config.clinical, &config.counts, &config.id_column)?;
    let n_genes_loaded = counts.n_genes();
    let n_samples = counts.n_samples();
    let counts = filter_low_counts(&counts, config.min_total_count)?;
    let n_genes_kept = counts.n_genes();

    // PCA over every sample
    log::info!("PCA on all {} samples", n_samples);
    let mut all = DgeDataSet::new(
        counts.clone(),
        clinical.clone(),
        &config.design_factor,
        config.reference_level.as_deref(),
    )?;
    estimate_size_factors(&mut all, SizeFactorMethod::Ratio)?;
    let transformed = vst(&all, config.blind_vst)?;
    all.set_vst_layer(transformed.data)?;
    let pca_result = pca(&all, &config.pca_params())?;
    render_pca(&pca_result, out("pca.svg"))?;
    outputs.push(out("pca.svg"));

    // Differential expression on the selected samples
    let (counts, clinical) = match &config.subset {
        Some(subset) => {
            let keep = clinical.select_where(&subset.attribute, &subset.value)?;
            log::info!(
                "Restricting to {} samples with {} = {}",
                keep.len(),
                subset.attribute,
                subset.value
            );
            (counts.subset_samples(&keep)?, clinical.subset(&keep)?)
        }
        None => (counts, clinical),
    };
    let n_samples_analysed = counts.n_samples();
    let mut dds = DgeDataSet::new(
        counts,
        clinical,
        &config.design_factor,
        config.reference_level.as_deref(),
    )?;
    let design_info = run_deseq(&mut dds, &config.model_params())?;
    let refit_genes = dds.replaced_genes().map_or(0, |r| r.iter().filter(|x| **x).count());

    render_dispersion(&dispersion_points(&dds)?, out("dispersion.svg"))?;
    outputs.push(out("dispersion.svg"));

    let contrast = match &config.numerator {
        Some(level) => Contrast::new(&config.design_factor, level, dds.reference_level()),
        None => design_info.contrast_for(design_info.default_coefficient())?,
    };
    let test_params = TestParams {
        contrast: Some(contrast.clone()),
        alpha: config.alpha,
        ..TestParams::default()
    };
    let unshrunk = results(&dds, &design_info, &test_params)?;
    let shrunk = shrink_lfc(&dds, &design_info, &unshrunk, &contrast.name())?;
    let summary = shrunk.summary(config.alpha);
    log::info!("\n{}", summary);

    write_results(out("results.tsv"), &unshrunk)?;
    write_results(out("results_shrunk.tsv"), &shrunk)?;
    outputs.extend([out("results.tsv"), out("results_shrunk.tsv")]);

    let title = contrast.name();
    render_ma(&ma_points(&unshrunk, config.alpha), &format!("{} (MLE)", title), out("ma.svg"))?;
    render_ma(&ma_points(&shrunk, config.alpha), &format!("{} (shrunken)", title), out("ma_shrunk.svg"))?;
    render_volcano(
        &volcano_points(&shrunk, &config.volcano),
        &config.volcano,
        &title,
        out("volcano.svg"),
    )?;
    outputs.extend([out("ma.svg"), out("ma_shrunk.svg"), out("volcano.svg")]);

    // Gene sets, mapping and enrichment
    let regulated = split_regulated(&shrunk, &config.split)?;
    let mut directions = Vec::new();
    for (direction, ids) in [
        (Direction::Up, regulated.up_ids()),
        (Direction::Down, regulated.down_ids()),
    ] {
        let mut report = DirectionReport {
            direction,
            n_genes: ids.len(),
            n_symbols: 0,
            n_unmapped: 0,
            n_terms: 0,
            n_significant_terms: 0,
            skipped: false,
        };
        if ids.is_empty() {
            log::warn!("No {}-regulated genes; skipping enrichment", direction);
            report.skipped = true;
            directions.push(report);
            continue;
        }

        let mapping = map_identifiers(lookup, ids, config.batch_size, config.unmapped_policy)?;
        let symbols = mapping.symbols();
        report.n_symbols = symbols.len();
        report.n_unmapped = mapping.unmapped.len();
        let symbols_path = out(&format!("{}_symbols.txt", direction));
        fs::write(&symbols_path, symbols.join("\n"))?;
        outputs.push(symbols_path);

        if symbols.is_empty() {
            log::warn!("No {}-regulated gene could be mapped; skipping enrichment", direction);
            report.skipped = true;
            directions.push(report);
            continue;
        }

        let table = enrich_gene_set(enrichment, &symbols, &config.libraries)?;
        report.n_terms = table.len();
        report.n_significant_terms = table.significant(config.term_cutoff).len();
        let table_path = out(&format!("enrichment_{}.tsv", direction));
        table.write_tsv(&table_path)?;
        outputs.push(table_path);

        if dotplot_points(&table, config.top_terms, config.term_cutoff).is_empty() {
            log::info!("No {} term below {}; no dot plot", direction, config.term_cutoff);
        } else {
            let plot_path = out(&format!("dotplot_{}.svg", direction));
            let plot_title = format!("{} genes: {}", direction.to_string().to_uppercase(), config.libraries.join(", "));
            render_dotplot(&table, &plot_title, config.top_terms, config.term_cutoff, &plot_path)?;
            outputs.push(plot_path);
        }
        directions.push(report);
    }

    Ok(WorkflowReport {
        n_genes_loaded,
        n_genes_kept,
        n_samples,
        n_samples_analysed,
        pca_variance_ratio: pca_result.explained_variance_ratio,
        contrast,
        summary,
        refit_genes,
        directions,
        outputs,
    })
}
