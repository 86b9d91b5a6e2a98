//! Differential expression results table

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DgeError, Result};

/// Two-level comparison within the design factor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contrast {
    /// Design factor (e.g. "condition")
    pub factor: String,
    /// Level in the numerator of the fold change (e.g. "cis")
    pub numerator: String,
    /// Level in the denominator (e.g. "untrt")
    pub denominator: String,
}

impl Contrast {
    pub fn new(factor: &str, numerator: &str, denominator: &str) -> Self {
        Self {
            factor: factor.to_string(),
            numerator: numerator.to_string(),
            denominator: denominator.to_string(),
        }
    }

    /// Coefficient-style name, e.g. `condition_cis_vs_untrt`
    pub fn name(&self) -> String {
        format!("{}_{}_vs_{}", self.factor, self.numerator, self.denominator)
    }
}

/// Per-gene statistic columns, all of equal length
#[derive(Debug, Clone, Default)]
pub struct ResultColumns {
    pub base_means: Vec<f64>,
    pub log2_fold_changes: Vec<f64>,
    pub lfc_se: Vec<f64>,
    pub stat: Vec<f64>,
    pub pvalues: Vec<f64>,
    pub padj: Vec<f64>,
}

/// One row of a [`ResultsTable`], as written to TSV
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ResultRow<'a> {
    pub gene_id: &'a str,
    #[serde(rename = "baseMean")]
    pub base_mean: f64,
    #[serde(rename = "log2FoldChange")]
    pub log2_fold_change: f64,
    #[serde(rename = "lfcSE")]
    pub lfc_se: f64,
    pub stat: f64,
    pub pvalue: f64,
    pub padj: f64,
}

/// Wald test results for one contrast.
///
/// Values are never modified after construction; shrinkage and filtering
/// build new tables.
#[derive(Debug, Clone)]
pub struct ResultsTable {
    gene_ids: Vec<String>,
    columns: ResultColumns,
    contrast: Contrast,
    shrunk: bool,
}

impl ResultsTable {
    pub fn new(gene_ids: Vec<String>, contrast: Contrast, columns: ResultColumns) -> Result<Self> {
        let n = gene_ids.len();
        let lens = [
            columns.base_means.len(),
            columns.log2_fold_changes.len(),
            columns.lfc_se.len(),
            columns.stat.len(),
            columns.pvalues.len(),
            columns.padj.len(),
        ];
        if let Some(&bad) = lens.iter().find(|&&l| l != n) {
            return Err(DgeError::DimensionMismatch {
                expected: format!("{} values per column", n),
                got: format!("{}", bad),
            });
        }
        Ok(Self {
            gene_ids,
            columns,
            contrast,
            shrunk: false,
        })
    }

    /// Copy of this table with new fold changes and standard errors.
    /// Every other column is carried over unchanged.
    pub fn with_shrunken_lfc(&self, log2_fold_changes: Vec<f64>, lfc_se: Vec<f64>) -> Result<Self> {
        let columns = ResultColumns {
            log2_fold_changes,
            lfc_se,
            ..self.columns.clone()
        };
        let mut table = Self::new(self.gene_ids.clone(), self.contrast.clone(), columns)?;
        table.shrunk = true;
        Ok(table)
    }

    /// Rows at the given indices, in the given order
    pub fn subset(&self, indices: &[usize]) -> Self {
        let pick = |v: &[f64]| indices.iter().map(|&i| v[i]).collect::<Vec<_>>();
        Self {
            gene_ids: indices.iter().map(|&i| self.gene_ids[i].clone()).collect(),
            columns: ResultColumns {
                base_means: pick(&self.columns.base_means),
                log2_fold_changes: pick(&self.columns.log2_fold_changes),
                lfc_se: pick(&self.columns.lfc_se),
                stat: pick(&self.columns.stat),
                pvalues: pick(&self.columns.pvalues),
                padj: pick(&self.columns.padj),
            },
            contrast: self.contrast.clone(),
            shrunk: self.shrunk,
        }
    }

    pub fn n_genes(&self) -> usize {
        self.gene_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gene_ids.is_empty()
    }

    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    pub fn base_means(&self) -> &[f64] {
        &self.columns.base_means
    }

    pub fn log2_fold_changes(&self) -> &[f64] {
        &self.columns.log2_fold_changes
    }

    pub fn lfc_se(&self) -> &[f64] {
        &self.columns.lfc_se
    }

    pub fn stat(&self) -> &[f64] {
        &self.columns.stat
    }

    pub fn pvalues(&self) -> &[f64] {
        &self.columns.pvalues
    }

    pub fn padj(&self) -> &[f64] {
        &self.columns.padj
    }

    pub fn contrast(&self) -> &Contrast {
        &self.contrast
    }

    pub fn is_shrunk(&self) -> bool {
        self.shrunk
    }

    pub fn row(&self, i: usize) -> ResultRow<'_> {
        ResultRow {
            gene_id: &self.gene_ids[i],
            base_mean: self.columns.base_means[i],
            log2_fold_change: self.columns.log2_fold_changes[i],
            lfc_se: self.columns.lfc_se[i],
            stat: self.columns.stat[i],
            pvalue: self.columns.pvalues[i],
            padj: self.columns.padj[i],
        }
    }

    pub fn rows(&self) -> impl Iterator<Item = ResultRow<'_>> + '_ {
        (0..self.n_genes()).map(move |i| self.row(i))
    }

    /// Counts of tested / significant / up / down genes at `alpha`
    pub fn summary(&self, alpha: f64) -> ResultsSummary {
        let tested = self.columns.pvalues.iter().filter(|p| p.is_finite()).count();
        let significant: Vec<f64> = self
            .rows()
            .filter(|r| r.padj.is_finite() && r.padj < alpha)
            .map(|r| r.log2_fold_change)
            .collect();
        let zero_mean = self.columns.base_means.iter().filter(|&&m| m == 0.0).count();

        ResultsSummary {
            contrast: self.contrast.name(),
            shrunk: self.shrunk,
            total_genes: self.n_genes(),
            genes_tested: tested,
            zero_mean,
            significant: significant.len(),
            upregulated: significant.iter().filter(|&&l| l > 0.0).count(),
            downregulated: significant.iter().filter(|&&l| l < 0.0).count(),
            alpha,
        }
    }
}

/// Summary of a results table
#[derive(Debug, Clone)]
pub struct ResultsSummary {
    pub contrast: String,
    pub shrunk: bool,
    pub total_genes: usize,
    pub genes_tested: usize,
    pub zero_mean: usize,
    pub significant: usize,
    pub upregulated: usize,
    pub downregulated: usize,
    pub alpha: f64,
}

impl std::fmt::Display for ResultsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.shrunk { "shrunken " } else { "" };
        writeln!(f, "Results ({}{})", kind, self.contrast)?;
        writeln!(f, "Total genes: {}", self.total_genes)?;
        writeln!(f, "Genes tested: {}", self.genes_tested)?;
        writeln!(f, "Zero base mean: {}", self.zero_mean)?;
        writeln!(f, "Significant (padj < {}): {}", self.alpha, self.significant)?;
        writeln!(f, "  Up-regulated: {}", self.upregulated)?;
        writeln!(f, "  Down-regulated: {}", self.downregulated)?;
        Ok(())
    }
}

/// Write a results table as tab-separated values
pub fn write_results<P: AsRef<Path>>(path: P, table: &ResultsTable) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path)?;
    for row in table.rows() {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}
