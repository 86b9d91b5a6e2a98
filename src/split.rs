//! Split a results table into up- and down-regulated genes

use serde::{Deserialize, Serialize};

use crate::error::{DgeError, Result};
use crate::io::ResultsTable;

/// Significance and effect-size thresholds for a regulated gene.
///
/// `lfc` must be strictly positive: a zero threshold would let a gene with
/// lfc 0 fall on both sides. Both values must be finite.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitThresholds {
    pub padj: f64,
    pub lfc: f64,
}

impl Default for SplitThresholds {
    fn default() -> Self {
        Self { padj: 0.05, lfc: 1.0 }
    }
}

/// Disjoint up- and down-regulated subsets of one results table
#[derive(Debug, Clone)]
pub struct RegulatedGenes {
    pub up: ResultsTable,
    pub down: ResultsTable,
}

impl RegulatedGenes {
    pub fn up_ids(&self) -> &[String] {
        self.up.gene_ids()
    }

    pub fn down_ids(&self) -> &[String] {
        self.down.gene_ids()
    }
}

/// Keep genes with `padj <= thresholds.padj`, then split them by fold change
/// at `+lfc` and `-lfc`. Genes with NaN padj are never kept.
pub fn split_regulated(table: &ResultsTable, thresholds: &SplitThresholds) -> Result<RegulatedGenes> {
    if !thresholds.padj.is_finite() || !thresholds.lfc.is_finite() || thresholds.lfc <= 0.0 {
        return Err(DgeError::InvalidInput {
            reason: format!(
                "split thresholds must be finite with lfc > 0 (padj={}, lfc={})",
                thresholds.padj, thresholds.lfc
            ),
        });
    }

    let mut up = Vec::new();
    let mut down = Vec::new();
    for (i, row) in table.rows().enumerate() {
        if row.padj.is_nan() || row.padj > thresholds.padj {
            continue;
        }
        if row.log2_fold_change >= thresholds.lfc {
            up.push(i);
        } else if row.log2_fold_change <= -thresholds.lfc {
            down.push(i);
        }
    }

    log::info!(
        "{} up-regulated and {} down-regulated genes (padj <= {}, |lfc| >= {})",
        up.len(),
        down.len(),
        thresholds.padj,
        thresholds.lfc
    );
    Ok(RegulatedGenes {
        up: table.subset(&up),
        down: table.subset(&down),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{Contrast, ResultColumns};

    fn table() -> ResultsTable {
        let lfc = vec![2.0, -1.5, 1.0, -1.0, 0.5, 3.0, -4.0];
        let padj = vec![0.01, 0.001, 0.05, 0.04, 0.001, f64::NAN, 0.2];
        let n = lfc.len();
        ResultsTable::new(
            (0..n).map(|i| format!("g{}", i)).collect(),
            Contrast::new("condition", "cis", "untrt"),
            ResultColumns {
                base_means: vec![100.0; n],
                log2_fold_changes: lfc,
                lfc_se: vec![0.3; n],
                stat: vec![1.0; n],
                pvalues: vec![0.001; n],
                padj,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_split_inclusive_thresholds() {
        let res = split_regulated(&table(), &SplitThresholds::default()).unwrap();
        assert_eq!(res.up_ids(), ["g0", "g2"]);
        assert_eq!(res.down_ids(), ["g1", "g3"]);
    }

    #[test]
    fn test_split_disjoint_subsets() {
        let t = table();
        let res = split_regulated(&t, &SplitThresholds::default()).unwrap();
        for id in res.up_ids() {
            assert!(!res.down_ids().contains(id));
        }
        for row in res.up.rows().chain(res.down.rows()) {
            assert!(row.padj <= 0.05);
            assert!(t.gene_ids().iter().any(|g| g == row.gene_id));
        }
    }

    #[test]
    fn test_split_can_be_empty() {
        let strict = SplitThresholds { padj: 1e-6, lfc: 1.0 };
        let res = split_regulated(&table(), &strict).unwrap();
        assert_eq!(res.up.n_genes(), 0);
        assert_eq!(res.down.n_genes(), 0);
    }

    #[test]
    fn test_split_rejects_bad_thresholds() {
        let bad = SplitThresholds { padj: 0.05, lfc: 0.0 };
        assert!(split_regulated(&table(), &bad).is_err());
        let negative = SplitThresholds { padj: 0.05, lfc: -1.0 };
        assert!(split_regulated(&table(), &negative).is_err());
        let nan = SplitThresholds { padj: f64::NAN, lfc: 1.0 };
        assert!(split_regulated(&table(), &nan).is_err());
    }
}
