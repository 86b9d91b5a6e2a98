//! Pre-filtering of genes with too few reads

use crate::data::CountMatrix;
use crate::error::{DgeError, Result};

/// Default minimum total count per gene
pub const DEFAULT_MIN_TOTAL: f64 = 10.0;

/// Keep genes whose total count over all samples is at least `min_total`.
///
/// Sample set and order are unchanged and surviving genes keep their order.
pub fn filter_low_counts(counts: &CountMatrix, min_total: f64) -> Result<CountMatrix> {
    let keep: Vec<usize> = counts
        .gene_totals()
        .iter()
        .enumerate()
        .filter(|(_, &total)| total >= min_total)
        .map(|(i, _)| i)
        .collect();

    if keep.is_empty() {
        return Err(DgeError::EmptyData {
            reason: format!("no gene has a total count >= {}", min_total),
        });
    }

    log::info!(
        "Low-count filter (total >= {}): kept {} of {} genes",
        min_total,
        keep.len(),
        counts.n_genes()
    );
    counts.subset_genes(&keep)
}
