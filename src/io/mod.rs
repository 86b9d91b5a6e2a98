//! Input/Output: clinical and count tables, results tables

mod results;
mod tsv;

pub use results::{write_results, Contrast, ResultColumns, ResultRow, ResultsSummary, ResultsTable};
pub use tsv::{
    align_to_clinical, load_dataset, read_clinical, read_counts, DEFAULT_GENE_COLUMN,
    DEFAULT_ID_COLUMN,
};
