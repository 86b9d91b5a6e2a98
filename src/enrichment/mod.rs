//! Over-representation analysis of gene sets
//!
//! The remote service sits behind [`EnrichmentService`] so the workflow can
//! run against a mock in tests; [`EnrichrClient`] talks to Enrichr.

mod enrichr;

pub use enrichr::{parse_enrich_response, parse_library_names, EnrichrClient, DEFAULT_TIMEOUT_SECS};

use std::path::Path;

use serde::Serialize;

use crate::error::{DgeError, Result};

/// One enriched term of one library
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichmentTerm {
    pub library: String,
    pub term: String,
    /// Query genes annotated with the term
    #[serde(serialize_with = "join_genes")]
    pub genes: Vec<String>,
    pub overlap: usize,
    /// `overlap` over the size of the submitted list
    pub gene_ratio: f64,
    pub pvalue: f64,
    pub adjusted_pvalue: f64,
    pub odds_ratio: f64,
    pub combined_score: f64,
}

fn join_genes<S: serde::Serializer>(genes: &[String], s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&genes.join(";"))
}

/// Remote over-representation service
pub trait EnrichmentService {
    /// Terms of `library` enriched in `genes`
    fn enrich(&self, genes: &[String], library: &str) -> Result<Vec<EnrichmentTerm>>;

    /// Gene-set libraries the service offers
    fn library_names(&self) -> Result<Vec<String>>;
}

/// Terms of every queried library, ranked by combined score descending
#[derive(Debug, Clone, Default)]
pub struct EnrichmentTable {
    terms: Vec<EnrichmentTerm>,
}

impl EnrichmentTable {
    pub fn new(mut terms: Vec<EnrichmentTerm>) -> Self {
        terms.sort_by(|a, b| b.combined_score.total_cmp(&a.combined_score));
        Self { terms }
    }

    pub fn terms(&self) -> &[EnrichmentTerm] {
        &self.terms
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Terms with adjusted p-value below `cutoff`, ranking preserved
    pub fn significant(&self, cutoff: f64) -> EnrichmentTable {
        EnrichmentTable {
            terms: self
                .terms
                .iter()
                .filter(|t| t.adjusted_pvalue < cutoff)
                .cloned()
                .collect(),
        }
    }

    /// Write the table as tab-separated values, genes joined by `;`
    pub fn write_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_path(path)?;
        for term in &self.terms {
            writer.serialize(term)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Query `service` with `genes` against each library in turn.
///
/// An empty gene list is rejected before any remote call is made.
pub fn enrich_gene_set(
    service: &dyn EnrichmentService,
    genes: &[String],
    libraries: &[String],
) -> Result<EnrichmentTable> {
    if genes.is_empty() {
        return Err(DgeError::EmptyGeneSet {
            context: "enrichment requires at least one gene".to_string(),
        });
    }
    if libraries.is_empty() {
        return Err(DgeError::InvalidInput {
            reason: "no gene-set libraries given".to_string(),
        });
    }

    let mut terms = Vec::new();
    for library in libraries {
        let found = service.enrich(genes, library)?;
        log::info!("{}: {} terms for {} genes", library, found.len(), genes.len());
        terms.extend(found);
    }
    Ok(EnrichmentTable::new(terms))
}
