//! BioMart martservice client

use std::collections::HashMap;
use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use super::IdentifierLookup;
use crate::enrichment::DEFAULT_TIMEOUT_SECS;
use crate::error::{DgeError, Result};

/// Which mart dataset to query and which attributes to translate between
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BiomartConfig {
    pub url: String,
    pub dataset: String,
    /// Filter holding the source ids
    pub source_attribute: String,
    /// Attribute returned as the symbol
    pub target_attribute: String,
    pub timeout_secs: u64,
}

impl Default for BiomartConfig {
    fn default() -> Self {
        Self {
            url: "http://www.ensembl.org/biomart/martservice".to_string(),
            dataset: "mmusculus_gene_ensembl".to_string(),
            source_attribute: "ensembl_gene_id".to_string(),
            target_attribute: "entrezgene_accession".to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// Blocking BioMart client
#[derive(Debug, Clone)]
pub struct BiomartClient {
    config: BiomartConfig,
    client: Client,
}

impl BiomartClient {
    pub fn new(config: BiomartConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &BiomartConfig {
        &self.config
    }
}

impl IdentifierLookup for BiomartClient {
    fn lookup_batch(&self, ids: &[String]) -> Result<HashMap<String, String>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let query = build_query(&self.config, ids);
        let body = self
            .client
            .get(&self.config.url)
            .query(&[("query", query)])
            .send()?
            .error_for_status()?
            .text()?;
        parse_response(&body)
    }
}

fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// XML query returning `source<TAB>target` rows for `ids`
pub fn build_query(config: &BiomartConfig, ids: &[String]) -> String {
    let values: Vec<String> = ids.iter().map(|id| escape(id)).collect();
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?><!DOCTYPE Query>"#,
            r#"<Query virtualSchemaName="default" formatter="TSV" header="0" uniqueRows="1" datasetConfigVersion="0.6">"#,
            r#"<Dataset name="{dataset}" interface="default">"#,
            r#"<Filter name="{source}" value="{values}"/>"#,
            r#"<Attribute name="{source}"/>"#,
            r#"<Attribute name="{target}"/>"#,
            r#"</Dataset></Query>"#
        ),
        dataset = escape(&config.dataset),
        source = escape(&config.source_attribute),
        target = escape(&config.target_attribute),
        values = values.join(","),
    )
}

/// Parse `source<TAB>target` rows. The first non-empty target of a source
/// wins; rows with an empty target are ignored.
pub fn parse_response(body: &str) -> Result<HashMap<String, String>> {
    let trimmed = body.trim_start();
    if trimmed.starts_with("Query ERROR") || trimmed.starts_with("<html") {
        let first_line = trimmed.lines().next().unwrap_or_default();
        return Err(DgeError::Remote {
            reason: format!("BioMart: {}", first_line),
        });
    }

    let mut out = HashMap::new();
    for line in body.lines() {
        let mut fields = line.split('\t');
        let (Some(source), Some(target)) = (fields.next(), fields.next()) else {
            continue;
        };
        let (source, target) = (source.trim(), target.trim());
        if source.is_empty() || target.is_empty() {
            continue;
        }
        out.entry(source.to_string())
            .or_insert_with(|| target.to_string());
    }
    Ok(out)
}
