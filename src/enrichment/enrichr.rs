//! Enrichr REST client

use std::time::Duration;

use reqwest::blocking::{multipart, Client};
use serde::Deserialize;
use serde_json::Value;

use super::{EnrichmentService, EnrichmentTerm};
use crate::error::{DgeError, Result};

pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

const ENRICHR_ROOT: &str = "https://maayanlab.cloud";

/// Blocking client for one Enrichr instance
#[derive(Debug, Clone)]
pub struct EnrichrClient {
    base_url: String,
    client: Client,
}

#[derive(Deserialize)]
struct AddListResponse {
    #[serde(rename = "userListId")]
    user_list_id: u64,
}

impl EnrichrClient {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Client for the Enrichr instance serving `organism`. Human and mouse
    /// share the main instance; fly, yeast, worm and fish have their own.
    pub fn for_organism(organism: &str) -> Result<Self> {
        let instance = match organism.to_lowercase().as_str() {
            "human" | "mouse" => "Enrichr",
            "fly" => "FlyEnrichr",
            "yeast" => "YeastEnrichr",
            "worm" => "WormEnrichr",
            "fish" => "FishEnrichr",
            other => {
                return Err(DgeError::InvalidInput {
                    reason: format!(
                        "unsupported organism '{}' (human, mouse, fly, yeast, worm, fish)",
                        other
                    ),
                })
            }
        };
        Self::new(&format!("{}/{}", ENRICHR_ROOT, instance), DEFAULT_TIMEOUT_SECS)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn add_list(&self, genes: &[String]) -> Result<u64> {
        let form = multipart::Form::new()
            .text("list", genes.join("\n"))
            .text("description", "dgeflow");
        let response: AddListResponse = self
            .client
            .post(format!("{}/addList", self.base_url))
            .multipart(form)
            .send()?
            .error_for_status()?
            .json()?;
        log::debug!("Enrichr accepted {} genes as list {}", genes.len(), response.user_list_id);
        Ok(response.user_list_id)
    }
}

impl EnrichmentService for EnrichrClient {
    fn enrich(&self, genes: &[String], library: &str) -> Result<Vec<EnrichmentTerm>> {
        let list_id = self.add_list(genes)?;
        let body: Value = self
            .client
            .get(format!("{}/enrich", self.base_url))
            .query(&[
                ("userListId", list_id.to_string()),
                ("backgroundType", library.to_string()),
            ])
            .send()?
            .error_for_status()?
            .json()?;
        parse_enrich_response(&body, library, genes.len())
    }

    fn library_names(&self) -> Result<Vec<String>> {
        let body: Value = self
            .client
            .get(format!("{}/datasetStatistics", self.base_url))
            .send()?
            .error_for_status()?
            .json()?;
        parse_library_names(&body)
    }
}

fn remote(reason: String) -> DgeError {
    DgeError::Remote { reason }
}

/// Parse an `enrich` response. Each row of the library's array is
/// `[rank, term, p, odds ratio, combined score, genes, adjusted p, ...]`.
pub fn parse_enrich_response(body: &Value, library: &str, n_query: usize) -> Result<Vec<EnrichmentTerm>> {
    let rows = body
        .get(library)
        .and_then(Value::as_array)
        .ok_or_else(|| remote(format!("Enrichr response has no results for library '{}'", library)))?;

    let number = |row: &[Value], i: usize, what: &str| {
        row.get(i)
            .and_then(Value::as_f64)
            .ok_or_else(|| remote(format!("Enrichr row is missing the {}", what)))
    };

    rows.iter()
        .map(|row| -> Result<EnrichmentTerm> {
            let row = row
                .as_array()
                .ok_or_else(|| remote("Enrichr row is not an array".to_string()))?
                .as_slice();
            let term = row
                .get(1)
                .and_then(Value::as_str)
                .ok_or_else(|| remote("Enrichr row is missing the term name".to_string()))?;
            let genes: Vec<String> = row
                .get(5)
                .and_then(Value::as_array)
                .map(|g| g.iter().filter_map(Value::as_str).map(str::to_string).collect())
                .unwrap_or_default();
            let overlap = genes.len();
            Ok(EnrichmentTerm {
                library: library.to_string(),
                term: term.to_string(),
                genes,
                overlap,
                gene_ratio: if n_query > 0 {
                    overlap as f64 / n_query as f64
                } else {
                    0.0
                },
                pvalue: number(row, 2, "p-value")?,
                odds_ratio: number(row, 3, "odds ratio")?,
                combined_score: number(row, 4, "combined score")?,
                adjusted_pvalue: number(row, 6, "adjusted p-value")?,
            })
        })
        .collect()
}

/// Library names from a `datasetStatistics` response
pub fn parse_library_names(body: &Value) -> Result<Vec<String>> {
    let stats = body
        .get("statistics")
        .and_then(Value::as_array)
        .ok_or_else(|| remote("Enrichr statistics response has no 'statistics'".to_string()))?;
    let mut names: Vec<String> = stats
        .iter()
        .filter_map(|s| s.get("libraryName").and_then(Value::as_str))
        .map(str::to_string)
        .collect();
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_enrich_response() {
        let body = json!({
            "GO_Biological_Process_2021": [
                [1, "DNA damage response (GO:0006974)", 1e-6, 12.5, 172.6, ["TP53", "CDKN1A", "MDM2"], 1e-4, 0, 0],
                [2, "apoptotic process (GO:0006915)", 0.01, 3.0, 13.8, ["BAX"], 0.2, 0, 0]
            ]
        });
        let terms = parse_enrich_response(&body, "GO_Biological_Process_2021", 30).unwrap();
        assert_eq!(terms.len(), 2);
        assert_eq!(terms[0].term, "DNA damage response (GO:0006974)");
        assert_eq!(terms[0].overlap, 3);
        assert!((terms[0].gene_ratio - 0.1).abs() < 1e-12);
        assert_eq!(terms[0].adjusted_pvalue, 1e-4);
        assert_eq!(terms[1].genes, vec!["BAX"]);
        assert_eq!(terms[1].library, "GO_Biological_Process_2021");
    }

    #[test]
    fn test_parse_enrich_errors() {
        let body = json!({"KEGG_2019_Mouse": []});
        assert!(parse_enrich_response(&body, "GO_Biological_Process_2021", 3).is_err());
        let bad = json!({"KEGG_2019_Mouse": [[1, "term", "x"]]});
        assert!(parse_enrich_response(&bad, "KEGG_2019_Mouse", 3).is_err());
    }

    #[test]
    fn test_parse_library_names() {
        let body = json!({
            "statistics": [
                {"libraryName": "KEGG_2019_Mouse", "numTerms": 303},
                {"libraryName": "GO_Biological_Process_2021", "numTerms": 6036}
            ]
        });
        let names = parse_library_names(&body).unwrap();
        assert_eq!(names, vec!["GO_Biological_Process_2021", "KEGG_2019_Mouse"]);
    }

    #[test]
    fn test_for_organism() {
        let mouse = EnrichrClient::for_organism("Mouse").unwrap();
        assert_eq!(mouse.base_url(), "https://maayanlab.cloud/Enrichr");
        let fly = EnrichrClient::for_organism("fly").unwrap();
        assert!(fly.base_url().ends_with("FlyEnrichr"));
        assert!(EnrichrClient::for_organism("axolotl").is_err());
    }
}
