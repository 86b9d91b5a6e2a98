//! Gene identifier mapping
//!
//! Identifiers are looked up in fixed-size batches through an
//! [`IdentifierLookup`], one remote request per batch.

mod biomart;

pub use biomart::{build_query, parse_response, BiomartClient, BiomartConfig};

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{DgeError, Result};

pub const DEFAULT_BATCH_SIZE: usize = 200;

/// Source of identifier translations
pub trait IdentifierLookup {
    /// Translate one batch. Ids without a translation are simply absent
    /// from the returned map.
    fn lookup_batch(&self, ids: &[String]) -> Result<HashMap<String, String>>;
}

/// What to do with identifiers that have no translation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmappedPolicy {
    /// Leave them out and record them in [`IdentifierMapping::unmapped`]
    #[default]
    Drop,
    /// Use the uppercased source id in place of a symbol
    KeepSource,
    /// Abort with [`DgeError::UnmappedIdentifiers`]
    Fail,
}

impl std::str::FromStr for UnmappedPolicy {
    type Err = DgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "drop" => Ok(UnmappedPolicy::Drop),
            "keep_source" | "keep" => Ok(UnmappedPolicy::KeepSource),
            "fail" => Ok(UnmappedPolicy::Fail),
            other => Err(DgeError::InvalidInput {
                reason: format!("unknown unmapped policy '{}' (drop, keep-source, fail)", other),
            }),
        }
    }
}

/// Result of [`map_identifiers`], in input order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdentifierMapping {
    /// `(source id, uppercased symbol)` pairs
    pub mapped: Vec<(String, String)>,
    /// Source ids without a translation (only under [`UnmappedPolicy::Drop`])
    pub unmapped: Vec<String>,
}

impl IdentifierMapping {
    pub fn symbols(&self) -> Vec<String> {
        self.mapped.iter().map(|(_, s)| s.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.mapped.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mapped.is_empty()
    }
}

/// Translate `ids` in chunks of `batch_size`, issuing one lookup per chunk
/// in order. Every returned symbol is uppercased.
pub fn map_identifiers(
    lookup: &dyn IdentifierLookup,
    ids: &[String],
    batch_size: usize,
    policy: UnmappedPolicy,
) -> Result<IdentifierMapping> {
    if batch_size == 0 {
        return Err(DgeError::InvalidInput {
            reason: "batch size must be positive".to_string(),
        });
    }

    let mut out = IdentifierMapping::default();
    for (n, batch) in ids.chunks(batch_size).enumerate() {
        let found = lookup.lookup_batch(batch)?;
        log::debug!("Batch {}: {} of {} ids mapped", n + 1, found.len(), batch.len());
        for id in batch {
            match found.get(id) {
                Some(symbol) => out.mapped.push((id.clone(), symbol.to_uppercase())),
                None => match policy {
                    UnmappedPolicy::KeepSource => out.mapped.push((id.clone(), id.to_uppercase())),
                    UnmappedPolicy::Drop | UnmappedPolicy::Fail => out.unmapped.push(id.clone()),
                },
            }
        }
    }

    if let Some(first) = out.unmapped.first() {
        if policy == UnmappedPolicy::Fail {
            return Err(DgeError::UnmappedIdentifiers {
                count: out.unmapped.len(),
                first: first.clone(),
            });
        }
        log::warn!("{} of {} identifiers could not be mapped and were dropped", out.unmapped.len(), ids.len());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Maps `ENSMUSG...N` to `geneN`, except ids ending in 7
    struct FakeMart {
        batches: RefCell<Vec<usize>>,
    }

    impl FakeMart {
        fn new() -> Self {
            Self {
                batches: RefCell::new(Vec::new()),
            }
        }
    }

    impl IdentifierLookup for FakeMart {
        fn lookup_batch(&self, ids: &[String]) -> Result<HashMap<String, String>> {
            self.batches.borrow_mut().push(ids.len());
            Ok(ids
                .iter()
                .filter(|id| !id.ends_with('7'))
                .map(|id| (id.clone(), format!("gene{}", id.trim_start_matches("ENSMUSG"))))
                .collect())
        }
    }

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("ENSMUSG{:011}", i)).collect()
    }

    #[test]
    fn test_batches_of_200() {
        let mart = FakeMart::new();
        map_identifiers(&mart, &ids(450), DEFAULT_BATCH_SIZE, UnmappedPolicy::Drop).unwrap();
        assert_eq!(*mart.batches.borrow(), vec![200, 200, 50]);
    }

    #[test]
    fn test_drop_policy_keeps_order_and_uppercases() {
        let mart = FakeMart::new();
        let input = ids(20);
        let res = map_identifiers(&mart, &input, 6, UnmappedPolicy::Drop).unwrap();
        assert_eq!(res.len(), 18);
        assert_eq!(res.unmapped, vec![input[7].clone(), input[17].clone()]);
        assert!(res.symbols().iter().all(|s| *s == s.to_uppercase()));
        assert_eq!(res.symbols()[0], "GENE00000000000");
        let positions: Vec<usize> = res
            .mapped
            .iter()
            .map(|(id, _)| input.iter().position(|i| i == id).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_keep_source_and_fail() {
        let mart = FakeMart::new();
        let input = vec!["ENSMUSG07".to_string(), "ensmusg01".to_string()];
        let kept = map_identifiers(&mart, &input, 200, UnmappedPolicy::KeepSource).unwrap();
        assert_eq!(kept.symbols(), vec!["ENSMUSG07", "GENEENSMUSG01"]);
        assert!(kept.unmapped.is_empty());

        let err = map_identifiers(&mart, &input, 200, UnmappedPolicy::Fail);
        assert!(matches!(err, Err(DgeError::UnmappedIdentifiers { count: 1, .. })));
    }

    #[test]
    fn test_zero_batch_size_and_empty_input() {
        let mart = FakeMart::new();
        assert!(map_identifiers(&mart, &ids(3), 0, UnmappedPolicy::Drop).is_err());
        let res = map_identifiers(&mart, &[], 200, UnmappedPolicy::Drop).unwrap();
        assert!(res.is_empty());
        assert!(mart.batches.borrow().is_empty());
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("keep-source".parse::<UnmappedPolicy>().unwrap(), UnmappedPolicy::KeepSource);
        assert_eq!("Drop".parse::<UnmappedPolicy>().unwrap(), UnmappedPolicy::Drop);
        assert!("ignore".parse::<UnmappedPolicy>().is_err());
    }
}
