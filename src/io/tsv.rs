//! Tab-separated readers for clinical records and count tables

use std::collections::{HashMap, HashSet};
use std::path::Path;

use ndarray::Array2;

use crate::data::{CountMatrix, SampleMetadata};
use crate::error::{DgeError, Result};

/// Default sample id column of the clinical table
pub const DEFAULT_ID_COLUMN: &str = "sampleID";

/// Default gene id column of the count table
pub const DEFAULT_GENE_COLUMN: &str = "geneIDs";

fn tsv_reader<P: AsRef<Path>>(path: P) -> Result<csv::Reader<std::fs::File>> {
    Ok(csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)?)
}

/// Read the clinical table.
///
/// `id_column` names the sample id column; all other columns become
/// categorical attributes. Rows come back sorted by sample id.
pub fn read_clinical<P: AsRef<Path>>(path: P, id_column: &str) -> Result<SampleMetadata> {
    let mut reader = tsv_reader(path)?;
    let headers: Vec<String> = reader.headers()?.iter().map(String::from).collect();

    let id_idx = headers
        .iter()
        .position(|h| h == id_column)
        .ok_or_else(|| DgeError::InvalidMetadata {
            reason: format!("clinical table has no '{}' column", id_column),
        })?;

    let mut rows: Vec<Vec<String>> = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.iter().all(|f| f.is_empty()) {
            continue;
        }
        rows.push(record.iter().map(String::from).collect());
    }

    if rows.is_empty() {
        return Err(DgeError::EmptyData {
            reason: "No samples found in clinical table".to_string(),
        });
    }

    rows.sort_by(|a, b| a[id_idx].cmp(&b[id_idx]));

    let sample_ids = rows.iter().map(|r| r[id_idx].clone()).collect();
    let mut metadata = SampleMetadata::new(sample_ids)?;
    for (col, name) in headers.iter().enumerate() {
        if col == id_idx {
            continue;
        }
        let values = rows.iter().map(|r| r[col].clone()).collect();
        metadata.add_attribute(name, values)?;
    }

    log::debug!(
        "Read {} clinical records with attributes [{}]",
        metadata.n_samples(),
        metadata.attribute_names().join(", ")
    );
    Ok(metadata)
}

/// Read the count table: first column gene ids, one column per sample
pub fn read_counts<P: AsRef<Path>>(path: P) -> Result<CountMatrix> {
    let mut reader = tsv_reader(path)?;
    let headers: Vec<String> = reader.headers()?.iter().map(String::from).collect();
    if headers.len() < 2 {
        return Err(DgeError::InvalidCountMatrix {
            reason: "count table needs a gene id column and at least one sample".to_string(),
        });
    }
    if headers[0] != DEFAULT_GENE_COLUMN {
        log::debug!(
            "Count table gene column is '{}', expected '{}'",
            headers[0],
            DEFAULT_GENE_COLUMN
        );
    }
    let sample_ids: Vec<String> = headers[1..].to_vec();
    let n_samples = sample_ids.len();

    let mut gene_ids = Vec::new();
    let mut values = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        if record.iter().all(|f| f.is_empty()) {
            continue;
        }
        gene_ids.push(record[0].to_string());
        for field in record.iter().skip(1) {
            let v = field
                .parse::<f64>()
                .map_err(|_| DgeError::InvalidCountMatrix {
                    reason: format!("invalid count '{}' on data line {}", field, line + 1),
                })?;
            values.push(v);
        }
    }

    if gene_ids.is_empty() {
        return Err(DgeError::EmptyData {
            reason: "No genes found in count table".to_string(),
        });
    }

    let counts = Array2::from_shape_vec((gene_ids.len(), n_samples), values).map_err(|e| {
        DgeError::InvalidCountMatrix {
            reason: e.to_string(),
        }
    })?;
    CountMatrix::new(counts, gene_ids, sample_ids)
}

/// Reorder count columns to the clinical sample order.
///
/// The two sample sets must be identical; any difference is reported with the
/// offending ids on both sides.
pub fn align_to_clinical(counts: &CountMatrix, clinical: &SampleMetadata) -> Result<CountMatrix> {
    let count_ids: HashSet<&str> = counts.sample_ids().iter().map(|s| s.as_str()).collect();
    let clinical_ids: HashSet<&str> = clinical.sample_ids().iter().map(|s| s.as_str()).collect();

    let mut missing_in_clinical: Vec<String> = counts
        .sample_ids()
        .iter()
        .filter(|id| !clinical_ids.contains(id.as_str()))
        .cloned()
        .collect();
    let mut missing_in_counts: Vec<String> = clinical
        .sample_ids()
        .iter()
        .filter(|id| !count_ids.contains(id.as_str()))
        .cloned()
        .collect();

    if !missing_in_clinical.is_empty() || !missing_in_counts.is_empty() {
        missing_in_clinical.sort();
        missing_in_counts.sort();
        return Err(DgeError::SampleSetMismatch {
            missing_in_clinical,
            missing_in_counts,
        });
    }

    let position: HashMap<&str, usize> = counts
        .sample_ids()
        .iter()
        .enumerate()
        .map(|(i, s)| (s.as_str(), i))
        .collect();
    let order: Vec<usize> = clinical
        .sample_ids()
        .iter()
        .map(|id| position[id.as_str()])
        .collect();
    counts.subset_samples(&order)
}

/// Load both tables and align the counts to the sorted clinical order
pub fn load_dataset<P: AsRef<Path>, Q: AsRef<Path>>(
    clinical_path: P,
    counts_path: Q,
    id_column: &str,
) -> Result<(CountMatrix, SampleMetadata)> {
    let clinical = read_clinical(clinical_path, id_column)?;
    let counts = read_counts(counts_path)?;
    let counts = align_to_clinical(&counts, &clinical)?;
    log::info!(
        "Loaded {} genes x {} samples",
        counts.n_genes(),
        counts.n_samples()
    );
    Ok((counts, clinical))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn clinical_file() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "sampleID\torgan\tcondition").unwrap();
        writeln!(file, "S3\tkidney\tcis").unwrap();
        writeln!(file, "S1\tkidney\tuntrt").unwrap();
        writeln!(file, "S2\tliver\tuntrt").unwrap();
        file
    }

    #[test]
    fn test_read_clinical_sorted() {
        let file = clinical_file();
        let meta = read_clinical(file.path(), DEFAULT_ID_COLUMN).unwrap();
        assert_eq!(meta.sample_ids(), &["S1", "S2", "S3"]);
        assert_eq!(meta.attribute("organ").unwrap(), &["kidney", "liver", "kidney"]);
        assert_eq!(meta.attribute_names(), &["organ", "condition"]);
    }

    #[test]
    fn test_missing_id_column() {
        let file = clinical_file();
        assert!(matches!(
            read_clinical(file.path(), "sample"),
            Err(DgeError::InvalidMetadata { .. })
        ));
    }

    #[test]
    fn test_read_counts() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "geneIDs\tS2\tS1\tS3").unwrap();
        writeln!(file, "ENSMUSG01\t100\t200\t150").unwrap();
        writeln!(file, "ENSMUSG02\t50\t75\t60").unwrap();

        let matrix = read_counts(file.path()).unwrap();
        assert_eq!(matrix.n_genes(), 2);
        assert_eq!(matrix.n_samples(), 3);
        assert_eq!(matrix.counts()[[0, 1]], 200.0);
    }

    #[test]
    fn test_read_counts_rejects_text() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "geneIDs\tS1").unwrap();
        writeln!(file, "ENSMUSG01\tmany").unwrap();
        assert!(matches!(
            read_counts(file.path()),
            Err(DgeError::InvalidCountMatrix { .. })
        ));
    }

    #[test]
    fn test_load_aligns_to_clinical_order() {
        let clinical = clinical_file();
        let mut counts = NamedTempFile::new().unwrap();
        writeln!(counts, "geneIDs\tS2\tS3\tS1").unwrap();
        writeln!(counts, "g1\t2\t3\t1").unwrap();

        let (matrix, meta) = load_dataset(clinical.path(), counts.path(), "sampleID").unwrap();
        assert_eq!(matrix.sample_ids(), meta.sample_ids());
        assert_eq!(matrix.counts().row(0).to_vec(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_load_reports_sample_mismatch() {
        let clinical = clinical_file();
        let mut counts = NamedTempFile::new().unwrap();
        writeln!(counts, "geneIDs\tS1\tS2\tS9").unwrap();
        writeln!(counts, "g1\t2\t3\t1").unwrap();

        match load_dataset(clinical.path(), counts.path(), "sampleID") {
            Err(DgeError::SampleSetMismatch {
                missing_in_clinical,
                missing_in_counts,
            }) => {
                assert_eq!(missing_in_clinical, vec!["S9".to_string()]);
                assert_eq!(missing_in_counts, vec!["S3".to_string()]);
            }
            other => panic!("expected sample set mismatch, got {:?}", other.map(|_| ())),
        }
    }
}
