//! Error types for dgeflow

use thiserror::Error;

/// Main error type for workflow operations
#[derive(Error, Debug)]
pub enum DgeError {
    #[error("Invalid count matrix: {reason}")]
    InvalidCountMatrix { reason: String },

    #[error("Invalid metadata: {reason}")]
    InvalidMetadata { reason: String },

    #[error(
        "Sample set mismatch: in counts but not clinical: {missing_in_clinical:?}; \
         in clinical but not counts: {missing_in_counts:?}"
    )]
    SampleSetMismatch {
        missing_in_clinical: Vec<String>,
        missing_in_counts: Vec<String>,
    },

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: String, got: String },

    #[error("Invalid design: {reason}")]
    InvalidDesign { reason: String },

    #[error("Invalid contrast specification: {reason}")]
    InvalidContrast { reason: String },

    #[error("Size factor estimation failed: {reason}")]
    SizeFactorFailed { reason: String },

    #[error("Dispersion estimation failed: {reason}")]
    DispersionEstimationFailed { reason: String },

    #[error("Trend fitting failed: {reason}")]
    TrendFittingFailed { reason: String },

    #[error("Empty data: {reason}")]
    EmptyData { reason: String },

    #[error("Empty gene set: {context}")]
    EmptyGeneSet { context: String },

    #[error("{count} identifiers could not be mapped (first: {first})")]
    UnmappedIdentifiers { count: usize, first: String },

    #[error("Remote service error: {reason}")]
    Remote { reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Plot rendering failed: {reason}")]
    Plot { reason: String },

    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Result type alias for workflow operations
pub type Result<T> = std::result::Result<T, DgeError>;
