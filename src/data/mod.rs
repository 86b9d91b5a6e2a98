//! Data structures for the expression workflow

mod count_matrix;
mod dataset;
mod metadata;

pub use count_matrix::CountMatrix;
pub use dataset::DgeDataSet;
pub use metadata::SampleMetadata;
