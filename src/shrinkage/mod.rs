//! Log fold change shrinkage

mod normal;

pub use normal::{beta_prior_variance, shrink_lfc, DEFAULT_UPPER_QUANTILE};
