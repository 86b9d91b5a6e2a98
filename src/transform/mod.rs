//! Transformations of count data for visualization
//!
//! The variance-stabilizing transform puts counts on an approximately
//! log2 scale with variance roughly independent of the mean, for PCA and
//! other distance-based views.

mod vst;

pub use vst::{vst, vst_value, VstResult, VST_SUBSAMPLE};
