//! Gene filters: low-count pre-filtering, Cook's distance outliers and
//! independent filtering of the multiple-testing adjustment

mod cooks;
mod independent;
mod low_count;

pub use cooks::{
    calculate_cooks_distance, cooks_cutoff, cooks_outliers, max_cooks, refit_without_outliers,
    replace_outliers, robust_method_of_moments_disp, MIN_REPLICATES_FOR_COOKS,
    MIN_REPLICATES_FOR_REPLACE,
};
pub use independent::{independent_filtering, IndependentFilter};
pub use low_count::{filter_low_counts, DEFAULT_MIN_TOTAL};
