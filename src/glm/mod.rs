//! Generalized Linear Model fitting for negative binomial data

mod design;
mod fitting;
pub(crate) mod linalg;
mod negative_binomial;

pub use design::{check_full_rank, create_design_matrix, intercept_design, DesignInfo, INTERCEPT};
pub(crate) use fitting::merge_rows;
pub use fitting::{
    fit_glm, fit_nb_glm, fit_single_gene, natural_log_lambda, GeneFit, GlmFitParams, GlmFitResult,
    DEFAULT_RIDGE,
};
pub use negative_binomial::{
    dispersion_log_posterior, nb_log_likelihood, nb_log_likelihood_sum, nb_weight, LogNormalPrior,
    LARGE_BETA, MIN_MU,
};
