//! Statistical testing for differential expression

mod fdr;
mod pvalue;
mod wald;

pub use fdr::benjamini_hochberg;
pub use pvalue::wald_pvalue;
pub use wald::{wald_test, WaldColumns};

use crate::data::DgeDataSet;
use crate::error::Result;
use crate::filter::{cooks_cutoff, cooks_outliers, independent_filtering};
use crate::glm::DesignInfo;
use crate::io::{Contrast, ResultColumns, ResultsTable};

/// Parameters of [`results`]
#[derive(Debug, Clone)]
pub struct TestParams {
    /// Comparison to report; the last coefficient when `None`
    pub contrast: Option<Contrast>,
    /// Target FDR for independent filtering
    pub alpha: f64,
    pub independent_filtering: bool,
    /// Cook's distance above which p-values are discarded. `None` uses the
    /// 99% F quantile; `Some(f64::INFINITY)` turns the filter off.
    pub cooks_cutoff: Option<f64>,
}

impl Default for TestParams {
    fn default() -> Self {
        Self {
            contrast: None,
            alpha: 0.05,
            independent_filtering: true,
            cooks_cutoff: None,
        }
    }
}

/// Wald test, Cook's filtering and BH adjustment for one contrast
pub fn results(dds: &DgeDataSet, design_info: &DesignInfo, params: &TestParams) -> Result<ResultsTable> {
    let contrast = match &params.contrast {
        Some(c) => c.clone(),
        None => design_info.contrast_for(design_info.default_coefficient())?,
    };
    let (coef_idx, sign) = design_info.contrast_index(&contrast.numerator, &contrast.denominator)?;

    let mut wald = wald_test(dds, coef_idx, sign)?;

    if dds.cooks().is_some() {
        let cutoff = params
            .cooks_cutoff
            .unwrap_or_else(|| cooks_cutoff(dds.n_samples(), design_info.coef_names.len()));
        let outliers = cooks_outliers(dds, cutoff);
        let mut n_filtered = 0;
        for (p, outlier) in wald.pvalues.iter_mut().zip(&outliers) {
            if *outlier {
                *p = f64::NAN;
                n_filtered += 1;
            }
        }
        if n_filtered > 0 {
            log::info!("{} genes flagged by Cook's distance (cutoff {:.3})", n_filtered, cutoff);
        }
    }

    let padj = if params.independent_filtering {
        independent_filtering(&wald.pvalues, &wald.base_means, params.alpha).padj
    } else {
        benjamini_hochberg(&wald.pvalues)
    };

    log::info!("Tested {}", contrast.name());
    ResultsTable::new(
        dds.gene_ids().to_vec(),
        contrast,
        ResultColumns {
            base_means: wald.base_means,
            log2_fold_changes: wald.log2_fold_changes,
            lfc_se: wald.lfc_se,
            stat: wald.stat,
            pvalues: wald.pvalues,
            padj,
        },
    )
}
