//! Variance Stabilizing Transformation (VST)

use ndarray::{Array1, Array2, Axis};
use rayon::prelude::*;

use crate::data::DgeDataSet;
use crate::dispersion::{
    estimate_gene_wise, fit_dispersion_function, DispersionFunction, DispersionParams,
};
use crate::error::{DgeError, Result};
use crate::glm::intercept_design;

/// Genes used to fit the blind dispersion trend on large datasets
pub const VST_SUBSAMPLE: usize = 1000;

/// Transformed values with the dispersion function that produced them
#[derive(Debug, Clone)]
pub struct VstResult {
    /// Genes x samples, log2-like scale
    pub data: Array2<f64>,
    pub gene_ids: Vec<String>,
    pub sample_ids: Vec<String>,
    pub function: DispersionFunction,
    pub blind: bool,
}

/// Variance-stabilizing transform of a single normalized count
pub fn vst_value(q: f64, function: DispersionFunction) -> f64 {
    let q = q.max(0.0);
    match function {
        DispersionFunction::Parametric {
            asympt_disp: a0,
            extra_pois: a1,
        } => {
            let num = 1.0 + a1 + 2.0 * a0 * q + 2.0 * (a0 * q * (1.0 + a1 + a0 * q)).sqrt();
            (num / (4.0 * a0)).log2()
        }
        DispersionFunction::Mean(a) => {
            (2.0 * (a * q).sqrt().asinh() - a.ln() - 4.0_f64.ln()) / std::f64::consts::LN_2
        }
    }
}

/// Apply the VST to the dataset's normalized counts.
///
/// With `blind`, the dispersion trend is re-estimated under an
/// intercept-only design, ignoring sample labels; otherwise the dataset's
/// fitted dispersion function is used.
pub fn vst(dds: &DgeDataSet, blind: bool) -> Result<VstResult> {
    let normalized = dds.normalized_counts().ok_or_else(|| DgeError::InvalidInput {
        reason: "size factors must be estimated before the VST".to_string(),
    })?;

    let function = if blind {
        blind_dispersion_function(dds)?
    } else {
        dds.dispersion_function().ok_or_else(|| DgeError::InvalidInput {
            reason: "a non-blind VST needs fitted dispersions".to_string(),
        })?
    };
    log::info!("VST with {:?} (blind = {})", function, blind);

    let rows: Vec<Vec<f64>> = (0..normalized.nrows())
        .into_par_iter()
        .map(|i| normalized.row(i).iter().map(|&q| vst_value(q, function)).collect())
        .collect();
    let mut data = Array2::zeros(normalized.dim());
    for (i, row) in rows.into_iter().enumerate() {
        data.row_mut(i).assign(&Array1::from(row));
    }

    Ok(VstResult {
        data,
        gene_ids: dds.gene_ids().to_vec(),
        sample_ids: dds.counts().sample_ids().to_vec(),
        function,
        blind,
    })
}

/// Dispersion trend under `~ 1`, fitted on at most [`VST_SUBSAMPLE`] genes
/// spread evenly over the base-mean range (base mean above 5).
fn blind_dispersion_function(dds: &DgeDataSet) -> Result<DispersionFunction> {
    let size_factors = dds.size_factors().ok_or_else(|| DgeError::InvalidInput {
        reason: "size factors must be estimated before the VST".to_string(),
    })?;
    let normalized = dds.normalized_counts().ok_or_else(|| DgeError::InvalidInput {
        reason: "normalized counts missing".to_string(),
    })?;
    let n_samples = dds.n_samples();
    if n_samples < 2 {
        return Err(DgeError::InvalidInput {
            reason: "a blind VST needs at least two samples".to_string(),
        });
    }
    let means: Vec<f64> = normalized
        .axis_iter(Axis(0))
        .map(|r| r.sum() / n_samples as f64)
        .collect();

    let rows: Vec<usize> = if dds.n_genes() > VST_SUBSAMPLE {
        let mut expressed: Vec<usize> = (0..means.len()).filter(|&i| means[i] > 5.0).collect();
        expressed.sort_by(|&a, &b| means[a].total_cmp(&means[b]));
        if expressed.len() > VST_SUBSAMPLE {
            let step = expressed.len() as f64 / VST_SUBSAMPLE as f64;
            (0..VST_SUBSAMPLE)
                .map(|k| expressed[(k as f64 * step) as usize])
                .collect()
        } else {
            expressed
        }
    } else {
        (0..dds.n_genes()).collect()
    };

    let params = DispersionParams::default();
    let counts = dds.model_counts().select(Axis(0), &rows);
    let gene_wise = estimate_gene_wise(
        counts.view(),
        size_factors.view(),
        intercept_design(n_samples).view(),
        &vec![0; n_samples],
        &params,
    );
    let sub_means: Vec<f64> = rows.iter().map(|&i| means[i]).collect();
    Ok(fit_dispersion_function(
        &sub_means,
        &gene_wise.dispersions.to_vec(),
        &params,
    ))
}
