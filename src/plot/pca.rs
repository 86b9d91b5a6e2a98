//! Principal component analysis of samples

use std::error::Error;
use std::path::Path;

use nalgebra::DMatrix;
use ndarray::{Array2, Axis};
use plotters::prelude::*;

use super::{distinct, padded_range, plot_error, PALETTE, PLOT_SIZE};
use crate::data::DgeDataSet;
use crate::error::{DgeError, Result};

const N_COMPONENTS: usize = 3;

/// Options of [`pca`]
#[derive(Debug, Clone)]
pub struct PcaParams {
    /// Number of highest-variance genes to use; 0 uses every gene
    pub n_top: usize,
    /// Use the VST layer; otherwise `log2(normalized + 1)`
    pub use_vst: bool,
    /// Sample attribute mapped to marker colour
    pub color_by: String,
    /// Sample attribute mapped to marker shape
    pub symbol_by: String,
}

impl Default for PcaParams {
    fn default() -> Self {
        Self {
            n_top: 500,
            use_vst: true,
            color_by: "organ".to_string(),
            symbol_by: "condition".to_string(),
        }
    }
}

/// Sample coordinates on the first three principal components
#[derive(Debug, Clone)]
pub struct PcaResult {
    pub sample_ids: Vec<String>,
    /// Samples x 3
    pub coordinates: Array2<f64>,
    pub explained_variance_ratio: Vec<f64>,
    pub cumulative_variance_ratio: Vec<f64>,
    pub color_labels: Vec<String>,
    pub symbol_labels: Vec<String>,
    pub color_by: String,
    pub symbol_by: String,
    pub n_genes_used: usize,
}

/// Project samples onto the top three principal components of the
/// `n_top` most variable genes.
pub fn pca(dds: &DgeDataSet, params: &PcaParams) -> Result<PcaResult> {
    let n_samples = dds.n_samples();
    if n_samples < N_COMPONENTS {
        return Err(DgeError::InvalidInput {
            reason: format!("PCA needs at least {} samples, got {}", N_COMPONENTS, n_samples),
        });
    }
    let metadata = dds.metadata();
    let color_labels = metadata.require_attribute(&params.color_by)?.to_vec();
    let symbol_labels = metadata.require_attribute(&params.symbol_by)?.to_vec();

    let data: Array2<f64> = if params.use_vst {
        dds.vst_layer()
            .cloned()
            .ok_or_else(|| DgeError::InvalidInput {
                reason: "PCA on the VST layer requires vst() to be run first".to_string(),
            })?
    } else {
        dds.normalized_counts()
            .ok_or_else(|| DgeError::InvalidInput {
                reason: "size factors must be estimated before PCA".to_string(),
            })?
            .mapv(|v| (v + 1.0).log2())
    };

    // Per-gene variance (population form) and top-n selection
    let variances: Vec<f64> = data
        .axis_iter(Axis(0))
        .map(|row| {
            let mean = row.sum() / n_samples as f64;
            row.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n_samples as f64
        })
        .collect();
    let mut order: Vec<usize> = (0..variances.len()).collect();
    order.sort_by(|&a, &b| variances[b].total_cmp(&variances[a]));
    let n_use = if params.n_top == 0 {
        order.len()
    } else {
        params.n_top.min(order.len())
    };
    let selected = &order[..n_use];

    // Samples x genes, centred per gene
    let mut centred = DMatrix::<f64>::zeros(n_samples, n_use);
    for (k, &g) in selected.iter().enumerate() {
        let row = data.row(g);
        let mean = row.sum() / n_samples as f64;
        for j in 0..n_samples {
            centred[(j, k)] = row[j] - mean;
        }
    }

    let svd = centred.svd(true, false);
    let u = svd.u.ok_or_else(|| DgeError::InvalidInput {
        reason: "singular value decomposition failed".to_string(),
    })?;
    let mut components: Vec<(usize, f64)> = svd.singular_values.iter().copied().enumerate().collect();
    components.sort_by(|a, b| b.1.total_cmp(&a.1));

    let total: f64 = components.iter().map(|(_, s)| s * s).sum();
    let mut coordinates = Array2::zeros((n_samples, N_COMPONENTS));
    let mut explained_variance_ratio = Vec::with_capacity(N_COMPONENTS);
    for (pc, &(idx, s)) in components.iter().take(N_COMPONENTS).enumerate() {
        for j in 0..n_samples {
            coordinates[[j, pc]] = u[(j, idx)] * s;
        }
        explained_variance_ratio.push(if total > 0.0 { s * s / total } else { 0.0 });
    }
    // Fewer singular values than components when genes < 3
    explained_variance_ratio.resize(N_COMPONENTS, 0.0);

    let cumulative_variance_ratio: Vec<f64> = explained_variance_ratio
        .iter()
        .scan(0.0, |acc, r| {
            *acc += r;
            Some(*acc)
        })
        .collect();

    for (pc, (r, c)) in explained_variance_ratio
        .iter()
        .zip(&cumulative_variance_ratio)
        .enumerate()
    {
        log::info!("PC{}: {:.2}% of variance ({:.2}% cumulative)", pc + 1, 100.0 * r, 100.0 * c);
    }

    Ok(PcaResult {
        sample_ids: dds.counts().sample_ids().to_vec(),
        coordinates,
        explained_variance_ratio,
        cumulative_variance_ratio,
        color_labels,
        symbol_labels,
        color_by: params.color_by.clone(),
        symbol_by: params.symbol_by.clone(),
        n_genes_used: n_use,
    })
}

/// Draw the PCA as a 3-D scatter, colour by one attribute and marker shape
/// by the other.
pub fn render_pca<P: AsRef<Path>>(result: &PcaResult, path: P) -> Result<()> {
    draw_pca(result, path.as_ref()).map_err(plot_error)
}

fn draw_pca(result: &PcaResult, path: &Path) -> std::result::Result<(), Box<dyn Error>> {
    let root = SVGBackend::new(path, PLOT_SIZE).into_drawing_area();
    root.fill(&WHITE)?;

    let axis = |pc: usize| padded_range(result.coordinates.column(pc).iter().copied());
    let ratio = &result.explained_variance_ratio;
    let caption = format!(
        "PCA ({} genes): PC1 {:.1}%, PC2 {:.1}%, PC3 {:.1}%",
        result.n_genes_used,
        100.0 * ratio[0],
        100.0 * ratio[1],
        100.0 * ratio[2]
    );

    let mut chart = ChartBuilder::on(&root)
        .caption(caption, ("sans-serif", 24))
        .margin(20)
        .build_cartesian_3d(axis(0), axis(1), axis(2))?;
    chart.with_projection(|mut pb| {
        pb.yaw = 0.6;
        pb.pitch = 0.3;
        pb.scale = 0.85;
        pb.into_matrix()
    });
    chart.configure_axes().light_grid_style(BLACK.mix(0.1)).draw()?;

    let colors = distinct(&result.color_labels);
    let symbols = distinct(&result.symbol_labels);

    for (ci, color_label) in colors.iter().enumerate() {
        for (si, symbol_label) in symbols.iter().enumerate() {
            let color = PALETTE[ci % PALETTE.len()];
            let points: Vec<(f64, f64, f64)> = (0..result.sample_ids.len())
                .filter(|&j| {
                    &result.color_labels[j] == color_label && &result.symbol_labels[j] == symbol_label
                })
                .map(|j| {
                    let c = result.coordinates.row(j);
                    (c[0], c[1], c[2])
                })
                .collect();
            if points.is_empty() {
                continue;
            }

            let label = format!("{} / {}", color_label, symbol_label);
            let style = color.filled();
            match MarkerShape::for_index(si) {
                MarkerShape::Circle => {
                    chart
                        .draw_series(points.iter().map(|&p| Circle::new(p, 6, style)))?
                        .label(label)
                        .legend(move |(x, y)| Circle::new((x, y), 5, color.filled()));
                }
                MarkerShape::Triangle => {
                    chart
                        .draw_series(points.iter().map(|&p| TriangleMarker::new(p, 7, style)))?
                        .label(label)
                        .legend(move |(x, y)| TriangleMarker::new((x, y), 6, color.filled()));
                }
                MarkerShape::Cross => {
                    chart
                        .draw_series(points.iter().map(|&p| Cross::new(p, 6, color.stroke_width(2))))?
                        .label(label)
                        .legend(move |(x, y)| Cross::new((x, y), 5, color.stroke_width(2)));
                }
            }
        }
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;
    root.present()?;
    Ok(())
}

/// Marker of the n-th symbol level, shared by the series and its legend entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MarkerShape {
    Circle,
    Triangle,
    Cross,
}

impl MarkerShape {
    fn for_index(index: usize) -> Self {
        match index % 3 {
            0 => MarkerShape::Circle,
            1 => MarkerShape::Triangle,
            _ => MarkerShape::Cross,
        }
    }
}
