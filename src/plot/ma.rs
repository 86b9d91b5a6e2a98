//! MA plot: log fold change against mean expression

use std::error::Error;
use std::path::Path;

use plotters::prelude::*;

use super::{padded_range, plot_error, PLOT_SIZE};
use crate::error::Result;
use crate::io::ResultsTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaClass {
    Sig,
    NonSig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MaPoint {
    pub gene_id: String,
    pub log10_base_mean: f64,
    pub log2_fold_change: f64,
    pub class: MaClass,
}

/// One point per gene with a positive base mean. A gene is `Sig` when its
/// adjusted p-value is at most `padj_threshold`; NaN is never significant.
pub fn ma_points(table: &ResultsTable, padj_threshold: f64) -> Vec<MaPoint> {
    table
        .rows()
        .filter(|r| r.base_mean > 0.0 && r.log2_fold_change.is_finite())
        .map(|r| MaPoint {
            gene_id: r.gene_id.to_string(),
            log10_base_mean: r.base_mean.log10(),
            log2_fold_change: r.log2_fold_change,
            class: if r.padj <= padj_threshold {
                MaClass::Sig
            } else {
                MaClass::NonSig
            },
        })
        .collect()
}

pub fn render_ma<P: AsRef<Path>>(points: &[MaPoint], title: &str, path: P) -> Result<()> {
    draw_ma(points, title, path.as_ref()).map_err(plot_error)
}

fn draw_ma(points: &[MaPoint], title: &str, path: &Path) -> std::result::Result<(), Box<dyn Error>> {
    let root = SVGBackend::new(path, PLOT_SIZE).into_drawing_area();
    root.fill(&WHITE)?;

    let x_range = padded_range(points.iter().map(|p| p.log10_base_mean));
    let y_max = points
        .iter()
        .map(|p| p.log2_fold_change.abs())
        .fold(1.0, f64::max)
        * 1.05;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 24))
        .margin(20)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(x_range.clone(), -y_max..y_max)?;
    chart
        .configure_mesh()
        .x_desc("log10(mean of normalized counts)")
        .y_desc("log2 fold change")
        .draw()?;

    chart.draw_series(LineSeries::new(
        vec![(x_range.start, 0.0), (x_range.end, 0.0)],
        BLACK.mix(0.5),
    ))?;

    for (class, color, label) in [
        (MaClass::NonSig, RGBColor(160, 160, 160), "non-sig"),
        (MaClass::Sig, RGBColor(214, 39, 40), "sig"),
    ] {
        chart
            .draw_series(
                points
                    .iter()
                    .filter(|p| p.class == class)
                    .map(|p| Circle::new((p.log10_base_mean, p.log2_fold_change), 2, color.filled())),
            )?
            .label(label)
            .legend(move |(x, y)| Circle::new((x, y), 4, color.filled()));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;
    root.present()?;
    Ok(())
}
