//! Diagnostic plots
//!
//! Every plot is split into a pure function computing the plotted points
//! and a renderer writing an SVG file. Renderers never touch the dataset.

mod dispersion;
mod dotplot;
mod ma;
mod pca;
mod volcano;

pub use dispersion::{dispersion_points, render_dispersion, DispersionPoint, DispersionSeries};
pub use dotplot::{dotplot_points, render_dotplot, DotPoint};
pub use ma::{ma_points, render_ma, MaClass, MaPoint};
pub use pca::{pca, render_pca, PcaParams, PcaResult};
pub use volcano::{render_volcano, volcano_points, VolcanoClass, VolcanoPoint, VolcanoThresholds};

use std::ops::Range;

use plotters::style::RGBColor;

use crate::error::DgeError;

/// Canvas size of every plot
pub(crate) const PLOT_SIZE: (u32, u32) = (1000, 750);

/// Qualitative palette for categorical labels
pub(crate) const PALETTE: [RGBColor; 8] = [
    RGBColor(31, 119, 180),
    RGBColor(255, 127, 14),
    RGBColor(44, 160, 44),
    RGBColor(214, 39, 40),
    RGBColor(148, 103, 189),
    RGBColor(140, 86, 75),
    RGBColor(227, 119, 194),
    RGBColor(127, 127, 127),
];

pub(crate) fn plot_error(e: impl std::fmt::Display) -> DgeError {
    DgeError::Plot {
        reason: e.to_string(),
    }
}

/// Range spanning the finite values with 5% padding on each side
pub(crate) fn padded_range<I: IntoIterator<Item = f64>>(values: I) -> Range<f64> {
    let (lo, hi) = values
        .into_iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() {
        return 0.0..1.0;
    }
    let pad = if hi > lo { 0.05 * (hi - lo) } else { 0.5 };
    (lo - pad)..(hi + pad)
}

/// Distinct labels in order of first appearance
pub(crate) fn distinct(labels: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for l in labels {
        if !out.contains(l) {
            out.push(l.clone());
        }
    }
    out
}
