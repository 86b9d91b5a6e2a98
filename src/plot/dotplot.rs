//! Enrichment dot plot

use std::error::Error;
use std::path::Path;

use plotters::prelude::*;

use super::{padded_range, plot_error};
use crate::enrichment::EnrichmentTable;
use crate::error::{DgeError, Result};

const MAX_LABEL: usize = 48;

/// One term on the dot plot
#[derive(Debug, Clone, PartialEq)]
pub struct DotPoint {
    pub term: String,
    pub gene_ratio: f64,
    pub overlap: usize,
    pub neg_log10_padj: f64,
}

/// The `top` highest-scoring terms with adjusted p-value below `cutoff`,
/// best first.
pub fn dotplot_points(table: &EnrichmentTable, top: usize, cutoff: f64) -> Vec<DotPoint> {
    table
        .significant(cutoff)
        .terms()
        .iter()
        .take(top)
        .map(|t| DotPoint {
            term: t.term.clone(),
            gene_ratio: t.gene_ratio,
            overlap: t.overlap,
            neg_log10_padj: -t.adjusted_pvalue.max(f64::MIN_POSITIVE).log10(),
        })
        .collect()
}

/// Dot plot of the top terms: x is the gene ratio, dot size the overlap and
/// colour `-log10(adjusted p)`. Fails when no term passes `cutoff`.
pub fn render_dotplot<P: AsRef<Path>>(
    table: &EnrichmentTable,
    title: &str,
    top: usize,
    cutoff: f64,
    path: P,
) -> Result<()> {
    let points = dotplot_points(table, top, cutoff);
    if points.is_empty() {
        return Err(DgeError::EmptyData {
            reason: format!("no enriched term with adjusted p-value below {}", cutoff),
        });
    }
    draw_dotplot(&points, title, path.as_ref()).map_err(plot_error)
}

/// Reversed viridis: dark for low values, yellow for high
fn viridis_r(t: f64) -> RGBColor {
    const STOPS: [(f64, f64, f64); 5] = [
        (253.0, 231.0, 37.0),
        (94.0, 201.0, 98.0),
        (33.0, 145.0, 140.0),
        (59.0, 82.0, 139.0),
        (68.0, 1.0, 84.0),
    ];
    let t = t.clamp(0.0, 1.0) * (STOPS.len() - 1) as f64;
    let i = (t.floor() as usize).min(STOPS.len() - 2);
    let f = t - i as f64;
    let (a, b) = (STOPS[i], STOPS[i + 1]);
    let mix = |x: f64, y: f64| (x + (y - x) * f).round() as u8;
    RGBColor(mix(a.0, b.0), mix(a.1, b.1), mix(a.2, b.2))
}

fn shorten(term: &str) -> String {
    if term.chars().count() <= MAX_LABEL {
        term.to_string()
    } else {
        let head: String = term.chars().take(MAX_LABEL - 3).collect();
        format!("{}...", head)
    }
}

fn draw_dotplot(points: &[DotPoint], title: &str, path: &Path) -> std::result::Result<(), Box<dyn Error>> {
    let n = points.len() as i32;
    let height = (120 + 45 * points.len()).max(400) as u32;
    let root = SVGBackend::new(path, (900, height)).into_drawing_area();
    root.fill(&WHITE)?;

    let labels: Vec<String> = points.iter().map(|p| shorten(&p.term)).collect();
    let (c_lo, c_hi) = points
        .iter()
        .map(|p| p.neg_log10_padj)
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    let max_overlap = points.iter().map(|p| p.overlap).max().unwrap_or(1).max(1) as f64;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 22))
        .margin(20)
        .x_label_area_size(45)
        .y_label_area_size(360)
        .build_cartesian_2d(padded_range(points.iter().map(|p| p.gene_ratio).chain([0.0])), -1..n)?;
    chart
        .configure_mesh()
        .y_labels(points.len() + 2)
        .y_label_formatter(&|y: &i32| {
            // Best term at the top
            usize::try_from(n - 1 - *y)
                .ok()
                .and_then(|i| labels.get(i).cloned())
                .unwrap_or_default()
        })
        .x_desc("Gene ratio")
        .draw()?;

    chart.draw_series(points.iter().enumerate().map(|(i, p)| {
        let t = if c_hi > c_lo {
            (p.neg_log10_padj - c_lo) / (c_hi - c_lo)
        } else {
            1.0
        };
        let radius = (4.0 + 12.0 * p.overlap as f64 / max_overlap).round() as i32;
        Circle::new((p.gene_ratio, n - 1 - i as i32), radius, viridis_r(t).filled())
    }))?;

    root.draw(&Text::new(
        format!("colour: -log10(adj p) {:.2} to {:.2}; size: overlap", c_lo, c_hi),
        (20, height as i32 - 20),
        ("sans-serif", 14).into_font(),
    ))?;
    root.present()?;
    Ok(())
}
