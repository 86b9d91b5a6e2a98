//! Volcano plot: significance against log fold change

use std::error::Error;
use std::path::Path;

use plotters::prelude::*;
use serde::{Deserialize, Serialize};

use super::{padded_range, plot_error, PLOT_SIZE};
use crate::error::Result;
use crate::io::ResultsTable;

/// Guide lines drawn at `lfc = [-lfc, lfc]` and `-log10(padj)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolcanoThresholds {
    pub lfc: f64,
    pub padj: f64,
}

impl Default for VolcanoThresholds {
    fn default() -> Self {
        Self { lfc: 1.0, padj: 0.05 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolcanoClass {
    Up,
    Down,
    NotSig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VolcanoPoint {
    pub gene_id: String,
    pub log2_fold_change: f64,
    pub neg_log10_padj: f64,
    pub class: VolcanoClass,
}

/// Rows with any NaN statistic are dropped. A padj of exactly zero is
/// clamped to the smallest positive double so the point stays on the plot.
pub fn volcano_points(table: &ResultsTable, thresholds: &VolcanoThresholds) -> Vec<VolcanoPoint> {
    table
        .rows()
        .filter(|r| {
            [r.base_mean, r.log2_fold_change, r.lfc_se, r.stat, r.pvalue, r.padj]
                .iter()
                .all(|v| !v.is_nan())
        })
        .map(|r| {
            let significant = r.padj <= thresholds.padj;
            let class = if significant && r.log2_fold_change >= thresholds.lfc {
                VolcanoClass::Up
            } else if significant && r.log2_fold_change <= -thresholds.lfc {
                VolcanoClass::Down
            } else {
                VolcanoClass::NotSig
            };
            VolcanoPoint {
                gene_id: r.gene_id.to_string(),
                log2_fold_change: r.log2_fold_change,
                neg_log10_padj: -r.padj.max(f64::MIN_POSITIVE).log10(),
                class,
            }
        })
        .collect()
}

pub fn render_volcano<P: AsRef<Path>>(
    points: &[VolcanoPoint],
    thresholds: &VolcanoThresholds,
    title: &str,
    path: P,
) -> Result<()> {
    draw_volcano(points, thresholds, title, path.as_ref()).map_err(plot_error)
}

fn draw_volcano(
    points: &[VolcanoPoint],
    thresholds: &VolcanoThresholds,
    title: &str,
    path: &Path,
) -> std::result::Result<(), Box<dyn Error>> {
    let root = SVGBackend::new(path, PLOT_SIZE).into_drawing_area();
    root.fill(&WHITE)?;

    let x_max = points
        .iter()
        .map(|p| p.log2_fold_change.abs())
        .fold(thresholds.lfc, f64::max)
        * 1.1;
    let padj_line = -thresholds.padj.log10();
    let y_range = padded_range(
        points
            .iter()
            .map(|p| p.neg_log10_padj)
            .chain([0.0, padj_line]),
    );

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 24))
        .margin(20)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(-x_max..x_max, y_range.clone())?;
    chart
        .configure_mesh()
        .x_desc("log2 fold change")
        .y_desc("-log10(padj)")
        .draw()?;

    let guide = BLACK.mix(0.4);
    for x in [-thresholds.lfc, thresholds.lfc] {
        chart.draw_series(LineSeries::new(
            vec![(x, y_range.start), (x, y_range.end)],
            guide,
        ))?;
    }
    chart.draw_series(LineSeries::new(
        vec![(-x_max, padj_line), (x_max, padj_line)],
        guide,
    ))?;

    for (class, color, label) in [
        (VolcanoClass::NotSig, RGBColor(160, 160, 160), "not significant"),
        (VolcanoClass::Up, RGBColor(214, 39, 40), "up"),
        (VolcanoClass::Down, RGBColor(31, 119, 180), "down"),
    ] {
        chart
            .draw_series(
                points
                    .iter()
                    .filter(|p| p.class == class)
                    .map(|p| Circle::new((p.log2_fold_change, p.neg_log10_padj), 3, color.filled())),
            )?
            .label(label)
            .legend(move |(x, y)| Circle::new((x, y), 4, color.filled()));
    }

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperLeft)
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;
    root.present()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{Contrast, ResultColumns};

    fn table() -> ResultsTable {
        ResultsTable::new(
            vec!["up".into(), "down".into(), "weak".into(), "nan".into(), "zero".into()],
            Contrast::new("condition", "cis", "untrt"),
            ResultColumns {
                base_means: vec![100.0, 200.0, 50.0, 10.0, 500.0],
                log2_fold_changes: vec![2.0, -3.0, 0.5, 1.0, 4.0],
                lfc_se: vec![0.2, 0.3, 0.4, 0.5, 0.1],
                stat: vec![10.0, -10.0, 1.25, 2.0, 40.0],
                pvalues: vec![1e-8, 1e-9, 0.2, 0.04, 0.0],
                padj: vec![1e-6, 1e-7, 0.3, f64::NAN, 0.0],
            },
        )
        .unwrap()
    }

    #[test]
    fn test_volcano_classes() {
        let points = volcano_points(&table(), &VolcanoThresholds::default());
        assert_eq!(points.len(), 4);
        assert_eq!(points[0].class, VolcanoClass::Up);
        assert_eq!(points[1].class, VolcanoClass::Down);
        assert_eq!(points[2].class, VolcanoClass::NotSig);
        assert!((points[0].neg_log10_padj - 6.0).abs() < 1e-9);
        assert!(points[3].neg_log10_padj.is_finite());
        assert!(points.iter().all(|p| p.gene_id != "nan"));
    }

    #[test]
    fn test_render_volcano() {
        let thresholds = VolcanoThresholds::default();
        let points = volcano_points(&table(), &thresholds);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("volcano.svg");
        render_volcano(&points, &thresholds, "Volcano", &path).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("<svg"));
    }
}
