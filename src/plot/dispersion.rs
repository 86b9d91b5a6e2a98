//! Dispersion estimates against mean expression

use std::error::Error;
use std::path::Path;

use plotters::prelude::*;

use super::{padded_range, plot_error, PLOT_SIZE};
use crate::data::DgeDataSet;
use crate::dispersion::base_means;
use crate::error::{DgeError, Result};

/// Which dispersion estimate a point shows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispersionSeries {
    GeneWise,
    Fitted,
    Final,
}

impl DispersionSeries {
    fn label(self) -> &'static str {
        match self {
            DispersionSeries::GeneWise => "gene-est",
            DispersionSeries::Fitted => "fitted",
            DispersionSeries::Final => "final",
        }
    }

    fn color(self) -> RGBColor {
        match self {
            DispersionSeries::GeneWise => RGBColor(0, 0, 0),
            DispersionSeries::Fitted => RGBColor(214, 39, 40),
            DispersionSeries::Final => RGBColor(31, 119, 180),
        }
    }
}

/// Point on the natural-log scale of both axes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispersionPoint {
    pub ln_mean: f64,
    pub ln_dispersion: f64,
    pub series: DispersionSeries,
}

/// Gene-wise, fitted and final dispersions against the mean of normalized
/// counts. Points with a non-finite coordinate are dropped.
pub fn dispersion_points(dds: &DgeDataSet) -> Result<Vec<DispersionPoint>> {
    let missing = || DgeError::InvalidInput {
        reason: "dispersions must be estimated before plotting".to_string(),
    };
    let means = base_means(dds)?;
    let series = [
        (DispersionSeries::GeneWise, dds.gene_dispersions().ok_or_else(missing)?),
        (DispersionSeries::Fitted, dds.trended_dispersions().ok_or_else(missing)?),
        (DispersionSeries::Final, dds.dispersions().ok_or_else(missing)?),
    ];

    let mut points = Vec::with_capacity(3 * means.len());
    for (kind, values) in series {
        points.extend(
            means
                .iter()
                .zip(values.iter())
                .map(|(m, d)| DispersionPoint {
                    ln_mean: m.ln(),
                    ln_dispersion: d.ln(),
                    series: kind,
                })
                .filter(|p| p.ln_mean.is_finite() && p.ln_dispersion.is_finite()),
        );
    }
    Ok(points)
}

pub fn render_dispersion<P: AsRef<Path>>(points: &[DispersionPoint], path: P) -> Result<()> {
    draw_dispersion(points, path.as_ref()).map_err(plot_error)
}

fn draw_dispersion(points: &[DispersionPoint], path: &Path) -> std::result::Result<(), Box<dyn Error>> {
    let root = SVGBackend::new(path, PLOT_SIZE).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Dispersion estimates", ("sans-serif", 24))
        .margin(20)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(
            padded_range(points.iter().map(|p| p.ln_mean)),
            padded_range(points.iter().map(|p| p.ln_dispersion)),
        )?;
    chart
        .configure_mesh()
        .x_desc("ln(mean of normalized counts)")
        .y_desc("ln(dispersion)")
        .draw()?;

    for kind in [DispersionSeries::GeneWise, DispersionSeries::Final, DispersionSeries::Fitted] {
        let color = kind.color();
        let size = if kind == DispersionSeries::Fitted { 2 } else { 1 };
        chart
            .draw_series(
                points
                    .iter()
                    .filter(|p| p.series == kind)
                    .map(|p| Circle::new((p.ln_mean, p.ln_dispersion), size, color.filled())),
            )?
            .label(kind.label())
            .legend(move |(x, y)| Circle::new((x, y), 4, color.filled()));
    }

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperRight)
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;
    root.present()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CountMatrix, SampleMetadata};
    use crate::dispersion::{estimate_dispersions, DispersionParams};
    use crate::normalization::{estimate_size_factors, SizeFactorMethod};
    use ndarray::Array2;

    fn estimated() -> DgeDataSet {
        let mut counts = Array2::zeros((21, 6));
        for i in 0..20 {
            for j in 0..6 {
                let base = 20.0 * (i + 1) as f64;
                counts[[i, j]] = base + ((i * 7 + j * 5) % 11) as f64 * (1.0 + i as f64 / 4.0);
            }
        }
        let samples: Vec<String> = (1..=6).map(|j| format!("s{}", j)).collect();
        let genes = (0..21).map(|i| format!("g{}", i)).collect();
        let cm = CountMatrix::new(counts, genes, samples.clone()).unwrap();
        let mut meta = SampleMetadata::new(samples).unwrap();
        meta.add_attribute(
            "condition",
            ["a", "a", "a", "b", "b", "b"].iter().map(|s| s.to_string()).collect(),
        )
        .unwrap();
        let mut dds = DgeDataSet::new(cm, meta, "condition", None).unwrap();
        estimate_size_factors(&mut dds, SizeFactorMethod::Ratio).unwrap();
        estimate_dispersions(&mut dds, &DispersionParams::default()).unwrap();
        dds
    }

    #[test]
    fn test_points_drop_zero_gene() {
        let dds = estimated();
        let points = dispersion_points(&dds).unwrap();
        // The all-zero gene has no finite coordinate in any series
        assert_eq!(points.len(), 60);
        for kind in [DispersionSeries::GeneWise, DispersionSeries::Fitted, DispersionSeries::Final] {
            assert_eq!(points.iter().filter(|p| p.series == kind).count(), 20);
        }
    }

    #[test]
    fn test_requires_dispersions() {
        let samples: Vec<String> = (1..=4).map(|j| format!("s{}", j)).collect();
        let cm = CountMatrix::new(
            Array2::from_elem((2, 4), 10.0),
            vec!["g1".to_string(), "g2".to_string()],
            samples.clone(),
        )
        .unwrap();
        let mut meta = SampleMetadata::new(samples).unwrap();
        meta.add_attribute("condition", ["a", "a", "b", "b"].iter().map(|s| s.to_string()).collect())
            .unwrap();
        let dds = DgeDataSet::new(cm, meta, "condition", None).unwrap();
        assert!(dispersion_points(&dds).is_err());
    }

    #[test]
    fn test_render_dispersion() {
        let dds = estimated();
        let points = dispersion_points(&dds).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dispersion.svg");
        render_dispersion(&points, &path).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("<svg"));
    }
}
