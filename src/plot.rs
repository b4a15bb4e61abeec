//! Plot-ready artifacts of a category fit (numbers only, no rendering).
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};
use tracing::info;

use crate::{
    builder::{MEAN, NSIG, SIGMA, SIGNIFICANCE},
    data::{Cut, DATASET_NAME},
    model::Parameter,
    workspace::Workspace,
    CatfitResult, Float,
};

/// Identifies the layout of [`FitPlot`] files.
pub const SCHEMA_VERSION: &str = "catfit_fit_plot_v1";

const CURVE_POINTS: usize = 201;

/// One minus the confidence level of a central one-sigma interval.
const ONE_SIGMA_ALPHA: Float = 0.31731;

/// One model curve, in expected events per plotting bin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotCurve {
    /// Curve label (the model or pdf name)
    pub name: String,
    /// Curve values at [`FitPlot::curve_x`]
    pub y: Vec<Float>,
}

/// The binned data, fitted model curves and text annotations of one category fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitPlot {
    /// Layout version
    pub schema_version: String,
    /// Category the fit belongs to
    pub category: String,
    /// Axis title of the observable
    pub x_title: String,
    /// Bin edges of the data histogram
    pub bin_edges: Vec<Float>,
    /// Weighted counts per bin
    pub data_y: Vec<Float>,
    /// Lower error of each bin (Poisson for unweighted data)
    pub data_yerr_lo: Vec<Float>,
    /// Upper error of each bin
    pub data_yerr_hi: Vec<Float>,
    /// Points at which the curves are sampled
    pub curve_x: Vec<Float>,
    /// The total model
    pub model: PlotCurve,
    /// Each model component
    pub components: Vec<PlotCurve>,
    /// Text lines describing the fit
    pub annotations: Vec<String>,
}

fn near_count(x: Float) -> Option<u64> {
    if !(x.is_finite() && x >= 0.0) {
        return None;
    }
    let r = x.round();
    ((x - r).abs() <= 1e-9).then_some(r as u64)
}

/// Central one-sigma Garwood interval of a Poisson count `n`, as distances below and above `n`.
pub fn garwood_interval(n: u64) -> Option<(Float, Float)> {
    let n = n as Float;
    let lo = if n == 0.0 {
        0.0
    } else {
        n - 0.5 * ChiSquared::new(2.0 * n).ok()?.inverse_cdf(ONE_SIGMA_ALPHA / 2.0)
    };
    let hi = 0.5
        * ChiSquared::new(2.0 * (n + 1.0))
            .ok()?
            .inverse_cdf(1.0 - ONE_SIGMA_ALPHA / 2.0)
        - n;
    Some((lo, hi))
}

/// Error bars of a histogram: Garwood intervals for bins filled with unit weights, and
/// `sqrt(sumw2)` on both sides otherwise.
fn data_errors(counts: &[Float], sumw2: &[Float]) -> (Vec<Float>, Vec<Float>) {
    counts
        .iter()
        .zip(sumw2)
        .map(|(&count, &w2)| {
            near_count(count)
                .filter(|_| (w2 - count).abs() <= 1e-9 * count.max(1.0))
                .and_then(garwood_interval)
                .unwrap_or_else(|| (w2.sqrt(), w2.sqrt()))
        })
        .unzip()
}

fn value_and_error(parameter: &Parameter) -> String {
    format!(
        "{:.2} +/- {:.2}",
        parameter.value,
        parameter.error.unwrap_or(0.0)
    )
}

impl FitPlot {
    /// Collect the plot of the fitted `model` of `ws`, annotating the event count inside
    /// `signal_window` next to the count in the full range.
    ///
    /// This reads the signal parameters under the names the
    /// [`FitBuilder`](crate::builder::FitBuilder) gives them, so it must run before the
    /// [`NameFixer`](crate::workspace::NameFixer).
    pub fn from_workspace(
        ws: &Workspace,
        category: &str,
        model: &str,
        signal_window: (Float, Float),
    ) -> CatfitResult<Self> {
        let observable = &ws.observable;
        let dataset = ws.dataset(DATASET_NAME)?;
        let histogram = dataset.histogram(observable);
        let (data_yerr_lo, data_yerr_hi) = data_errors(&histogram.counts, &histogram.sumw2);

        let extended = ws.model(model)?;
        let prepared = extended
            .bind(ws.pdfs(), ws.parameters(), observable.range())?
            .prepare(&ws.parameters().values());
        let bin_width = observable.bin_width();
        let step = (observable.max - observable.min) / (CURVE_POINTS - 1) as Float;
        let curve_x: Vec<Float> = (0..CURVE_POINTS)
            .map(|i| observable.min + i as Float * step)
            .collect();
        let model_curve = PlotCurve {
            name: extended.name.clone(),
            y: curve_x
                .iter()
                .map(|&x| prepared.event_density(x) * bin_width)
                .collect(),
        };
        let components = extended
            .components
            .iter()
            .enumerate()
            .map(|(index, component)| PlotCurve {
                name: component.pdf.clone(),
                y: curve_x
                    .iter()
                    .map(|&x| prepared.component_density(index, x) * bin_width)
                    .collect(),
            })
            .collect();

        let count_in = |lo: Float, hi: Float| -> CatfitResult<String> {
            let cut = Cut::parse(
                &format!("{lo}<={name} && {name}<={hi}", name = observable.name),
                &observable.name,
            )?;
            Ok(format!("Nevts [{lo},{hi}]: {:.0}", dataset.sum_entries(&cut)))
        };
        let annotations = vec![
            count_in(observable.min, observable.max)?,
            count_in(signal_window.0, signal_window.1)?,
            "Signal fit".to_string(),
            format!("mu = {}", value_and_error(ws.var(MEAN)?)),
            format!("sigma = {}", value_and_error(ws.var(SIGMA)?)),
            format!("N_s = {}", value_and_error(ws.var(NSIG)?)),
            format!(
                "Signif = {:.2} sigma (stat only)",
                ws.var(SIGNIFICANCE)?.value
            ),
        ];

        Ok(Self {
            schema_version: SCHEMA_VERSION.to_string(),
            category: category.to_string(),
            x_title: observable.title.clone(),
            bin_edges: histogram.bin_edges,
            data_y: histogram.counts,
            data_yerr_lo,
            data_yerr_hi,
            curve_x,
            model: model_curve,
            components,
            annotations,
        })
    }

    /// Write the plot to `path` as JSON, overwriting any existing file.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> CatfitResult<()> {
        let path = path.as_ref();
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        info!("I wrote the plot: {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        builder::{FitBuilder, MODEL},
        config::ObservableConfig,
        data::{Dataset, Observable},
    };
    use approx::assert_relative_eq;

    fn workspace() -> Workspace {
        let values = [13.0, 27.0, 28.0, 28.5, 31.0, 45.0, 69.0];
        workspace_with(&values, None)
    }

    fn workspace_with(values: &[Float], weights: Option<&[Float]>) -> Workspace {
        let x = Observable::from_config(&ObservableConfig::default()).unwrap();
        let dataset =
            Dataset::from_values(DATASET_NAME, &x, values, weights, &Cut::always()).unwrap();
        let mut ws = Workspace::new("ws_8TeV", x);
        ws.import_dataset(dataset).unwrap();
        FitBuilder::new(&mut ws, "amumu_1b1f")
            .build("Gauss+Pol")
            .unwrap();
        ws.var_mut(NSIG).unwrap().set_value(3.0);
        ws.var_mut(NSIG).unwrap().error = Some(1.5);
        ws.var_mut(MEAN).unwrap().error = Some(0.123);
        ws.factory_constant(SIGNIFICANCE, 2.3456);
        ws
    }

    fn plot(ws: &Workspace) -> FitPlot {
        FitPlot::from_workspace(ws, "amumu_1b1f", MODEL, (26.0, 32.0)).unwrap()
    }

    #[test]
    fn annotations() {
        let plot = plot(&workspace());
        assert_eq!(
            plot.annotations,
            [
                "Nevts [12,70]: 7",
                "Nevts [26,32]: 4",
                "Signal fit",
                "mu = 28.00 +/- 0.12",
                "sigma = 1.00 +/- 0.00",
                "N_s = 3.00 +/- 1.50",
                "Signif = 2.35 sigma (stat only)",
            ]
        );
    }

    #[test]
    fn curves_and_histogram() {
        let plot = plot(&workspace());
        assert_eq!(plot.bin_edges.len(), 30);
        assert_eq!(plot.data_y.len(), 29);
        assert_relative_eq!(plot.data_y.iter().sum::<Float>(), 7.0);
        assert_eq!(plot.curve_x.len(), CURVE_POINTS);
        assert_eq!(plot.components.len(), 2);
        for i in 0..CURVE_POINTS {
            assert_relative_eq!(
                plot.model.y[i],
                plot.components[0].y[i] + plot.components[1].y[i],
                epsilon = 1e-12
            );
        }
        // the curve integrates to the total yield (in events per bin, so divide by bin width)
        let step = plot.curve_x[1] - plot.curve_x[0];
        let integral: Float = plot
            .model
            .y
            .windows(2)
            .map(|w| 0.5 * (w[0] + w[1]) * step)
            .sum::<Float>()
            / 2.0;
        assert_relative_eq!(integral, 10.0, epsilon = 0.05);
    }

    #[test]
    fn poisson_error_bars() {
        let plot = plot(&workspace_with(&[12.5, 13.0], None));
        // bin 0 holds both events, bin 5 none
        assert_relative_eq!(plot.data_y[0], 2.0);
        assert_relative_eq!(plot.data_yerr_lo[0], 1.29, epsilon = 0.01);
        assert_relative_eq!(plot.data_yerr_hi[0], 2.64, epsilon = 0.01);
        assert_relative_eq!(plot.data_y[5], 0.0);
        assert_relative_eq!(plot.data_yerr_lo[5], 0.0);
        assert_relative_eq!(plot.data_yerr_hi[5], 1.84, epsilon = 0.01);

        let (lo, hi) = garwood_interval(1).unwrap();
        assert_relative_eq!(lo, 0.83, epsilon = 0.01);
        assert_relative_eq!(hi, 2.30, epsilon = 0.01);
    }

    #[test]
    fn weighted_error_bars() {
        let plot = plot(&workspace_with(&[12.5, 13.0, 40.5], Some(&[0.5, 1.5, 0.5])));
        assert_relative_eq!(plot.data_y[0], 2.0);
        // sqrt(0.25 + 2.25)
        assert_relative_eq!(plot.data_yerr_lo[0], Float::sqrt(2.5));
        assert_relative_eq!(plot.data_yerr_hi[0], Float::sqrt(2.5));
        assert_relative_eq!(plot.data_yerr_hi[14], 0.5);
        assert_relative_eq!(plot.data_yerr_hi[20], 1.84, epsilon = 0.01);
    }

    #[test]
    fn missing_significance_is_an_error() {
        let mut ws = workspace();
        ws.rename_parameter(SIGNIFICANCE, "other").unwrap();
        assert!(FitPlot::from_workspace(&ws, "amumu_1b1f", MODEL, (26.0, 32.0)).is_err());
    }

    #[test]
    fn written_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fit_amumu_1b1f.json");
        let plot = plot(&workspace());
        plot.write(&path).unwrap();
        let read: FitPlot = serde_json::from_reader(File::open(&path).unwrap()).unwrap();
        assert_eq!(read.annotations, plot.annotations);
        assert_eq!(read.schema_version, SCHEMA_VERSION);
    }
}
