//! Assembles named model kinds inside a [`Workspace`].
use tracing::debug;

use crate::{
    config::{BackgroundConfig, ParameterSpec, SignalConfig},
    data::DATASET_NAME,
    model::{ExtendedModel, Parameter, Shape},
    utils::enums::ModelKind,
    workspace::Workspace,
    CatfitResult,
};

/// Signal yield.
pub const NSIG: &str = "nsig";
/// Background yield.
pub const NBKG: &str = "nbkg";
/// Nominal signal mean.
pub const MEAN: &str = "mean";
/// Nominal signal width.
pub const SIGMA: &str = "sigma";
/// Multiplicative shift of the signal mean.
pub const MEAN_SHIFT: &str = "mShift";
/// Multiplicative shift of the signal width.
pub const WIDTH_SHIFT: &str = "sigmaShift";
/// Signal pdf.
pub const SIGNAL_PDF: &str = "sig";
/// Background pdf.
pub const BACKGROUND_PDF: &str = "bg";
/// The extended sum of the signal and background pdfs.
pub const MODEL: &str = "model";
/// Stat-only significance stored after the fits.
pub const SIGNIFICANCE: &str = "signif";

/// Name of the background coefficient of Chebychev order `index + 1`.
pub fn coefficient_name(index: usize) -> String {
    format!("a{index}")
}

/// Builds a model of a given [`ModelKind`] into a workspace.
///
/// The yields start from the number of events in the workspace's `data_obs` dataset (if any):
/// the background yield at that number and the signal yield at zero, both limited to
/// `[0, 2 N + 10]`.
pub struct FitBuilder<'a> {
    ws: &'a mut Workspace,
    category: String,
    signal: SignalConfig,
    background: BackgroundConfig,
}

impl<'a> FitBuilder<'a> {
    /// A builder for the workspace of `category` with the default starting values.
    pub fn new(ws: &'a mut Workspace, category: &str) -> Self {
        Self {
            ws,
            category: category.to_string(),
            signal: SignalConfig::default(),
            background: BackgroundConfig::default(),
        }
    }

    /// Use these signal starting values and limits.
    pub fn with_signal(mut self, signal: &SignalConfig) -> Self {
        self.signal = signal.clone();
        self
    }

    /// Use this background order and coefficient starting values.
    pub fn with_background(mut self, background: &BackgroundConfig) -> Self {
        self.background = background.clone();
        self
    }

    /// Build the model named by `kind` (e.g. `"Gauss+Pol"`) and return it.
    pub fn build(self, kind: &str) -> CatfitResult<&'a ExtendedModel> {
        let kind: ModelKind = kind.parse()?;
        debug!("building {kind} for {}", self.category);
        match kind {
            ModelKind::GaussPol => self.build_gauss_pol(),
        }
    }

    fn build_gauss_pol(self) -> CatfitResult<&'a ExtendedModel> {
        let ws = self.ws;
        let n_events = ws
            .dataset(DATASET_NAME)
            .map(|dataset| dataset.weighted_len())
            .unwrap_or(0.0);
        let yield_max = 2.0 * n_events.max(0.0) + 10.0;
        ws.factory(Parameter::new(NSIG, 0.0, 0.0, yield_max))?;
        ws.factory(Parameter::new(NBKG, n_events, 0.0, yield_max))?;

        ws.factory(from_spec(MEAN, &self.signal.mean))?;
        ws.factory(from_spec(SIGMA, &self.signal.sigma))?;
        ws.factory(Parameter::constant(MEAN_SHIFT, 1.0))?;
        ws.factory(Parameter::constant(WIDTH_SHIFT, 1.0))?;
        ws.add_pdf(
            SIGNAL_PDF,
            Shape::Gaussian {
                mean: MEAN.to_string(),
                sigma: SIGMA.to_string(),
                mean_shift: MEAN_SHIFT.to_string(),
                sigma_shift: WIDTH_SHIFT.to_string(),
            },
        )?;

        let coefficients: Vec<String> = (0..self.background.order).map(coefficient_name).collect();
        for name in &coefficients {
            ws.factory(from_spec(name, &self.background.coefficient))?;
        }
        ws.add_pdf(BACKGROUND_PDF, Shape::Chebychev { coefficients })?;

        ws.add_model(ExtendedModel::new(
            MODEL,
            &[(SIGNAL_PDF, NSIG), (BACKGROUND_PDF, NBKG)],
        ))?;
        ws.model(MODEL)
    }
}

fn from_spec(name: &str, spec: &ParameterSpec) -> Parameter {
    Parameter::new(name, spec.value, spec.min, spec.max)
}
