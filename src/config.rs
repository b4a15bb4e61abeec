//! Static analysis parameters.
//!
//! [`AnalysisConfig::default`] holds the values of the dimuon analysis; a TOML file may override
//! any subset of them:
//!
//! ```toml
//! tree = "amumuTree_DATA"
//! workspace = "ws_8TeV"
//!
//! [events]
//! amumu_1b1f = "amumuFile_MuMu2012ABCD_sasha_17.root"
//!
//! [observable]
//! xmin = 12.0
//! xmax = 70.0
//! ```
use std::{fs, path::Path};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{datacard::CardValue, CatfitError, CatfitResult, Float};

/// Starting value and limits of a floating parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Initial value
    pub value: Float,
    /// Lower limit
    pub min: Float,
    /// Upper limit
    pub max: Float,
}

impl ParameterSpec {
    /// Construct a new [`ParameterSpec`].
    pub const fn new(value: Float, min: Float, max: Float) -> Self {
        Self { value, min, max }
    }
}

/// Definition of the fitted observable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservableConfig {
    /// Branch (and variable) name
    pub name: String,
    /// Axis title
    pub title: String,
    /// Selection applied when importing the data
    pub cuts: String,
    /// Initial value of the variable
    pub x0: Float,
    /// Lower edge of the fit range
    pub xmin: Float,
    /// Upper edge of the fit range
    pub xmax: Float,
    /// Bin width used for plotting
    pub binw: Float,
}

impl Default for ObservableConfig {
    fn default() -> Self {
        Self {
            name: "x".to_string(),
            title: "M(#mu#mu) [GeV]".to_string(),
            cuts: "x>0".to_string(),
            x0: 28.0,
            xmin: 12.0,
            xmax: 70.0,
            binw: 2.0,
        }
    }
}

/// Starting values of the Gaussian signal shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// The peak position
    pub mean: ParameterSpec,
    /// The peak width
    pub sigma: ParameterSpec,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            mean: ParameterSpec::new(28.0, 23.0, 33.0),
            sigma: ParameterSpec::new(1.0, 0.1, 3.0),
        }
    }
}

/// Starting values of the Chebychev background shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    /// Number of Chebychev coefficients (`a0`, `a1`, ...)
    pub order: usize,
    /// Starting value and limits shared by every coefficient
    pub coefficient: ParameterSpec,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            order: 3,
            coefficient: ParameterSpec::new(0.0, -2.0, 2.0),
        }
    }
}

/// Minimizer and error-analysis settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    /// Maximum number of minimizer steps
    pub max_steps: usize,
    /// Whether to compute asymmetric (profile-likelihood) errors after each fit
    pub minos: bool,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            max_steps: 4000,
            minos: true,
        }
    }
}

/// A log-normal yield uncertainty applied to every process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogNormalConfig {
    /// Nuisance name as written in the datacard
    pub name: String,
    /// The multiplicative uncertainty
    pub value: CardValue,
}

/// A Gaussian constraint on a shape parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaussianConstraintConfig {
    /// Central value
    pub mean: CardValue,
    /// Width
    pub sigma: CardValue,
}

/// Everything the datacard needs beyond the names shared with the workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatacardConfig {
    /// Text of the leading comment line
    pub title: String,
    /// Value of the `observation` line (`-1` means "read from the workspace")
    pub observation: CardValue,
    /// Rate of every process (normalizations come from the workspace)
    pub rate: CardValue,
    /// Luminosity uncertainty
    pub lumi: LogNormalConfig,
    /// Constraint on the signal mass-scale shift
    pub mass_shift: GaussianConstraintConfig,
    /// Constraint on the signal resolution shift
    pub width_shift: GaussianConstraintConfig,
}

impl Default for DatacardConfig {
    fn default() -> Self {
        Self {
            title: "amumu analysis".to_string(),
            observation: CardValue::Int(-1),
            rate: CardValue::Real(1.0),
            lumi: LogNormalConfig {
                name: "#lumi_8TeV".to_string(),
                value: CardValue::Real(1.026),
            },
            mass_shift: GaussianConstraintConfig {
                mean: CardValue::Int(1),
                sigma: CardValue::Real(0.03),
            },
            width_shift: GaussianConstraintConfig {
                mean: CardValue::Int(1),
                sigma: CardValue::Real(0.45),
            },
        }
    }
}

/// The complete set of analysis parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Category name mapped to its input ROOT file, in processing order
    pub events: IndexMap<String, String>,
    /// Name of the input tree
    pub tree: String,
    /// Optional per-event weight branch; ignored when the tree does not have it
    pub weight_branch: Option<String>,
    /// The fitted observable
    pub observable: ObservableConfig,
    /// Name of the workspace stored in each workspace file
    pub workspace: String,
    /// Prefix of every exported parameter and pdf name
    pub prefix: String,
    /// Process names; the first is the signal and the second the background
    pub processes: Vec<String>,
    /// Model recipe passed to the [`FitBuilder`](crate::builder::FitBuilder)
    pub model: String,
    /// Signal shape starting values
    pub signal: SignalConfig,
    /// Background shape starting values
    pub background: BackgroundConfig,
    /// Range whose event count is reported as the signal-region yield
    pub signal_window: (Float, Float),
    /// Minimizer settings
    pub fit: FitConfig,
    /// Datacard settings
    pub datacard: DatacardConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        let mut events = IndexMap::new();
        events.insert(
            "amumu_1b1f".to_string(),
            "amumuFile_MuMu2012ABCD_sasha_17.root".to_string(),
        );
        events.insert(
            "amumu_1b1c".to_string(),
            "amumuFile_MuMu2012ABCD_sasha_28.root".to_string(),
        );
        Self {
            events,
            tree: "amumuTree_DATA".to_string(),
            weight_branch: Some("__WEIGHT__".to_string()),
            observable: ObservableConfig::default(),
            workspace: "ws_8TeV".to_string(),
            prefix: "CMS_amumu".to_string(),
            processes: vec!["sig".to_string(), "bg".to_string()],
            model: "Gauss+Pol".to_string(),
            signal: SignalConfig::default(),
            background: BackgroundConfig::default(),
            signal_window: (26.0, 32.0),
            fit: FitConfig::default(),
            datacard: DatacardConfig::default(),
        }
    }
}

impl AnalysisConfig {
    /// Parse a configuration from TOML text. Missing keys take their default values.
    pub fn from_toml_str(text: &str) -> CatfitResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a configuration from a TOML file. Missing keys take their default values.
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> CatfitResult<Self> {
        let path = path.as_ref();
        let expanded = shellexpand::full(&path.to_string_lossy())?.into_owned();
        let text = fs::read_to_string(&expanded).map_err(|err| CatfitError::CannotOpen {
            path: expanded.clone(),
            reason: err.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    /// Check the internal consistency of the configuration.
    pub fn validate(&self) -> CatfitResult<()> {
        if self.processes.len() < 2 {
            return Err(CatfitError::InvalidConfig(format!(
                "at least two processes (signal and background) are required, got {:?}",
                self.processes
            )));
        }
        for (i, process) in self.processes.iter().enumerate() {
            if self.processes[..i].contains(process) {
                return Err(CatfitError::InvalidConfig(format!(
                    "process {process:?} is listed more than once"
                )));
            }
        }
        if self.events.is_empty() {
            return Err(CatfitError::InvalidConfig(
                "no categories are configured".to_string(),
            ));
        }
        let obs = &self.observable;
        if !(obs.xmin < obs.xmax) {
            return Err(CatfitError::InvalidConfig(format!(
                "observable range must satisfy xmin < xmax, got [{}, {}]",
                obs.xmin, obs.xmax
            )));
        }
        if !(obs.binw > 0.0) || self.n_bins() == 0 {
            return Err(CatfitError::InvalidConfig(format!(
                "bin width {} does not give any bin in [{}, {}]",
                obs.binw, obs.xmin, obs.xmax
            )));
        }
        if obs.x0 < obs.xmin || obs.x0 > obs.xmax {
            return Err(CatfitError::InvalidConfig(format!(
                "initial value {} lies outside [{}, {}]",
                obs.x0, obs.xmin, obs.xmax
            )));
        }
        if self.background.order == 0 {
            return Err(CatfitError::InvalidConfig(
                "background polynomial needs at least one coefficient".to_string(),
            ));
        }
        for (label, spec) in [
            ("signal.mean", &self.signal.mean),
            ("signal.sigma", &self.signal.sigma),
            ("background.coefficient", &self.background.coefficient),
        ] {
            if !(spec.min <= spec.value && spec.value <= spec.max) {
                return Err(CatfitError::InvalidConfig(format!(
                    "{label} start value {} lies outside [{}, {}]",
                    spec.value, spec.min, spec.max
                )));
            }
        }
        if !(self.signal.sigma.min > 0.0) {
            return Err(CatfitError::InvalidConfig(
                "signal.sigma lower limit must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// The signal process name.
    pub fn sig(&self) -> &str {
        &self.processes[0]
    }

    /// The background process name.
    pub fn bg(&self) -> &str {
        &self.processes[1]
    }

    /// Number of plotting bins over the observable range.
    pub fn n_bins(&self) -> usize {
        ((self.observable.xmax - self.observable.xmin) / self.observable.binw) as usize
    }

    /// Exported name of a process pdf, e.g. `CMS_amumu_sig_amumu_1b1f`.
    pub fn pdf_name(&self, process: &str, category: &str) -> String {
        format!("{}_{}_{}", self.prefix, process, category)
    }

    /// Exported name of a process normalization, e.g. `CMS_amumu_bg_amumu_1b1f_norm`.
    pub fn norm_name(&self, process: &str, category: &str) -> String {
        format!("{}_{}_{}_norm", self.prefix, process, category)
    }

    /// Exported name of a shape parameter, e.g. `CMS_amumu_sig_mShift_amumu_1b1f`.
    pub fn shape_param_name(&self, process: &str, stem: &str, category: &str) -> String {
        format!("{}_{}_{}_{}", self.prefix, process, stem, category)
    }

    /// Workspace file written for a category.
    pub fn workspace_file(&self, category: &str) -> String {
        format!("ws_{category}.json")
    }

    /// Datacard file written for a category.
    pub fn datacard_file(&self, category: &str) -> String {
        format!("card_{category}.txt")
    }

    /// Plot artifact written for a category.
    pub fn plot_file(&self, category: &str) -> String {
        format!("fit_{category}.json")
    }
}
