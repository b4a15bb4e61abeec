//! Named parameters and the extended additive model.
use std::fmt::Display;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    pdfs::{ChebychevPdf, Density, GaussianPdf, NormalizedChebychev, NormalizedGaussian},
    CatfitError, CatfitResult, Float,
};

/// A named real-valued parameter with limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Parameter name
    pub name: String,
    /// Current value
    pub value: Float,
    /// Symmetric error from the last fit, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Float>,
    /// Asymmetric `(low, high)` errors from the last fit, if any; `low` is negative
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asym_errors: Option<(Float, Float)>,
    /// Lower limit
    pub min: Float,
    /// Upper limit
    pub max: Float,
    /// Whether the parameter is held fixed in fits
    pub constant: bool,
}

impl Parameter {
    /// A floating parameter starting at `value` (clamped into `[min, max]`).
    pub fn new(name: &str, value: Float, min: Float, max: Float) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        Self {
            name: name.to_string(),
            value: value.clamp(min, max),
            error: None,
            asym_errors: None,
            min,
            max,
            constant: false,
        }
    }

    /// A constant parameter.
    pub fn constant(name: &str, value: Float) -> Self {
        Self {
            constant: true,
            ..Self::new(name, value, value, value)
        }
    }

    /// Set the value, clamped into the limits.
    pub fn set_value(&mut self, value: Float) {
        self.value = value.clamp(self.min, self.max);
    }

    /// Fix or release the parameter.
    pub fn set_constant(&mut self, constant: bool) {
        self.constant = constant;
    }

    /// Whether the parameter floats in fits.
    pub fn is_free(&self) -> bool {
        !self.constant && self.min < self.max
    }
}

impl Display for Parameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} = {}", self.name, self.value)?;
        if let Some(error) = self.error {
            write!(f, " +/- {error}")?;
        }
        if let Some((lo, hi)) = self.asym_errors {
            write!(f, " ({lo:+}, {hi:+})")?;
        }
        if self.constant {
            write!(f, " C")?;
        } else {
            write!(f, " L({} - {})", self.min, self.max)?;
        }
        Ok(())
    }
}

/// An ordered collection of [`Parameter`]s addressed by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet(IndexMap<String, Parameter>);

impl ParameterSet {
    /// Add a parameter. Names must be unique.
    pub fn insert(&mut self, parameter: Parameter) -> CatfitResult<()> {
        if self.0.contains_key(&parameter.name) {
            return Err(CatfitError::RegistrationError {
                name: parameter.name,
            });
        }
        self.0.insert(parameter.name.clone(), parameter);
        Ok(())
    }

    /// Add a parameter, replacing any existing parameter by the same name.
    pub fn upsert(&mut self, parameter: Parameter) {
        self.0.insert(parameter.name.clone(), parameter);
    }

    /// Look up a parameter.
    pub fn get(&self, name: &str) -> CatfitResult<&Parameter> {
        self.0
            .get(name)
            .ok_or_else(|| CatfitError::ParameterNotFound {
                name: name.to_string(),
            })
    }

    /// Look up a parameter mutably.
    pub fn get_mut(&mut self, name: &str) -> CatfitResult<&mut Parameter> {
        self.0
            .get_mut(name)
            .ok_or_else(|| CatfitError::ParameterNotFound {
                name: name.to_string(),
            })
    }

    /// Position of a parameter in the set.
    pub fn index_of(&self, name: &str) -> CatfitResult<usize> {
        self.0
            .get_index_of(name)
            .ok_or_else(|| CatfitError::ParameterNotFound {
                name: name.to_string(),
            })
    }

    /// Whether a parameter by this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Rename a parameter in place, keeping its position.
    pub fn rename(&mut self, old: &str, new: &str) -> CatfitResult<()> {
        if old == new {
            return self.get(old).map(|_| ());
        }
        if self.0.contains_key(new) {
            return Err(CatfitError::RegistrationError {
                name: new.to_string(),
            });
        }
        let index = self.index_of(old)?;
        let renamed: IndexMap<String, Parameter> = self
            .0
            .drain(..)
            .enumerate()
            .map(|(i, (key, mut parameter))| {
                if i == index {
                    parameter.name = new.to_string();
                    (new.to_string(), parameter)
                } else {
                    (key, parameter)
                }
            })
            .collect();
        self.0 = renamed;
        Ok(())
    }

    /// The current values of every parameter, in order.
    pub fn values(&self) -> Vec<Float> {
        self.0.values().map(|p| p.value).collect()
    }

    /// The parameter names, in order.
    pub fn names(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }

    /// Iterate over the parameters in order.
    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.0.values()
    }

    /// The number of parameters.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The functional form of a pdf, referring to its parameters by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Shape {
    /// A Gaussian with mean `mean * mean_shift` and width `sigma * sigma_shift`.
    Gaussian {
        /// Nominal mean
        mean: String,
        /// Nominal width
        sigma: String,
        /// Multiplicative mean shift
        mean_shift: String,
        /// Multiplicative width shift
        sigma_shift: String,
    },
    /// A Chebychev polynomial with the given coefficients (orders 1, 2, ...).
    Chebychev {
        /// Polynomial coefficients
        coefficients: Vec<String>,
    },
}

impl Shape {
    /// Every parameter name the shape depends on.
    pub fn parameters(&self) -> Vec<&str> {
        match self {
            Shape::Gaussian {
                mean,
                sigma,
                mean_shift,
                sigma_shift,
            } => vec![mean.as_str(), sigma.as_str(), mean_shift.as_str(), sigma_shift.as_str()],
            Shape::Chebychev { coefficients } => coefficients.iter().map(String::as_str).collect(),
        }
    }

    /// Replace every reference to parameter `old` by `new`.
    pub fn rename_parameter(&mut self, old: &str, new: &str) {
        let replace = |name: &mut String| {
            if name == old {
                *name = new.to_string();
            }
        };
        match self {
            Shape::Gaussian {
                mean,
                sigma,
                mean_shift,
                sigma_shift,
            } => {
                replace(mean);
                replace(sigma);
                replace(mean_shift);
                replace(sigma_shift);
            }
            Shape::Chebychev { coefficients } => coefficients.iter_mut().for_each(replace),
        }
    }

    fn bind(&self, parameters: &ParameterSet) -> CatfitResult<BoundShape> {
        Ok(match self {
            Shape::Gaussian {
                mean,
                sigma,
                mean_shift,
                sigma_shift,
            } => BoundShape::Gaussian {
                mean: parameters.index_of(mean)?,
                sigma: parameters.index_of(sigma)?,
                mean_shift: parameters.index_of(mean_shift)?,
                sigma_shift: parameters.index_of(sigma_shift)?,
            },
            Shape::Chebychev { coefficients } => BoundShape::Chebychev {
                coefficients: coefficients
                    .iter()
                    .map(|name| parameters.index_of(name))
                    .collect::<CatfitResult<Vec<usize>>>()?,
            },
        })
    }
}

/// One term `yield * pdf(x)` of an [`ExtendedModel`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    /// Name of the pdf
    pub pdf: String,
    /// Name of the yield parameter
    #[serde(rename = "yield")]
    pub yield_param: String,
}

/// An extended sum of pdfs, `sum_c n_c f_c(x)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtendedModel {
    /// Model name
    pub name: String,
    /// The summed components
    pub components: Vec<Component>,
}

impl ExtendedModel {
    /// Construct a model from `(pdf, yield)` name pairs.
    pub fn new(name: &str, components: &[(&str, &str)]) -> Self {
        Self {
            name: name.to_string(),
            components: components
                .iter()
                .map(|(pdf, yield_param)| Component {
                    pdf: pdf.to_string(),
                    yield_param: yield_param.to_string(),
                })
                .collect(),
        }
    }

    /// Resolve every name against `pdfs` and `parameters`, producing a model that can be
    /// evaluated from a plain parameter vector laid out like `parameters`.
    pub fn bind(
        &self,
        pdfs: &IndexMap<String, Shape>,
        parameters: &ParameterSet,
        range: (Float, Float),
    ) -> CatfitResult<BoundModel> {
        let components = self
            .components
            .iter()
            .map(|component| {
                let shape = pdfs
                    .get(&component.pdf)
                    .ok_or_else(|| CatfitError::PdfNotFound {
                        name: component.pdf.clone(),
                    })?;
                Ok(BoundComponent {
                    pdf: component.pdf.clone(),
                    yield_index: parameters.index_of(&component.yield_param)?,
                    shape: shape.bind(parameters)?,
                })
            })
            .collect::<CatfitResult<Vec<_>>>()?;
        Ok(BoundModel { components, range })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum BoundShape {
    Gaussian {
        mean: usize,
        sigma: usize,
        mean_shift: usize,
        sigma_shift: usize,
    },
    Chebychev {
        coefficients: Vec<usize>,
    },
}

#[derive(Debug, Clone, PartialEq)]
struct BoundComponent {
    pdf: String,
    yield_index: usize,
    shape: BoundShape,
}

/// An [`ExtendedModel`] whose names have been resolved to positions in a parameter vector.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundModel {
    components: Vec<BoundComponent>,
    range: (Float, Float),
}

impl BoundModel {
    /// Fix every parameter to the values in `parameters`.
    pub fn prepare(&self, parameters: &[Float]) -> PreparedModel {
        let components = self
            .components
            .iter()
            .map(|component| {
                let shape = match &component.shape {
                    BoundShape::Gaussian {
                        mean,
                        sigma,
                        mean_shift,
                        sigma_shift,
                    } => PreparedShape::Gaussian(GaussianPdf::new(self.range).prepare(
                        parameters[*mean] * parameters[*mean_shift],
                        parameters[*sigma] * parameters[*sigma_shift],
                    )),
                    BoundShape::Chebychev { coefficients } => {
                        let values: Vec<Float> =
                            coefficients.iter().map(|&i| parameters[i]).collect();
                        PreparedShape::Chebychev(ChebychevPdf::new(self.range).prepare(&values))
                    }
                };
                (parameters[component.yield_index], shape)
            })
            .collect();
        PreparedModel { components }
    }

    /// Names of the component pdfs, in order.
    pub fn component_names(&self) -> Vec<&str> {
        self.components.iter().map(|c| c.pdf.as_str()).collect()
    }
}

/// A normalized shape with fixed parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum PreparedShape {
    /// A prepared Gaussian
    Gaussian(NormalizedGaussian),
    /// A prepared Chebychev polynomial
    Chebychev(NormalizedChebychev),
}

impl Density for PreparedShape {
    fn density(&self, x: Float) -> Float {
        match self {
            PreparedShape::Gaussian(g) => g.density(x),
            PreparedShape::Chebychev(c) => c.density(x),
        }
    }
}

/// A [`BoundModel`] with fixed parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedModel {
    components: Vec<(Float, PreparedShape)>,
}

impl PreparedModel {
    /// The expected event density `sum_c n_c f_c(x)`.
    pub fn event_density(&self, x: Float) -> Float {
        self.components
            .iter()
            .map(|(n, shape)| n * shape.density(x))
            .sum()
    }

    /// The expected event density of component `index` alone.
    pub fn component_density(&self, index: usize, x: Float) -> Float {
        self.components
            .get(index)
            .map_or(0.0, |(n, shape)| n * shape.density(x))
    }

    /// The total expected number of events `sum_c n_c`.
    pub fn expected_events(&self) -> Float {
        self.components.iter().map(|(n, _)| n).sum()
    }
}
