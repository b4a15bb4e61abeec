use std::{convert::Infallible, sync::Arc};

use crate::{
    data::Dataset,
    model::{BoundModel, ParameterSet, PreparedModel},
    Float,
};
use ganesh::{algorithms::LBFGSB, Algorithm, Function, Minimizer, Observer, Status};
use parking_lot::RwLock;
use tracing::{debug, trace, Level};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Event densities below this value are clamped before taking the logarithm.
const MIN_DENSITY: Float = Float::MIN_POSITIVE;

fn ln_event_density(model: &PreparedModel, x: Float) -> Float {
    Float::ln(Float::max(model.event_density(x), MIN_DENSITY))
}

/// An extended, unbinned negative log-likelihood of a [`BoundModel`] given a [`Dataset`].
///
/// Only the floating parameters are exposed to the minimizer; constant parameters keep the
/// value they had when the [`NLL`] was built.
#[derive(Clone)]
pub struct NLL<'a> {
    dataset: &'a Dataset,
    model: BoundModel,
    template: Vec<Float>,
    free: Vec<usize>,
    names: Vec<String>,
    bounds: Vec<(Float, Float)>,
}

impl<'a> NLL<'a> {
    /// Construct an [`NLL`] from a bound model, a dataset, and the parameter set the model was
    /// bound against.
    pub fn new(model: BoundModel, dataset: &'a Dataset, parameters: &ParameterSet) -> Self {
        let (free, (names, bounds)): (Vec<usize>, (Vec<String>, Vec<(Float, Float)>)) =
            parameters
                .iter()
                .enumerate()
                .filter(|(_, p)| p.is_free())
                .map(|(i, p)| (i, (p.name.clone(), (p.min, p.max))))
                .unzip();
        Self {
            dataset,
            model,
            template: parameters.values(),
            free,
            names,
            bounds,
        }
    }

    /// Get the list of floating parameter names in the order they appear in the
    /// [`NLL::evaluate`] method.
    pub fn parameters(&self) -> &[String] {
        &self.names
    }

    /// The number of floating parameters.
    pub fn n_free(&self) -> usize {
        self.free.len()
    }

    /// The current values of the floating parameters.
    pub fn initial(&self) -> Vec<Float> {
        self.free.iter().map(|&i| self.template[i]).collect()
    }

    /// The limits of the floating parameters.
    pub fn bounds(&self) -> &[(Float, Float)] {
        &self.bounds
    }

    /// Expand floating parameter values into the full parameter vector.
    pub fn expand(&self, parameters: &[Float]) -> Vec<Float> {
        let mut full = self.template.clone();
        for (&i, &value) in self.free.iter().zip(parameters) {
            full[i] = value;
        }
        full
    }

    /// A copy of this [`NLL`] in which floating parameter `index` is held at `value`.
    pub fn with_fixed(&self, index: usize, value: Float) -> Self {
        let mut fixed = self.clone();
        if index < fixed.free.len() {
            let position = fixed.free.remove(index);
            fixed.template[position] = value;
            fixed.names.remove(index);
            fixed.bounds.remove(index);
        }
        fixed
    }

    /// Evaluate the negative log-likelihood for the given floating parameter values:
    ///
    /// ```math
    /// NLL(\vec{p}) = -\sum_{e \in \text{Data}} \text{weight}(e) \ln\left(\sum_c n_c f_c(e)\right)
    ///     + \sum_c n_c
    /// ```
    #[cfg(feature = "rayon")]
    pub fn evaluate(&self, parameters: &[Float]) -> Float {
        let model = self.model.prepare(&self.expand(parameters));
        let values = self.dataset.values();
        let data_term: Float = match self.dataset.weights() {
            Some(weights) => values
                .par_iter()
                .zip(weights.par_iter())
                .map(|(&x, &w)| w * ln_event_density(&model, x))
                .sum(),
            None => values
                .par_iter()
                .map(|&x| ln_event_density(&model, x))
                .sum(),
        };
        model.expected_events() - data_term
    }

    /// Evaluate the negative log-likelihood for the given floating parameter values:
    ///
    /// ```math
    /// NLL(\vec{p}) = -\sum_{e \in \text{Data}} \text{weight}(e) \ln\left(\sum_c n_c f_c(e)\right)
    ///     + \sum_c n_c
    /// ```
    #[cfg(not(feature = "rayon"))]
    pub fn evaluate(&self, parameters: &[Float]) -> Float {
        let model = self.model.prepare(&self.expand(parameters));
        let values = self.dataset.values();
        let data_term: Float = match self.dataset.weights() {
            Some(weights) => values
                .iter()
                .zip(weights.iter())
                .map(|(&x, &w)| w * ln_event_density(&model, x))
                .sum(),
            None => values.iter().map(|&x| ln_event_density(&model, x)).sum(),
        };
        model.expected_events() - data_term
    }

    /// Minimizes the negative log-likelihood using the L-BFGS-B algorithm, a limited-memory
    /// quasi-Newton minimizer which supports bounded optimization. The floating parameters are
    /// bounded by their limits.
    ///
    /// The returned [`Status`] carries the numerical Hessian at the minimum along with the
    /// covariance and parabolic errors derived from it.
    pub fn minimize(&self, p0: &[Float], options: Option<MinimizerOptions>) -> Status {
        let options = options.unwrap_or_default();
        let mut m = Minimizer::new(options.algorithm, self.n_free())
            .with_bounds(Some(self.bounds.clone()))
            .with_max_steps(options.max_steps);
        for observer in options.observers {
            m = m.with_observer(observer);
        }
        m.minimize(self, p0, &mut ())
            .unwrap_or_else(|never| match never {});
        m.status
    }
}

impl Function<(), Infallible> for NLL<'_> {
    fn evaluate(&self, parameters: &[Float], _user_data: &mut ()) -> Result<Float, Infallible> {
        Ok(NLL::evaluate(self, parameters))
    }
}

/// A set of options that are used when minimizations are performed.
pub struct MinimizerOptions {
    algorithm: Box<dyn Algorithm<(), Infallible>>,
    observers: Vec<Arc<RwLock<dyn Observer<()>>>>,
    max_steps: usize,
}

impl Default for MinimizerOptions {
    fn default() -> Self {
        Self {
            algorithm: Box::new(LBFGSB::<(), Infallible>::default()),
            observers: Default::default(),
            max_steps: 4000,
        }
    }
}

/// Reports every minimizer step through `tracing` at the `trace` level.
struct TracingObserver;

impl Observer<()> for TracingObserver {
    fn callback(&mut self, step: usize, status: &mut Status, _user_data: &mut ()) -> bool {
        trace!(step, fx = status.fx, "x = {}", status.x.transpose());
        false
    }
}

impl MinimizerOptions {
    /// Log every step of the minimization.
    pub fn traced(self) -> Self {
        debug!("tracing minimizer steps");
        let mut observers = self.observers;
        observers.push(Arc::new(RwLock::new(TracingObserver)));
        Self {
            algorithm: self.algorithm,
            observers,
            max_steps: self.max_steps,
        }
    }

    /// Set the maximum number of [`Algorithm`] steps for the minimization (default: 4000).
    pub fn with_max_steps(self, max_steps: usize) -> Self {
        Self {
            algorithm: self.algorithm,
            observers: self.observers,
            max_steps,
        }
    }

    /// The options used for a fit: step-by-step reports are only collected when `trace`
    /// logging is enabled.
    pub fn for_fit(max_steps: usize) -> Self {
        let options = Self::default().with_max_steps(max_steps);
        if tracing::enabled!(Level::TRACE) {
            options.traced()
        } else {
            options
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        data::{Cut, Observable, DATASET_NAME},
        model::{ExtendedModel, Parameter, Shape},
    };
    use approx::assert_relative_eq;
    use indexmap::IndexMap;

    fn flat_setup(
        values: &[Float],
        weights: Option<&[Float]>,
    ) -> (Dataset, BoundModel, ParameterSet) {
        let x = Observable::new("x", 5.0, 0.0, 10.0).unwrap();
        let dataset =
            Dataset::from_values(DATASET_NAME, &x, values, weights, &Cut::always()).unwrap();
        let mut parameters = ParameterSet::default();
        parameters.insert(Parameter::new("n", 1.0, 0.0, 100.0)).unwrap();
        parameters.insert(Parameter::constant("a0", 0.0)).unwrap();
        let mut pdfs = IndexMap::new();
        pdfs.insert(
            "flat".to_string(),
            Shape::Chebychev {
                coefficients: vec!["a0".to_string()],
            },
        );
        let model = ExtendedModel::new("model", &[("flat", "n")])
            .bind(&pdfs, &parameters, x.range())
            .unwrap();
        (dataset, model, parameters)
    }

    #[test]
    fn extended_nll_value() {
        let (dataset, model, parameters) = flat_setup(&[1.0, 2.0, 3.0, 4.0], None);
        let nll = NLL::new(model, &dataset, &parameters);
        assert_eq!(nll.parameters(), ["n"]);
        // n - N ln(n / 10)
        let expected = 4.0 - 4.0 * Float::ln(4.0 / 10.0);
        assert_relative_eq!(nll.evaluate(&[4.0]), expected, epsilon = 1e-10);
    }

    #[test]
    fn weighted_nll_value() {
        let (dataset, model, parameters) = flat_setup(&[1.0, 2.0], Some(&[0.5, 1.5]));
        let nll = NLL::new(model, &dataset, &parameters);
        let expected = 3.0 - 2.0 * Float::ln(3.0 / 10.0);
        assert_relative_eq!(nll.evaluate(&[3.0]), expected, epsilon = 1e-10);
    }

    #[test]
    fn yield_minimum_is_event_count() {
        let values: Vec<Float> = (0..50).map(|i| 0.1 + 0.19 * i as Float).collect();
        let (dataset, model, parameters) = flat_setup(&values, None);
        let nll = NLL::new(model, &dataset, &parameters);
        let status = nll.minimize(&[10.0], None);
        assert_relative_eq!(status.x[0], 50.0, epsilon = 1e-2);
        // the minimizer leaves the Hessian-based error behind
        let error = status.err.unwrap()[0];
        assert_relative_eq!(error, Float::sqrt(50.0), epsilon = 0.05);
        assert!(status.cov.is_some());
    }

    #[test]
    fn traced_minimization_runs_to_the_minimum() {
        let values: Vec<Float> = (0..20).map(|i| 0.25 + 0.5 * i as Float).collect();
        let (dataset, model, parameters) = flat_setup(&values, None);
        let nll = NLL::new(model, &dataset, &parameters);
        let options = MinimizerOptions::default().with_max_steps(200).traced();
        let status = nll.minimize(&[1.0], Some(options));
        assert_relative_eq!(status.x[0], 20.0, epsilon = 1e-2);
        let status = nll.minimize(&[1.0], Some(MinimizerOptions::for_fit(200)));
        assert_relative_eq!(status.x[0], 20.0, epsilon = 1e-2);
    }

    #[test]
    fn fixing_removes_a_parameter() {
        let (dataset, model, parameters) = flat_setup(&[1.0, 2.0, 3.0], None);
        let nll = NLL::new(model, &dataset, &parameters);
        let fixed = nll.with_fixed(0, 3.0);
        assert_eq!(fixed.n_free(), 0);
        assert!(fixed.bounds().is_empty());
        assert_relative_eq!(fixed.evaluate(&[]), nll.evaluate(&[3.0]));
        assert_eq!(fixed.expand(&[]), vec![3.0, 0.0]);
    }
}
