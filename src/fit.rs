//! Maximum-likelihood fits of a workspace model, with parabolic and profile-likelihood errors.
use std::fmt::Display;

use nalgebra::DMatrix;
use tracing::{debug, info, warn};

use crate::{
    config::FitConfig,
    likelihoods::{MinimizerOptions, NLL},
    model::{Parameter, ParameterSet},
    workspace::Workspace,
    CatfitResult, Float,
};

/// The rise of the negative log-likelihood which defines a one-sigma interval.
pub const ERROR_DEF: Float = 0.5;

const MINOS_MAX_DOUBLINGS: usize = 20;
const MINOS_MAX_BISECTIONS: usize = 40;
const MINOS_TOLERANCE: Float = 1e-3;

/// Settings for a single [`fit_to`] call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitOptions {
    /// Maximum number of minimizer steps
    pub max_steps: usize,
    /// Report the covariance and parabolic errors from the Hessian at the minimum
    pub hesse: bool,
    /// Compute asymmetric errors by profiling each parameter
    pub minos: bool,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            max_steps: 4000,
            hesse: true,
            minos: true,
        }
    }
}

impl FitOptions {
    /// Options matching the fit section of the configuration.
    pub fn from_config(config: &FitConfig) -> Self {
        Self {
            max_steps: config.max_steps,
            hesse: true,
            minos: config.minos,
        }
    }
}

/// The outcome of a fit.
#[derive(Debug, Clone, PartialEq)]
pub struct FitResult {
    /// Whether the minimizer reported convergence
    pub converged: bool,
    /// The negative log-likelihood at the minimum
    pub min_nll: Float,
    /// The floating parameters at the minimum, with their errors
    pub parameters: Vec<Parameter>,
    /// The covariance of the floating parameters, from the minimizer's Hessian at the minimum
    pub covariance: Option<DMatrix<Float>>,
}

impl FitResult {
    /// A floating parameter of the fit, by name.
    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

impl Display for FitResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "converged: {}  min NLL: {:.6}",
            self.converged, self.min_nll
        )?;
        writeln!(
            f,
            "{:<24} {:>14} {:>12} {:>12} {:>12}",
            "parameter", "value", "error", "lower", "upper"
        )?;
        for p in &self.parameters {
            let error = p.error.map_or("-".to_string(), |e| format!("{e:.6}"));
            let (lower, upper) = p
                .asym_errors
                .map_or(("-".to_string(), "-".to_string()), |(lo, hi)| {
                    (format!("{lo:.6}"), format!("{hi:+.6}"))
                });
            writeln!(
                f,
                "{:<24} {:>14.6} {:>12} {:>12} {:>12}",
                p.name, p.value, error, lower, upper
            )?;
        }
        Ok(())
    }
}

/// The stat-only significance of a signal from the minimum negative log-likelihoods of the
/// background-only and signal-plus-background fits.
pub fn significance(nll_b: Float, nll_sb: Float) -> Float {
    Float::sqrt(2.0 * (nll_b - nll_sb).abs())
}

/// Fit the extended model `model` of the workspace to its dataset `dataset` and write the fitted
/// values and errors back into the workspace parameters. Constant parameters are left alone.
pub fn fit_to(
    ws: &mut Workspace,
    model: &str,
    dataset: &str,
    options: &FitOptions,
) -> CatfitResult<FitResult> {
    let result = {
        let bound = ws
            .model(model)?
            .bind(ws.pdfs(), ws.parameters(), ws.observable.range())?;
        let nll = NLL::new(bound, ws.dataset(dataset)?, ws.parameters());
        debug!(
            "fitting {model} to {dataset} with {} floating parameters",
            nll.n_free()
        );
        run_fit(&nll, ws.parameters(), options)?
    };
    for fitted in &result.parameters {
        let parameter = ws.var_mut(&fitted.name)?;
        parameter.set_value(fitted.value);
        parameter.error = fitted.error;
        parameter.asym_errors = fitted.asym_errors;
    }
    info!(
        "fit of {model}: converged = {}, min NLL = {:.4}",
        result.converged, result.min_nll
    );
    Ok(result)
}

fn run_fit(nll: &NLL, parameters: &ParameterSet, options: &FitOptions) -> CatfitResult<FitResult> {
    let (best, min_nll, converged, covariance) = if nll.n_free() == 0 {
        (Vec::new(), nll.evaluate(&[]), true, None)
    } else {
        let status = nll.minimize(
            &nll.initial(),
            Some(MinimizerOptions::for_fit(options.max_steps)),
        );
        let best: Vec<Float> = status.x.iter().copied().collect();
        (best, status.fx, status.converged, status.cov)
    };
    if !converged {
        warn!("minimizer did not converge (NLL = {min_nll})");
    }

    let covariance = if options.hesse { covariance } else { None };
    let errors = parabolic_errors(covariance.as_ref(), best.len());
    if options.hesse && !best.is_empty() && errors.iter().all(Option::is_none) {
        warn!("Hessian could not be inverted, parabolic errors are unavailable");
    }

    let mut fitted = Vec::with_capacity(best.len());
    for (i, name) in nll.parameters().iter().enumerate() {
        let mut parameter = parameters.get(name)?.clone();
        parameter.value = best[i];
        parameter.error = errors[i];
        parameter.asym_errors = None;
        if options.hesse && parameter.error.is_none() {
            debug!("no parabolic error for {name}");
        }
        if options.minos {
            let scale = parameter
                .error
                .unwrap_or_else(|| 0.1 * best[i].abs().max(1.0));
            let lower = minos_error(nll, &best, min_nll, i, scale, -1.0);
            let upper = minos_error(nll, &best, min_nll, i, scale, 1.0);
            match (lower, upper) {
                (Some(lo), Some(hi)) => parameter.asym_errors = Some((lo, hi)),
                _ => warn!("could not determine asymmetric errors of {name}"),
            }
        }
        fitted.push(parameter);
    }

    Ok(FitResult {
        converged,
        min_nll,
        parameters: fitted,
        covariance,
    })
}

/// The square roots of the diagonal of `covariance`. A parameter whose variance is not a
/// positive finite number gets no error; the others keep theirs.
pub fn parabolic_errors(covariance: Option<&DMatrix<Float>>, n: usize) -> Vec<Option<Float>> {
    (0..n)
        .map(|i| {
            covariance
                .filter(|c| i < c.nrows() && i < c.ncols())
                .map(|c| c[(i, i)])
                .filter(|v| v.is_finite() && *v > 0.0)
                .map(Float::sqrt)
        })
        .collect()
}

/// The minimum of the negative log-likelihood with floating parameter `index` held at `value`.
fn profile(nll: &NLL, best: &[Float], index: usize, value: Float) -> Float {
    let fixed = nll.with_fixed(index, value);
    if fixed.n_free() == 0 {
        return fixed.evaluate(&[]);
    }
    let start: Vec<Float> = best
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != index)
        .map(|(_, &v)| v)
        .collect();
    fixed.minimize(&start, None).fx
}

/// Signed distance from the minimum to where the profile likelihood of parameter `index` rises
/// by [`ERROR_DEF`] in `direction`. The interval is cut off at the parameter limit.
fn minos_error(
    nll: &NLL,
    best: &[Float],
    min_nll: Float,
    index: usize,
    scale: Float,
    direction: Float,
) -> Option<Float> {
    let target = min_nll + ERROR_DEF;
    let (min, max) = nll.bounds()[index];
    let limit = if direction > 0.0 { max } else { min };
    let center = best[index];
    let crossed = |value: Float| profile(nll, best, index, value) >= target;

    let mut inner = center;
    let mut step = scale.abs().max(Float::EPSILON);
    let mut outer = None;
    for _ in 0..MINOS_MAX_DOUBLINGS {
        let candidate = center + direction * step;
        let beyond = (candidate - limit) * direction >= 0.0;
        let candidate = if beyond { limit } else { candidate };
        if crossed(candidate) {
            outer = Some(candidate);
            break;
        }
        if beyond {
            debug!("profile of parameter {index} stays below threshold up to its limit");
            return Some(limit - center);
        }
        inner = candidate;
        step *= 2.0;
    }
    let mut outer = outer?;
    let tolerance = MINOS_TOLERANCE * scale.abs().max(Float::EPSILON);
    for _ in 0..MINOS_MAX_BISECTIONS {
        if (outer - inner).abs() < tolerance {
            break;
        }
        let middle = 0.5 * (inner + outer);
        if crossed(middle) {
            outer = middle;
        } else {
            inner = middle;
        }
    }
    Some(0.5 * (inner + outer) - center)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        data::{Cut, Dataset, Observable, DATASET_NAME},
        model::{ExtendedModel, Shape},
    };
    use approx::assert_relative_eq;

    fn flat_workspace(n_events: usize) -> Workspace {
        let x = Observable::new("x", 5.0, 0.0, 10.0).unwrap();
        let values: Vec<Float> = (0..n_events)
            .map(|i| 10.0 * (i as Float + 0.5) / n_events as Float)
            .collect();
        let dataset =
            Dataset::from_values(DATASET_NAME, &x, &values, None, &Cut::always()).unwrap();
        let mut ws = Workspace::new("w", x);
        ws.factory(Parameter::new("n", 10.0, 0.0, 1000.0)).unwrap();
        ws.factory(Parameter::new("a0", 0.2, -1.0, 1.0)).unwrap();
        ws.add_pdf(
            "flat",
            Shape::Chebychev {
                coefficients: vec!["a0".to_string()],
            },
        )
        .unwrap();
        ws.add_model(ExtendedModel::new("model", &[("flat", "n")]))
            .unwrap();
        ws.import_dataset(dataset).unwrap();
        ws
    }

    #[test]
    fn significance_is_symmetric() {
        assert_relative_eq!(significance(110.0, 102.0), 4.0);
        assert_relative_eq!(significance(102.0, 110.0), 4.0);
        assert_relative_eq!(significance(5.0, 5.0), 0.0);
    }

    #[test]
    fn yield_error_is_poisson() {
        let mut ws = flat_workspace(400);
        let options = FitOptions {
            minos: true,
            ..Default::default()
        };
        let result = fit_to(&mut ws, "model", DATASET_NAME, &options).unwrap();
        let n = result.parameter("n").unwrap();
        assert_relative_eq!(n.value, 400.0, epsilon = 0.5);
        assert_relative_eq!(n.error.unwrap(), 20.0, epsilon = 0.5);
        let (lo, hi) = n.asym_errors.unwrap();
        assert!(lo < 0.0 && hi > 0.0);
        assert_relative_eq!(-lo, 20.0, epsilon = 1.0);
        assert_relative_eq!(hi, 20.0, epsilon = 1.0);
        assert!(result.covariance.is_some());
        // the workspace now carries the fitted values
        assert_relative_eq!(ws.var("n").unwrap().value, n.value);
        assert_eq!(ws.var("n").unwrap().error, n.error);
        assert!(ws.var("a0").unwrap().value.abs() < 0.05);
    }

    #[test]
    fn constant_parameters_are_not_fitted() {
        let mut ws = flat_workspace(100);
        ws.var_mut("a0").unwrap().set_constant(true);
        let options = FitOptions {
            minos: false,
            ..Default::default()
        };
        let result = fit_to(&mut ws, "model", DATASET_NAME, &options).unwrap();
        assert_eq!(result.parameters.len(), 1);
        assert_relative_eq!(ws.var("a0").unwrap().value, 0.2);
        assert!(ws.var("a0").unwrap().error.is_none());
        assert!(result.to_string().contains("parameter"));
    }

    #[test]
    fn missing_objects_are_reported() {
        let mut ws = flat_workspace(10);
        let options = FitOptions::default();
        assert!(fit_to(&mut ws, "nothing", DATASET_NAME, &options).is_err());
        assert!(fit_to(&mut ws, "model", "nothing", &options).is_err());
    }

    #[test]
    fn bad_variances_only_drop_their_own_error() {
        let c = DMatrix::from_row_slice(
            3,
            3,
            &[4.0, 0.1, 0.0, 0.1, -1e-9, 0.0, 0.0, 0.0, 0.25],
        );
        let errors = parabolic_errors(Some(&c), 3);
        assert_relative_eq!(errors[0].unwrap(), 2.0);
        assert!(errors[1].is_none());
        assert_relative_eq!(errors[2].unwrap(), 0.5);
        let c = DMatrix::from_row_slice(2, 2, &[Float::NAN, 0.0, 0.0, 1.0]);
        assert_eq!(parabolic_errors(Some(&c), 2), vec![None, Some(1.0)]);
        assert_eq!(parabolic_errors(None, 2), vec![None, None]);
    }

    #[test]
    fn hesse_can_be_switched_off() {
        let mut ws = flat_workspace(100);
        let options = FitOptions {
            hesse: false,
            minos: false,
            ..Default::default()
        };
        let result = fit_to(&mut ws, "model", DATASET_NAME, &options).unwrap();
        assert!(result.covariance.is_none());
        assert!(result.parameters.iter().all(|p| p.error.is_none()));
    }
}
