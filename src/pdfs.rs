//! Closed-form probability densities normalized over a bounded observable range.
//!
//! Each shape is evaluated in two steps: [`prepare`](GaussianPdf::prepare) computes the
//! normalization for a given set of parameter values once, and the returned [`Density`]
//! evaluates the normalized density at any number of points.
use serde::{Deserialize, Serialize};
use statrs::function::erf::erfc;

use crate::{Float, PI};

/// A density whose parameters have already been fixed.
pub trait Density {
    /// The normalized density at `x`.
    fn density(&self, x: Float) -> Float;
}

/// The standard normal cumulative distribution function.
pub fn standard_normal_cdf(z: Float) -> Float {
    0.5 * erfc(-z / Float::sqrt(2.0))
}

/// Gaussian truncated to `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GaussianPdf {
    /// The normalization range
    pub range: (Float, Float),
}

impl GaussianPdf {
    /// Construct a new [`GaussianPdf`] over `range`.
    pub fn new(range: (Float, Float)) -> Self {
        Self { range }
    }

    /// Fix the mean and width.
    pub fn prepare(&self, mean: Float, sigma: Float) -> NormalizedGaussian {
        let sigma = sigma.abs().max(Float::EPSILON);
        let z_a = (self.range.0 - mean) / sigma;
        let z_b = (self.range.1 - mean) / sigma;
        let mut z = standard_normal_cdf(z_b) - standard_normal_cdf(z_a);
        if !z.is_finite() || z <= 0.0 {
            // the peak sits far outside the range
            z = Float::MIN_POSITIVE;
        }
        NormalizedGaussian {
            mean,
            sigma,
            scale: 1.0 / (Float::sqrt(2.0 * PI) * sigma * z),
        }
    }
}

/// A [`GaussianPdf`] with fixed parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedGaussian {
    mean: Float,
    sigma: Float,
    scale: Float,
}

impl Density for NormalizedGaussian {
    fn density(&self, x: Float) -> Float {
        let z = (x - self.mean) / self.sigma;
        self.scale * Float::exp(-0.5 * z * z)
    }
}

/// Chebychev polynomial `1 + c_1 T_1(x') + c_2 T_2(x') + ...` on `[min, max]`, where `x'` maps
/// the range onto `[-1, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChebychevPdf {
    /// The normalization range
    pub range: (Float, Float),
}

impl ChebychevPdf {
    /// Construct a new [`ChebychevPdf`] over `range`.
    pub fn new(range: (Float, Float)) -> Self {
        Self { range }
    }

    /// The integral of the unnormalized polynomial over the range.
    ///
    /// Odd orders integrate to zero over `[-1, 1]` and `T_k` for even `k` integrates to
    /// `2 / (1 - k^2)`, so `I = w (1 + sum_{k even} c_k / (1 - k^2))` with `w` the range width.
    pub fn integral(&self, coefficients: &[Float]) -> Float {
        let w = self.range.1 - self.range.0;
        let mut integral = w;
        for (idx, &c) in coefficients.iter().enumerate() {
            let k = (idx + 1) as Float;
            if (idx + 1) % 2 == 0 {
                integral += w * c / (1.0 - k * k);
            }
        }
        integral
    }

    /// Fix the coefficients.
    pub fn prepare(&self, coefficients: &[Float]) -> NormalizedChebychev {
        let mut integral = self.integral(coefficients);
        if !integral.is_finite() || integral <= 0.0 {
            integral = Float::MIN_POSITIVE;
        }
        NormalizedChebychev {
            coefficients: coefficients.to_vec(),
            range: self.range,
            inv_integral: 1.0 / integral,
        }
    }
}

/// A [`ChebychevPdf`] with fixed coefficients.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedChebychev {
    coefficients: Vec<Float>,
    range: (Float, Float),
    inv_integral: Float,
}

impl Density for NormalizedChebychev {
    fn density(&self, x: Float) -> Float {
        let xp = ((2.0 * x - (self.range.0 + self.range.1)) / (self.range.1 - self.range.0))
            .clamp(-1.0, 1.0);
        // T_{k+1} = 2 x T_k - T_{k-1}
        let mut t_prev = 1.0;
        let mut t_curr = xp;
        let mut value = 1.0;
        for &c in &self.coefficients {
            value += c * t_curr;
            let t_next = 2.0 * xp * t_curr - t_prev;
            t_prev = t_curr;
            t_curr = t_next;
        }
        value * self.inv_integral
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn integrate<D: Density>(density: &D, range: (Float, Float)) -> Float {
        // midpoint rule
        let n = 20000;
        let h = (range.1 - range.0) / n as Float;
        (0..n)
            .map(|i| density.density(range.0 + (i as Float + 0.5) * h) * h)
            .sum()
    }

    #[test]
    fn normal_cdf() {
        assert_relative_eq!(standard_normal_cdf(0.0), 0.5, epsilon = 1e-12);
        assert_relative_eq!(standard_normal_cdf(1.0), 0.841344746068543, epsilon = 1e-9);
        assert_relative_eq!(standard_normal_cdf(-2.0), 0.022750131948179, epsilon = 1e-9);
    }

    #[test]
    fn gaussian_is_normalized() {
        let pdf = GaussianPdf::new((12.0, 70.0));
        for (mean, sigma) in [(28.0, 1.0), (13.0, 2.5), (69.0, 4.0), (40.0, 0.2)] {
            let g = pdf.prepare(mean, sigma);
            assert_relative_eq!(integrate(&g, pdf.range), 1.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn gaussian_peak() {
        let pdf = GaussianPdf::new((-100.0, 100.0));
        let g = pdf.prepare(0.0, 2.0);
        assert_relative_eq!(g.density(0.0), 1.0 / (Float::sqrt(2.0 * PI) * 2.0), epsilon = 1e-12);
        assert!(g.density(1.0) < g.density(0.0));
    }

    #[test]
    fn chebychev_is_normalized() {
        let pdf = ChebychevPdf::new((12.0, 70.0));
        for coefficients in [
            vec![],
            vec![-0.5],
            vec![-0.6, 0.2, -0.05],
            vec![0.1, -0.3, 0.2, 0.1],
        ] {
            let c = pdf.prepare(&coefficients);
            assert_relative_eq!(integrate(&c, pdf.range), 1.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn chebychev_flat_and_linear() {
        let pdf = ChebychevPdf::new((0.0, 2.0));
        let flat = pdf.prepare(&[]);
        assert_relative_eq!(flat.density(0.3), 0.5);
        let linear = pdf.prepare(&[0.5]);
        assert_relative_eq!(linear.density(0.0), 0.25);
        assert_relative_eq!(linear.density(2.0), 0.75);
        // second order: T2(x') = 2x'^2 - 1, integral of (1 + c T2) over [-1, 1] scaled by w/2
        assert_relative_eq!(pdf.integral(&[0.0, 0.3]), 2.0 * (1.0 - 0.3 / 3.0));
    }
}
