//! Weighted-count statistic.
//!
//! A [`GammaParams`] stores an effective unweighted count `n` and an effective
//! per-event weight `w`. The yield is `n·w` and the Poisson-like uncertainty is
//! `sqrt(n)·w`, so a sum of weighted events keeps enough information to throw
//! Gamma-distributed toys later.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, MulAssign};

use serde::{Deserialize, Serialize};

/// Effective-count / effective-weight pair.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GammaParams {
    n_effective: f64,
    weight: f64,
}

impl GammaParams {
    /// Statistic with explicit effective count and weight.
    pub fn new(n_effective: f64, weight: f64) -> Self {
        Self { n_effective, weight }
    }

    /// Back-solve `(n, w)` from a yield and its uncertainty.
    ///
    /// A non-positive yield has no effective count; its weight becomes
    /// `hypot(yield, uncertainty)` so the statistic still carries a scale.
    pub fn from_yield_and_uncertainty(yield_value: f64, uncertainty: f64) -> Self {
        let mut out = Self::default();
        out.set_yield_and_uncertainty(yield_value, uncertainty);
        out
    }

    /// Overwrite with the statistic matching `(yield, uncertainty)`.
    pub fn set_yield_and_uncertainty(&mut self, yield_value: f64, uncertainty: f64) {
        if yield_value > 0.0 {
            // A zero uncertainty would need an infinite count.
            let u = uncertainty.abs().max(yield_value * f64::EPSILON);
            self.n_effective = (yield_value / u).powi(2);
            self.weight = u * u / yield_value;
        } else {
            self.n_effective = 0.0;
            self.weight = yield_value.hypot(uncertainty);
        }
    }

    /// Effective unweighted count.
    pub fn n_effective(&self) -> f64 {
        self.n_effective
    }

    /// Set the effective unweighted count.
    pub fn set_n_effective(&mut self, n_effective: f64) {
        self.n_effective = n_effective;
    }

    /// Effective per-event weight.
    pub fn weight(&self) -> f64 {
        self.weight
    }

    /// Set the effective per-event weight.
    pub fn set_weight(&mut self, weight: f64) {
        self.weight = weight;
    }

    /// `n·w`
    pub fn yield_value(&self) -> f64 {
        self.n_effective * self.weight
    }

    /// `sqrt(n)·w`
    pub fn uncertainty(&self) -> f64 {
        self.n_effective.sqrt() * self.weight
    }

    /// `sqrt(n+1)·w`, non-zero even when nothing was counted.
    pub fn corrected_uncertainty(&self) -> f64 {
        (self.n_effective + 1.0).sqrt() * self.weight
    }
}

impl AddAssign for GammaParams {
    fn add_assign(&mut self, rhs: Self) {
        if self.n_effective == 0.0 && rhs.n_effective == 0.0 {
            self.weight = self.weight.hypot(rhs.weight);
        } else {
            let y = self.yield_value() + rhs.yield_value();
            let u = self.uncertainty().hypot(rhs.uncertainty());
            self.set_yield_and_uncertainty(y, u);
        }
    }
}

impl Add for GammaParams {
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self {
        self += rhs;
        self
    }
}

impl MulAssign<f64> for GammaParams {
    fn mul_assign(&mut self, rhs: f64) {
        self.weight *= rhs;
    }
}

impl Mul<f64> for GammaParams {
    type Output = Self;

    fn mul(mut self, rhs: f64) -> Self {
        self *= rhs;
        self
    }
}

impl Mul<GammaParams> for f64 {
    type Output = GammaParams;

    fn mul(self, rhs: GammaParams) -> GammaParams {
        rhs * self
    }
}

impl Sum for GammaParams {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), |acc, g| acc + g)
    }
}

impl fmt::Display for GammaParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}+-{} (N={}, w={})",
            self.yield_value(),
            self.uncertainty(),
            self.n_effective,
            self.weight
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn back_solve_roundtrip() {
        let g = GammaParams::from_yield_and_uncertainty(12.0, 3.0);
        assert_relative_eq!(g.n_effective(), 16.0, epsilon = 1e-12);
        assert_relative_eq!(g.weight(), 0.75, epsilon = 1e-12);
        assert_relative_eq!(g.yield_value(), 12.0, epsilon = 1e-12);
        assert_relative_eq!(g.uncertainty(), 3.0, epsilon = 1e-12);
    }

    #[test]
    fn non_positive_yield_keeps_scale() {
        let g = GammaParams::from_yield_and_uncertainty(0.0, 2.0);
        assert_eq!(g.n_effective(), 0.0);
        assert_eq!(g.weight(), 2.0);
        assert_eq!(g.yield_value(), 0.0);
        assert_relative_eq!(g.corrected_uncertainty(), 2.0);

        let neg = GammaParams::from_yield_and_uncertainty(-3.0, 4.0);
        assert_eq!(neg.n_effective(), 0.0);
        assert_relative_eq!(neg.weight(), 5.0);
    }

    #[test]
    fn zero_uncertainty_stays_finite() {
        let g = GammaParams::from_yield_and_uncertainty(10.0, 0.0);
        assert!(g.n_effective().is_finite());
        assert_relative_eq!(g.yield_value(), 10.0, max_relative = 1e-9);
    }

    #[test]
    fn zero_count_addition_uses_hypot_of_weights() {
        let sum = GammaParams::new(0.0, 3.0) + GammaParams::new(0.0, 4.0);
        assert_eq!(sum.n_effective(), 0.0);
        assert_relative_eq!(sum.weight(), 5.0);
    }

    #[test]
    fn scaling_keeps_count() {
        let mut g = GammaParams::new(9.0, 2.0);
        g *= 0.5;
        assert_eq!(g.n_effective(), 9.0);
        assert_relative_eq!(g.yield_value(), 9.0);
        assert_relative_eq!(g.uncertainty(), 3.0);
        assert_eq!(2.0 * g, g * 2.0);
    }

    #[test]
    fn sum_over_iterator() {
        let total: GammaParams = [GammaParams::new(4.0, 1.0), GammaParams::new(9.0, 1.0)]
            .into_iter()
            .sum();
        assert_relative_eq!(total.yield_value(), 13.0, epsilon = 1e-12);
        assert_relative_eq!(total.uncertainty(), 13f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn display_shows_count_and_weight() {
        let g = GammaParams::new(4.0, 0.5);
        assert_eq!(g.to_string(), "2+-1 (N=4, w=0.5)");
    }
}
