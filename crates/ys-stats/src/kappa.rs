//! Toy-based propagation of uncertainty through a product of powers of yields.
//!
//! For observables `i` with summed yields `Y_i` and powers `p_i` the kappa
//! value is `Π_i Y_i^p_i`. Each toy replicate redraws every sample's yield
//! from `Gamma(n+1, 1)·w` (or, in data mode, the observable total from
//! `Gamma(Y+1, 1)`), recombines them the same way, and the sorted toy
//! ensemble gives an asymmetric interval around the deterministic value.
//!
//! Randomness is deterministic via per-toy seeding (`seed + toy_idx`),
//! independent of threading.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Gamma, LogNormal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use ys_core::{Error, Result};

use crate::gamma_params::GammaParams;

/// Probability mass of a standard normal within one sigma of the mean.
pub fn one_sigma_mass() -> f64 {
    statrs::function::erf::erf(std::f64::consts::FRAC_1_SQRT_2)
}

/// One factor of the kappa product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observable {
    /// Statistics summed into this observable.
    pub samples: Vec<GammaParams>,
    /// Exponent applied to the summed yield.
    pub power: f64,
}

impl Observable {
    /// Observable from its samples and power.
    pub fn new(samples: Vec<GammaParams>, power: f64) -> Self {
        Self { samples, power }
    }

    /// Sum of the samples' yields.
    pub fn total_yield(&self) -> f64 {
        self.samples.iter().map(GammaParams::yield_value).sum()
    }
}

/// How toy yields are drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToyMode {
    /// Fluctuate each sample from its effective count and weight.
    #[default]
    Mc,
    /// Treat the observable total as an observed count and fluctuate it.
    Data,
}

/// Toy-throwing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToyConfig {
    /// Number of toy replicates.
    pub n_toys: usize,
    /// Base seed; toy `i` uses `seed + i`.
    pub seed: u64,
    /// Probability mass of the reported interval.
    pub central_mass: f64,
    /// Relative log-normal systematic applied per toy.
    pub systematic: Option<f64>,
    /// Sampling mode.
    pub mode: ToyMode,
}

impl Default for ToyConfig {
    fn default() -> Self {
        Self {
            n_toys: 10_000,
            seed: 1234,
            central_mass: one_sigma_mass(),
            systematic: None,
            mode: ToyMode::Mc,
        }
    }
}

/// Result of [`calc_kappa`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KappaEstimate {
    /// Deterministic product of powers (toy median when that is degenerate).
    pub value: f64,
    /// Distance from `value` down to the lower interval edge.
    pub down: f64,
    /// Distance from `value` up to the upper interval edge.
    pub up: f64,
    /// Mean of the valid toys.
    pub mean: f64,
    /// Median of the valid toys.
    pub median: f64,
    /// Toys that produced a finite value.
    pub n_valid: usize,
    /// Toys dropped because a negative-power observable was non-positive, a
    /// Gamma shape was invalid, or the toy product was not finite.
    pub n_discarded: usize,
}

fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    if p <= 0.0 {
        return sorted[0];
    }
    if p >= 1.0 {
        return sorted[n - 1];
    }
    let idx = p * ((n - 1) as f64);
    let lo = idx.floor() as usize;
    let hi = idx.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    let w = idx - (lo as f64);
    sorted[lo] + w * (sorted[hi] - sorted[lo])
}

/// Narrowest `[lo, hi]` of `sorted` holding `ceil(mass·n)` entries.
fn narrowest_window(sorted: &[f64], mass: f64) -> (f64, f64) {
    let n = sorted.len();
    let k = ((mass * n as f64).ceil() as usize).clamp(1, n);
    let mut best = (sorted[0], sorted[k - 1]);
    for i in 1..=(n - k) {
        let (lo, hi) = (sorted[i], sorted[i + k - 1]);
        if hi - lo < best.1 - best.0 {
            best = (lo, hi);
        }
    }
    best
}

#[inline]
fn raise(x: f64, power: f64) -> f64 {
    if power.fract() == 0.0 && power.abs() <= f64::from(i32::MAX) {
        x.powi(power as i32)
    } else {
        x.powf(power)
    }
}

/// Product of powers, or `None` when a negative power meets a non-positive base.
fn product_of_powers(totals: impl Iterator<Item = (f64, f64)>) -> Option<f64> {
    let mut value = 1.0;
    for (total, power) in totals {
        if total <= 0.0 && power < 0.0 {
            return None;
        }
        value *= raise(total, power);
    }
    Some(value)
}

fn gamma_draw(rng: &mut StdRng, shape: f64) -> Option<f64> {
    Gamma::new(shape, 1.0).ok().map(|g| g.sample(rng))
}

fn throw_toy(
    observables: &[Observable],
    mode: ToyMode,
    systematic: Option<&LogNormal<f64>>,
    toy_seed: u64,
) -> Option<f64> {
    let mut rng = StdRng::seed_from_u64(toy_seed);
    let mut totals = Vec::with_capacity(observables.len());
    for obs in observables {
        let observed = match mode {
            ToyMode::Mc => {
                let mut sum = 0.0;
                for s in &obs.samples {
                    sum += gamma_draw(&mut rng, s.n_effective() + 1.0)? * s.weight();
                }
                sum
            }
            ToyMode::Data => gamma_draw(&mut rng, obs.total_yield().max(0.0) + 1.0)?,
        };
        totals.push((observed, obs.power));
    }
    let mut kappa = product_of_powers(totals.into_iter())?;
    if let Some(dist) = systematic {
        kappa *= dist.sample(&mut rng);
    }
    kappa.is_finite().then_some(kappa)
}

/// Compute kappa and its toy-based asymmetric interval.
///
/// Toys whose denominator comes out non-positive, or that cannot be drawn or
/// evaluated to a finite number, are discarded and counted.
/// If every toy is discarded the inputs are degenerate and an error is
/// returned.
pub fn calc_kappa(observables: &[Observable], config: &ToyConfig) -> Result<KappaEstimate> {
    if observables.is_empty() {
        return Err(Error::Config("kappa needs at least one observable".into()));
    }
    if config.n_toys == 0 {
        return Err(Error::Config("n_toys must be > 0".into()));
    }
    if !(config.central_mass > 0.0 && config.central_mass <= 1.0) {
        return Err(Error::Config(format!(
            "central_mass must be in (0, 1], got {}",
            config.central_mass
        )));
    }
    let systematic = config
        .systematic
        .map(|s| {
            if !(s.is_finite() && s > -1.0) {
                return Err(Error::Config(format!("invalid systematic: {s}")));
            }
            LogNormal::new(0.0, (1.0 + s).ln().abs())
                .map_err(|e| Error::Config(format!("invalid systematic {s}: {e}")))
        })
        .transpose()?;

    let toys: Vec<Option<f64>> = (0..config.n_toys)
        .into_par_iter()
        .with_min_len(64)
        .map(|toy_idx| {
            let toy_seed = config.seed.wrapping_add(toy_idx as u64);
            throw_toy(observables, config.mode, systematic.as_ref(), toy_seed)
        })
        .collect();

    let mut sorted: Vec<f64> = toys.into_iter().flatten().collect();
    let n_valid = sorted.len();
    let n_discarded = config.n_toys - n_valid;
    if n_valid == 0 {
        return Err(Error::Degenerate(format!(
            "all {} toys discarded (non-positive denominator or non-finite toy)",
            config.n_toys
        )));
    }
    if n_discarded > 0 {
        log::warn!(
            "kappa: {n_discarded} of {} toys discarded \
             (non-positive denominator or non-finite toy)",
            config.n_toys
        );
    }
    sorted.sort_by(f64::total_cmp);

    let mean = sorted.iter().sum::<f64>() / n_valid as f64;
    let median = quantile_sorted(&sorted, 0.5);
    let value = product_of_powers(observables.iter().map(|o| (o.total_yield(), o.power)))
        .filter(|v| v.is_finite())
        .unwrap_or(median);
    let (lo, hi) = narrowest_window(&sorted, config.central_mass);

    Ok(KappaEstimate {
        value,
        down: (value - lo).max(0.0),
        up: (hi - value).max(0.0),
        mean,
        median,
        n_valid,
        n_discarded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn obs(n: f64, w: f64, power: f64) -> Observable {
        Observable::new(vec![GammaParams::new(n, w)], power)
    }

    fn small(n_toys: usize) -> ToyConfig {
        ToyConfig { n_toys, ..ToyConfig::default() }
    }

    #[test]
    fn one_sigma_mass_value() {
        assert_relative_eq!(one_sigma_mass(), 0.682_689_492_137_085_9, epsilon = 1e-12);
    }

    #[test]
    fn quantile_sorted_interpolates() {
        let v = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile_sorted(&v, 0.0), 1.0);
        assert_eq!(quantile_sorted(&v, 1.0), 4.0);
        assert_relative_eq!(quantile_sorted(&v, 0.5), 2.5);
        assert!(quantile_sorted(&[], 0.5).is_nan());
    }

    #[test]
    fn narrowest_window_prefers_dense_region() {
        let v = [0.0, 10.0, 10.1, 10.2, 10.3, 50.0];
        assert_eq!(narrowest_window(&v, 0.6), (10.0, 10.3));
        assert_eq!(narrowest_window(&v, 1.0), (0.0, 50.0));
        assert_eq!(narrowest_window(&[7.0], 0.68), (7.0, 7.0));
    }

    #[test]
    fn exact_ratio_of_yields() {
        let k = calc_kappa(&[obs(10.0, 1.0, 1.0), obs(5.0, 1.0, -1.0)], &small(200)).unwrap();
        assert_eq!(k.value, 2.0);
        assert_eq!(k.n_valid + k.n_discarded, 200);
        assert!(k.down >= 0.0 && k.up >= 0.0);
    }

    #[test]
    fn samples_are_summed_before_power() {
        let num =
            Observable::new(vec![GammaParams::new(4.0, 1.0), GammaParams::new(2.0, 3.0)], 1.0);
        let k = calc_kappa(&[num, obs(5.0, 1.0, -2.0)], &small(50)).unwrap();
        assert_relative_eq!(k.value, 10.0 / 25.0, epsilon = 1e-12);
    }

    #[test]
    fn all_toys_discarded_is_degenerate() {
        let err = calc_kappa(&[obs(3.0, 1.0, 1.0), obs(0.0, 0.0, -1.0)], &small(100)).unwrap_err();
        assert!(matches!(err, Error::Degenerate(_)), "{err}");
    }

    #[test]
    fn invalid_config_is_rejected() {
        assert!(matches!(calc_kappa(&[], &small(10)), Err(Error::Config(_))));
        assert!(matches!(calc_kappa(&[obs(1.0, 1.0, 1.0)], &small(0)), Err(Error::Config(_))));
        let cfg = ToyConfig { central_mass: 1.5, ..small(10) };
        assert!(matches!(calc_kappa(&[obs(1.0, 1.0, 1.0)], &cfg), Err(Error::Config(_))));
    }

    #[test]
    fn degenerate_central_value_falls_back_to_median() {
        // The denominator has no entries but a positive weight, so toys survive.
        let cfg = ToyConfig { mode: ToyMode::Mc, ..small(500) };
        let k = calc_kappa(&[obs(10.0, 1.0, 1.0), obs(0.0, 1.0, -1.0)], &cfg).unwrap();
        assert_eq!(k.n_discarded, 0);
        assert_eq!(k.value, k.median);
    }
}
