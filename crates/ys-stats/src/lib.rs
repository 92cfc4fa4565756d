//! # ys-stats
//!
//! Weighted-count statistics for yieldscan.
//!
//! - [`GammaParams`]: effective count and effective weight of a weighted yield
//! - [`calc_kappa`]: toy-based uncertainty of a product of powers of yields,
//!   as used by ABCD-style background predictions

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod gamma_params;
pub mod kappa;

pub use gamma_params::GammaParams;
pub use kappa::{KappaEstimate, Observable, ToyConfig, ToyMode, calc_kappa, one_sigma_mass};
