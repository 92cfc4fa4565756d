//! # ys-expr
//!
//! Named per-event expressions used to describe selections (cuts) and event
//! weights.
//!
//! ```
//! use ys_expr::NamedFunc;
//!
//! let met = NamedFunc::field("met");
//! let njets = NamedFunc::field("njets");
//! let cut = met.greater(200.0).and(njets.greater_equal(4.0));
//! assert_eq!(cut.name(), "((met>200)&&(njets>=4))");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod formula;
pub mod named_func;

pub use backend::ExpressionBackend;
pub use formula::FormulaBackend;
pub use named_func::{NamedFunc, has_pass};
