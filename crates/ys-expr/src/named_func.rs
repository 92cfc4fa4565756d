//! Named per-event expressions.
//!
//! A [`NamedFunc`] wraps a pure function of one event that yields either a
//! single number or a sequence of numbers, together with a display name.
//! Combinators never mutate their operands; they return a new expression whose
//! name is the textual composition of the operand names.
//!
//! Pairwise semantics:
//! - scalar ∘ scalar → scalar
//! - scalar ∘ vector, vector ∘ scalar → vector (the scalar is broadcast)
//! - vector ∘ vector → vector, truncated to the shorter operand

use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Not, Rem, Sub};
use std::sync::Arc;

use ys_core::Event;

type ScalarFn = dyn Fn(&dyn Event) -> f64 + Send + Sync;
type VectorFn = dyn Fn(&dyn Event) -> Vec<f64> + Send + Sync;

#[derive(Clone)]
enum Payload {
    Scalar(Arc<ScalarFn>),
    Vector(Arc<VectorFn>),
}

/// A named, immutable, per-event computation.
#[derive(Clone)]
pub struct NamedFunc {
    name: String,
    payload: Payload,
}

#[inline]
fn truthy(x: f64) -> bool {
    x != 0.0
}

#[inline]
fn flag(b: bool) -> f64 {
    if b { 1.0 } else { 0.0 }
}

/// True if any element of a vector-valued cut is non-zero.
pub fn has_pass(values: &[f64]) -> bool {
    values.iter().any(|&v| truthy(v))
}

impl NamedFunc {
    /// Scalar-valued expression from a closure.
    pub fn scalar<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&dyn Event) -> f64 + Send + Sync + 'static,
    {
        Self { name: name.into(), payload: Payload::Scalar(Arc::new(f)) }
    }

    /// Vector-valued expression from a closure.
    pub fn vector<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&dyn Event) -> Vec<f64> + Send + Sync + 'static,
    {
        Self { name: name.into(), payload: Payload::Vector(Arc::new(f)) }
    }

    /// Constant scalar expression.
    pub fn constant(x: f64) -> Self {
        Self::scalar(format!("{x}"), move |_| x)
    }

    /// Reads a scalar field of the loaded row.
    ///
    /// # Panics
    /// At evaluation time, if the event has no scalar field `field`.
    pub fn field(field: impl Into<String>) -> Self {
        let field = field.into();
        let key = field.clone();
        Self::scalar(field, move |ev| {
            ev.scalar(&key).unwrap_or_else(|| panic!("event has no scalar field '{key}'"))
        })
    }

    /// Reads a vector field of the loaded row.
    ///
    /// # Panics
    /// At evaluation time, if the event has no vector field `field`.
    pub fn vector_field(field: impl Into<String>) -> Self {
        let field = field.into();
        let key = field.clone();
        Self::vector(field, move |ev| {
            ev.vector(&key).unwrap_or_else(|| panic!("event has no vector field '{key}'")).to_vec()
        })
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Same computation under a different display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// True if the expression yields one number per event.
    pub fn is_scalar(&self) -> bool {
        matches!(self.payload, Payload::Scalar(_))
    }

    /// True if the expression yields a sequence per event.
    pub fn is_vector(&self) -> bool {
        matches!(self.payload, Payload::Vector(_))
    }

    /// Evaluate as a scalar.
    ///
    /// A vector-valued expression collapses to its pass flag (1 if any
    /// element is non-zero, else 0).
    pub fn get_scalar(&self, ev: &dyn Event) -> f64 {
        match &self.payload {
            Payload::Scalar(f) => f(ev),
            Payload::Vector(f) => flag(has_pass(&f(ev))),
        }
    }

    /// Evaluate as a vector. A scalar expression yields a one-element vector.
    pub fn get_vector(&self, ev: &dyn Event) -> Vec<f64> {
        match &self.payload {
            Payload::Scalar(f) => vec![f(ev)],
            Payload::Vector(f) => f(ev),
        }
    }

    /// Cut semantics: a scalar passes iff non-zero, a vector iff any element does.
    pub fn passes(&self, ev: &dyn Event) -> bool {
        match &self.payload {
            Payload::Scalar(f) => truthy(f(ev)),
            Payload::Vector(f) => has_pass(&f(ev)),
        }
    }

    /// Apply `f` element-wise; the result keeps this expression's shape.
    pub fn map(&self, label: &str, f: fn(f64) -> f64) -> Self {
        let name = format!("{label}({})", self.name);
        match &self.payload {
            Payload::Scalar(g) => {
                let g = Arc::clone(g);
                Self::scalar(name, move |ev| f(g(ev)))
            }
            Payload::Vector(g) => {
                let g = Arc::clone(g);
                Self::vector(name, move |ev| g(ev).into_iter().map(f).collect())
            }
        }
    }

    /// Combine two expressions pairwise with `op`.
    pub fn zip_with(&self, other: &NamedFunc, name: String, op: fn(f64, f64) -> f64) -> Self {
        match (&self.payload, &other.payload) {
            (Payload::Scalar(fa), Payload::Scalar(fb)) => {
                let (fa, fb) = (Arc::clone(fa), Arc::clone(fb));
                Self::scalar(name, move |ev| op(fa(ev), fb(ev)))
            }
            (Payload::Scalar(fa), Payload::Vector(fb)) => {
                let (fa, fb) = (Arc::clone(fa), Arc::clone(fb));
                Self::vector(name, move |ev| {
                    let a = fa(ev);
                    fb(ev).into_iter().map(|b| op(a, b)).collect()
                })
            }
            (Payload::Vector(fa), Payload::Scalar(fb)) => {
                let (fa, fb) = (Arc::clone(fa), Arc::clone(fb));
                Self::vector(name, move |ev| {
                    let b = fb(ev);
                    fa(ev).into_iter().map(|a| op(a, b)).collect()
                })
            }
            (Payload::Vector(fa), Payload::Vector(fb)) => {
                let (fa, fb) = (Arc::clone(fa), Arc::clone(fb));
                Self::vector(name, move |ev| {
                    let (va, vb) = (fa(ev), fb(ev));
                    va.iter().zip(vb.iter()).map(|(&a, &b)| op(a, b)).collect()
                })
            }
        }
    }

    fn binary(&self, other: &NamedFunc, symbol: &str, op: fn(f64, f64) -> f64) -> Self {
        self.zip_with(other, format!("({}{symbol}{})", self.name, other.name), op)
    }

    fn reduce(&self, label: &str, f: fn(&[f64]) -> f64) -> Self {
        let name = format!("{label}({})", self.name);
        match &self.payload {
            Payload::Scalar(g) => {
                let g = Arc::clone(g);
                Self::scalar(name, move |ev| f(&[g(ev)]))
            }
            Payload::Vector(g) => {
                let g = Arc::clone(g);
                Self::scalar(name, move |ev| f(&g(ev)))
            }
        }
    }

    /// `1` where `self == other`, else `0`.
    pub fn equal(&self, other: impl Into<NamedFunc>) -> Self {
        self.binary(&other.into(), "==", |a, b| flag(a == b))
    }

    /// `1` where `self != other`, else `0`.
    pub fn not_equal(&self, other: impl Into<NamedFunc>) -> Self {
        self.binary(&other.into(), "!=", |a, b| flag(a != b))
    }

    /// `1` where `self < other`, else `0`.
    pub fn less(&self, other: impl Into<NamedFunc>) -> Self {
        self.binary(&other.into(), "<", |a, b| flag(a < b))
    }

    /// `1` where `self <= other`, else `0`.
    pub fn less_equal(&self, other: impl Into<NamedFunc>) -> Self {
        self.binary(&other.into(), "<=", |a, b| flag(a <= b))
    }

    /// `1` where `self > other`, else `0`.
    pub fn greater(&self, other: impl Into<NamedFunc>) -> Self {
        self.binary(&other.into(), ">", |a, b| flag(a > b))
    }

    /// `1` where `self >= other`, else `0`.
    pub fn greater_equal(&self, other: impl Into<NamedFunc>) -> Self {
        self.binary(&other.into(), ">=", |a, b| flag(a >= b))
    }

    /// Logical and of the truth values.
    pub fn and(&self, other: impl Into<NamedFunc>) -> Self {
        self.binary(&other.into(), "&&", |a, b| flag(truthy(a) && truthy(b)))
    }

    /// Logical or of the truth values.
    pub fn or(&self, other: impl Into<NamedFunc>) -> Self {
        self.binary(&other.into(), "||", |a, b| flag(truthy(a) || truthy(b)))
    }

    /// Element-wise power.
    pub fn pow(&self, exponent: impl Into<NamedFunc>) -> Self {
        let exponent = exponent.into();
        self.zip_with(&exponent, format!("pow({},{})", self.name, exponent.name), f64::powf)
    }

    /// Element-wise minimum.
    pub fn min(&self, other: impl Into<NamedFunc>) -> Self {
        let other = other.into();
        self.zip_with(&other, format!("min({},{})", self.name, other.name), f64::min)
    }

    /// Element-wise maximum.
    pub fn max(&self, other: impl Into<NamedFunc>) -> Self {
        let other = other.into();
        self.zip_with(&other, format!("max({},{})", self.name, other.name), f64::max)
    }

    /// Element of a vector expression selected by a scalar index expression.
    ///
    /// # Panics
    /// At evaluation time, if the index is not finite, negative or out of range.
    pub fn at(&self, index: impl Into<NamedFunc>) -> Self {
        let index = index.into();
        let name = format!("{}[{}]", self.name, index.name);
        let source = self.clone();
        Self::scalar(name, move |ev| {
            let i = index.get_scalar(ev);
            let values = source.get_vector(ev);
            if !i.is_finite() || i < 0.0 || i as usize >= values.len() {
                panic!(
                    "index {i} out of range for '{}' with {} elements",
                    source.name,
                    values.len()
                );
            }
            values[i as usize]
        })
    }

    /// Sum of elements.
    pub fn sum(&self) -> Self {
        self.reduce("sum", |v| v.iter().sum())
    }

    /// Number of non-zero elements.
    pub fn count(&self) -> Self {
        self.reduce("count", |v| v.iter().filter(|&&x| truthy(x)).count() as f64)
    }

    /// Largest element, `-inf` for an empty vector.
    pub fn max_of(&self) -> Self {
        self.reduce("maxof", |v| v.iter().copied().fold(f64::NEG_INFINITY, f64::max))
    }

    /// Smallest element, `+inf` for an empty vector.
    pub fn min_of(&self) -> Self {
        self.reduce("minof", |v| v.iter().copied().fold(f64::INFINITY, f64::min))
    }
}

impl From<f64> for NamedFunc {
    fn from(x: f64) -> Self {
        NamedFunc::constant(x)
    }
}

impl From<&NamedFunc> for NamedFunc {
    fn from(f: &NamedFunc) -> Self {
        f.clone()
    }
}

impl fmt::Display for NamedFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl fmt::Debug for NamedFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_scalar() { "scalar" } else { "vector" };
        f.debug_struct("NamedFunc").field("name", &self.name).field("kind", &kind).finish()
    }
}

macro_rules! binary_operator {
    ($trait:ident, $method:ident, $symbol:literal, $op:expr) => {
        impl $trait for NamedFunc {
            type Output = NamedFunc;
            fn $method(self, rhs: NamedFunc) -> NamedFunc {
                self.binary(&rhs, $symbol, $op)
            }
        }

        impl $trait<&NamedFunc> for &NamedFunc {
            type Output = NamedFunc;
            fn $method(self, rhs: &NamedFunc) -> NamedFunc {
                self.binary(rhs, $symbol, $op)
            }
        }

        impl $trait<f64> for NamedFunc {
            type Output = NamedFunc;
            fn $method(self, rhs: f64) -> NamedFunc {
                self.binary(&NamedFunc::constant(rhs), $symbol, $op)
            }
        }
    };
}

binary_operator!(Add, add, "+", |a, b| a + b);
binary_operator!(Sub, sub, "-", |a, b| a - b);
binary_operator!(Mul, mul, "*", |a, b| a * b);
binary_operator!(Div, div, "/", |a, b| a / b);
binary_operator!(Rem, rem, "%", |a, b| a % b);

impl Neg for NamedFunc {
    type Output = NamedFunc;
    fn neg(self) -> NamedFunc {
        let name = format!("-{}", self.name);
        self.map("", |x| -x).with_name(name)
    }
}

impl Not for NamedFunc {
    type Output = NamedFunc;
    fn not(self) -> NamedFunc {
        let name = format!("!{}", self.name);
        self.map("", |x| flag(!truthy(x))).with_name(name)
    }
}
