//! Pluggable expression backends.
//!
//! Closures built in code are the primary way to describe cuts and weights.
//! Backends turn configuration text into the same [`NamedFunc`] values so the
//! scan engine never depends on a particular formula language.

use ys_core::Result;

use crate::named_func::NamedFunc;

/// Compiles textual expressions into [`NamedFunc`]s.
pub trait ExpressionBackend: Send + Sync {
    /// Compile `text`. Malformed text is a construction-time error.
    fn compile(&self, text: &str) -> Result<NamedFunc>;

    /// Compile an optional expression, falling back to the constant `default`.
    fn compile_or(&self, text: Option<&str>, default: f64) -> Result<NamedFunc> {
        match text {
            Some(t) if !t.trim().is_empty() => self.compile(t),
            _ => Ok(NamedFunc::constant(default)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ys_core::Error;

    struct ConstantsOnly;

    impl ExpressionBackend for ConstantsOnly {
        fn compile(&self, text: &str) -> Result<NamedFunc> {
            text.trim()
                .parse::<f64>()
                .map(NamedFunc::constant)
                .map_err(|_| Error::Expression(format!("not a number: '{text}'")))
        }
    }

    #[test]
    fn compile_or_defaults() {
        let b = ConstantsOnly;
        assert_eq!(b.compile_or(None, 1.0).unwrap().name(), "1");
        assert_eq!(b.compile_or(Some("  "), 1.0).unwrap().name(), "1");
        assert_eq!(b.compile_or(Some("2.5"), 1.0).unwrap().name(), "2.5");
        assert!(b.compile_or(Some("met"), 1.0).is_err());
    }
}
