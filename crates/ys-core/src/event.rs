//! Contracts between the scan engine and the row stores it reads.
//!
//! The engine never knows the physical layout of an event store. It asks a
//! [`SourceFactory`] to resolve input patterns and open one [`EventSource`] per
//! physical input, then drives `row_count` / `load_row` and hands the loaded
//! row to expressions as `&dyn Event`.

use std::any::Any;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::Result;

/// Shape of a named per-row field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldKind {
    /// One number per row.
    Scalar,
    /// A variable-length sequence of numbers per row.
    Vector,
}

/// The currently loaded row of an event source.
///
/// Accessors are only meaningful after [`EventSource::load_row`]. A `None`
/// means the field does not exist in this schema; how to react is up to the
/// caller (expressions treat it as a contract violation).
pub trait Event {
    /// Scalar field value for the loaded row.
    fn scalar(&self, name: &str) -> Option<f64>;

    /// Vector field value for the loaded row.
    fn vector(&self, name: &str) -> Option<&[f64]>;

    /// Downcast hook for closures that want typed access to a concrete schema.
    fn as_any(&self) -> &dyn Any;
}

/// A row store opened on exactly one physical input.
pub trait EventSource: Send {
    /// Number of rows in the store.
    fn row_count(&self) -> u64;

    /// Seek to `index` and decode it into the internal row buffers.
    fn load_row(&mut self, index: u64) -> Result<()>;

    /// View of the row loaded by the last `load_row` call.
    fn event(&self) -> &dyn Event;
}

/// Opens event sources of one row schema.
///
/// Two sources are the same source iff they share `schema()` and resolved
/// input path; the registry relies on this to scan each input once.
pub trait SourceFactory: Send + Sync {
    /// Stable identifier of the row schema produced by this factory.
    fn schema(&self) -> &str;

    /// Declared fields of the schema, used by textual expression backends.
    fn fields(&self) -> Vec<(String, FieldKind)>;

    /// Resolve input patterns to concrete physical inputs.
    ///
    /// Patterns that match nothing contribute nothing; that is not an error.
    /// File-backed factories return canonical paths, so different spellings
    /// of one file resolve to the same input.
    fn resolve(&self, patterns: &[String]) -> Result<BTreeSet<PathBuf>>;

    /// Open a source on one resolved input.
    fn open(&self, input: &Path) -> Result<Box<dyn EventSource>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Flat {
        values: Vec<f64>,
        current: usize,
    }

    impl Event for Flat {
        fn scalar(&self, name: &str) -> Option<f64> {
            (name == "x").then(|| self.values[self.current])
        }

        fn vector(&self, _name: &str) -> Option<&[f64]> {
            None
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    impl EventSource for Flat {
        fn row_count(&self) -> u64 {
            self.values.len() as u64
        }

        fn load_row(&mut self, index: u64) -> Result<()> {
            self.current = index as usize;
            Ok(())
        }

        fn event(&self) -> &dyn Event {
            self
        }
    }

    #[test]
    fn load_then_read() {
        let mut src = Flat { values: vec![1.0, 2.0, 3.0], current: 0 };
        assert_eq!(src.row_count(), 3);
        src.load_row(2).unwrap();
        assert_eq!(src.event().scalar("x"), Some(3.0));
        assert_eq!(src.event().scalar("y"), None);
        assert!(src.event().as_any().downcast_ref::<Flat>().is_some());
    }
}
