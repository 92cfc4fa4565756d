//! Selections ("processes").
//!
//! A [`Process`] is a named cut and weight over the events of one or more
//! pooled sources. Building a process resolves its input patterns and acquires
//! every matching source from the [`SourceRegistry`]; dropping it releases
//! them again.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use ys_core::{Result, SourceFactory};
use ys_expr::NamedFunc;

use crate::registry::{ProcessId, PooledSource, SourceRegistry};

/// What a process represents; only renderers care.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessKind {
    /// Simulated background.
    Background,
    /// Simulated signal.
    Signal,
    /// Observed data.
    Data,
}

/// A named selection over pooled event sources.
pub struct Process {
    id: ProcessId,
    name: String,
    kind: ProcessKind,
    cut: NamedFunc,
    weight: NamedFunc,
    sources: Vec<Arc<PooledSource>>,
    registry: Arc<SourceRegistry>,
}

impl Process {
    /// Start building a process.
    pub fn builder(name: impl Into<String>, kind: ProcessKind) -> ProcessBuilder {
        ProcessBuilder {
            name: name.into(),
            kind,
            inputs: Vec::new(),
            cut: NamedFunc::constant(1.0),
            weight: NamedFunc::constant(1.0),
        }
    }

    /// Registry-unique id.
    pub fn id(&self) -> ProcessId {
        self.id
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Process kind.
    pub fn kind(&self) -> ProcessKind {
        self.kind
    }

    /// Event selection.
    pub fn cut(&self) -> &NamedFunc {
        &self.cut
    }

    /// Per-event weight.
    pub fn weight(&self) -> &NamedFunc {
        &self.weight
    }

    /// Pooled sources this process reads.
    pub fn sources(&self) -> &[Arc<PooledSource>] {
        &self.sources
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        let evicted = self.registry.release(self.id);
        tracing::debug!(process = %self.name, evicted, "process released sources");
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("cut", &self.cut)
            .field("weight", &self.weight)
            .field("sources", &self.sources.len())
            .finish()
    }
}

/// Builder returned by [`Process::builder`].
#[derive(Debug)]
pub struct ProcessBuilder {
    name: String,
    kind: ProcessKind,
    inputs: Vec<String>,
    cut: NamedFunc,
    weight: NamedFunc,
}

impl ProcessBuilder {
    /// Add an input pattern.
    pub fn input(mut self, pattern: impl Into<String>) -> Self {
        self.inputs.push(pattern.into());
        self
    }

    /// Add several input patterns.
    pub fn inputs<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs.extend(patterns.into_iter().map(Into::into));
        self
    }

    /// Selection (defaults to pass-all).
    pub fn cut(mut self, cut: impl Into<NamedFunc>) -> Self {
        self.cut = cut.into();
        self
    }

    /// Weight (defaults to 1).
    pub fn weight(mut self, weight: impl Into<NamedFunc>) -> Self {
        self.weight = weight.into();
        self
    }

    /// Resolve inputs and acquire their sources from `registry`.
    ///
    /// A pattern that matches nothing is logged and contributes no source.
    pub fn build(
        self,
        registry: &Arc<SourceRegistry>,
        factory: &dyn SourceFactory,
    ) -> Result<Arc<Process>> {
        let id = registry.next_process_id();
        let mut resolved = BTreeSet::new();
        for pattern in &self.inputs {
            let hits = factory.resolve(std::slice::from_ref(pattern))?;
            if hits.is_empty() {
                tracing::warn!(
                    process = %self.name,
                    pattern = %pattern,
                    "pattern matched no inputs"
                );
            }
            resolved.extend(hits);
        }

        let mut sources = Vec::with_capacity(resolved.len());
        for input in &resolved {
            match registry.acquire(id, factory, input) {
                Ok(s) => sources.push(s),
                Err(e) => {
                    registry.release(id);
                    return Err(e);
                }
            }
        }

        Ok(Arc::new(Process {
            id,
            name: self.name,
            kind: self.kind,
            cut: self.cut,
            weight: self.weight,
            sources,
            registry: Arc::clone(registry),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{ColumnTable, MemoryFactory};

    fn factory() -> MemoryFactory {
        let mut f = MemoryFactory::new("flat");
        for name in ["tt_1", "tt_2", "wj_1"] {
            f.insert(name, ColumnTable::new().with_scalar("met", vec![1.0, 2.0, 3.0]));
        }
        f
    }

    #[test]
    fn processes_share_identical_inputs() {
        let reg = Arc::new(SourceRegistry::new());
        let f = factory();
        let a =
            Process::builder("tt", ProcessKind::Background).input("tt_*").build(&reg, &f).unwrap();
        let b = Process::builder("tt_hi", ProcessKind::Background)
            .input("tt_1")
            .cut(NamedFunc::field("met").greater(1.5))
            .build(&reg, &f)
            .unwrap();
        assert_eq!(a.sources().len(), 2);
        assert_eq!(b.sources().len(), 1);
        assert!(a.sources().iter().any(|s| Arc::ptr_eq(s, &b.sources()[0])));
        assert_eq!(reg.len(), 2);
        assert_ne!(a.id(), b.id());
        assert_eq!(b.cut().name(), "(met>1.5)");
        assert_eq!(a.weight().name(), "1");
    }

    #[test]
    fn dropping_last_user_evicts() {
        let reg = Arc::new(SourceRegistry::new());
        let f = factory();
        let a = Process::builder("all", ProcessKind::Data).input("*").build(&reg, &f).unwrap();
        let b =
            Process::builder("wj", ProcessKind::Background).input("wj_1").build(&reg, &f).unwrap();
        assert_eq!(reg.len(), 3);
        drop(a);
        assert_eq!(reg.len(), 1);
        drop(b);
        assert!(reg.is_empty());
    }

    #[test]
    fn unmatched_pattern_is_not_an_error() {
        let reg = Arc::new(SourceRegistry::new());
        let p = Process::builder("none", ProcessKind::Signal)
            .inputs(["zz_*", "tt_1"])
            .build(&reg, &factory())
            .unwrap();
        assert_eq!(p.sources().len(), 1);
        assert_eq!(p.kind(), ProcessKind::Signal);
    }
}
