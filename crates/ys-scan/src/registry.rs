//! Event-source registry.
//!
//! Sources are keyed by `(schema, resolved input)`. Every selection that needs a
//! given key shares the one [`PooledSource`] opened for it, which is what lets
//! the orchestrator read each physical input exactly once per run. Entries are
//! reference-counted by selection id and evicted as soon as the last selection
//! releases them.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use ys_core::{EventSource, Result, SourceFactory};

/// Identifier handed out to each selection by its registry.
pub type ProcessId = u64;

/// Identity of an event source.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceKey {
    /// Row schema of the source.
    pub schema: String,
    /// Resolved physical input.
    pub input: PathBuf,
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.schema, self.input.display())
    }
}

/// An open event source shared by every selection reading the same input.
pub struct PooledSource {
    key: SourceKey,
    source: Mutex<Box<dyn EventSource>>,
}

impl PooledSource {
    /// Identity of this source.
    pub fn key(&self) -> &SourceKey {
        &self.key
    }

    /// Exclusive access to the underlying row buffers.
    pub fn lock(&self) -> MutexGuard<'_, Box<dyn EventSource>> {
        self.source.lock().expect("event source mutex poisoned")
    }
}

impl fmt::Debug for PooledSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledSource").field("key", &self.key).finish_non_exhaustive()
    }
}

struct SourceEntry {
    source: Arc<PooledSource>,
    processes: BTreeSet<ProcessId>,
}

struct RegistryInner {
    next_process: ProcessId,
    sources: BTreeMap<SourceKey, SourceEntry>,
}

/// Thread-safe pool of open event sources.
pub struct SourceRegistry {
    inner: Mutex<RegistryInner>,
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner { next_process: 0, sources: BTreeMap::new() }),
        }
    }

    fn state(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().expect("source registry mutex poisoned")
    }

    /// Reserve a fresh selection id.
    pub fn next_process_id(&self) -> ProcessId {
        let mut reg = self.state();
        let id = reg.next_process;
        reg.next_process += 1;
        id
    }

    /// Register `process` as a user of `(factory.schema(), input)`.
    ///
    /// Returns the already pooled source when one exists, otherwise opens and
    /// pools a new one. The registry lock is held while opening so concurrent
    /// callers can never open the same key twice.
    pub fn acquire(
        &self,
        process: ProcessId,
        factory: &dyn SourceFactory,
        input: &Path,
    ) -> Result<Arc<PooledSource>> {
        let key = SourceKey { schema: factory.schema().to_string(), input: input.to_path_buf() };
        let mut reg = self.state();

        if let Some(entry) = reg.sources.get_mut(&key) {
            entry.processes.insert(process);
            tracing::debug!(source = %key, process, "event source shared");
            return Ok(Arc::clone(&entry.source));
        }

        let source = factory.open(input)?;
        let rows = source.row_count();
        let pooled = Arc::new(PooledSource { key: key.clone(), source: Mutex::new(source) });
        reg.sources.insert(
            key.clone(),
            SourceEntry { source: Arc::clone(&pooled), processes: BTreeSet::from([process]) },
        );
        tracing::info!(source = %key, rows, "event source opened");
        Ok(pooled)
    }

    /// Drop `process` from every source; sources left unused are evicted.
    ///
    /// Returns the number of evicted sources.
    pub fn release(&self, process: ProcessId) -> usize {
        let mut reg = self.state();
        let mut evicted = Vec::new();
        for (key, entry) in reg.sources.iter_mut() {
            if entry.processes.remove(&process) && entry.processes.is_empty() {
                evicted.push(key.clone());
            }
        }
        for key in &evicted {
            reg.sources.remove(key);
            tracing::info!(evicted = %key, "event source closed");
        }
        evicted.len()
    }

    /// Pooled source for `key`, if open.
    pub fn get(&self, key: &SourceKey) -> Option<Arc<PooledSource>> {
        self.state().sources.get(key).map(|e| Arc::clone(&e.source))
    }

    /// Selections currently referencing `key`.
    pub fn processes_for(&self, key: &SourceKey) -> BTreeSet<ProcessId> {
        self.state().sources.get(key).map(|e| e.processes.clone()).unwrap_or_default()
    }

    /// Keys of all open sources.
    pub fn keys(&self) -> Vec<SourceKey> {
        self.state().sources.keys().cloned().collect()
    }

    /// Number of open sources.
    pub fn len(&self) -> usize {
        self.state().sources.len()
    }

    /// True if no source is open.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
