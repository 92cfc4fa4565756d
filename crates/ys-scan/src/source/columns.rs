//! Column-store event sources.
//!
//! A [`ColumnTable`] holds whole columns in memory: scalar columns are one
//! `f64` per row, vector columns one `Vec<f64>` per row. Two factories serve
//! them: [`MemoryFactory`] for tables built in code, and [`JsonColumnsFactory`]
//! for files of the form
//!
//! ```json
//! {"columns": {"met": [120.0, 340.5], "jets_pt": [[50.0, 31.2], []]}}
//! ```

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use ys_core::{Error, Event, EventSource, FieldKind, Result, SourceFactory};

/// In-memory columns of one input.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnTable {
    scalars: HashMap<String, Vec<f64>>,
    vectors: HashMap<String, Vec<Vec<f64>>>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum ColumnData {
    Scalar(Vec<f64>),
    Vector(Vec<Vec<f64>>),
}

#[derive(Debug, Serialize, Deserialize)]
struct ColumnFile {
    columns: BTreeMap<String, ColumnData>,
}

impl ColumnTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a scalar column.
    pub fn with_scalar(mut self, name: impl Into<String>, values: Vec<f64>) -> Self {
        self.scalars.insert(name.into(), values);
        self
    }

    /// Add a vector column.
    pub fn with_vector(mut self, name: impl Into<String>, values: Vec<Vec<f64>>) -> Self {
        self.vectors.insert(name.into(), values);
        self
    }

    /// Number of rows (0 for a table without columns).
    pub fn row_count(&self) -> usize {
        self.scalars
            .values()
            .map(Vec::len)
            .chain(self.vectors.values().map(Vec::len))
            .next()
            .unwrap_or(0)
    }

    /// Declared fields, sorted by name.
    pub fn fields(&self) -> Vec<(String, FieldKind)> {
        let mut out: Vec<(String, FieldKind)> = self
            .scalars
            .keys()
            .map(|k| (k.clone(), FieldKind::Scalar))
            .chain(self.vectors.keys().map(|k| (k.clone(), FieldKind::Vector)))
            .collect();
        out.sort();
        out
    }

    /// Check that every column has the same number of rows.
    pub fn validate(&self) -> Result<()> {
        let n = self.row_count();
        let lengths = self
            .scalars
            .iter()
            .map(|(k, v)| (k, v.len()))
            .chain(self.vectors.iter().map(|(k, v)| (k, v.len())));
        for (name, len) in lengths {
            if len != n {
                return Err(Error::Source(format!(
                    "column '{name}' has {len} rows, expected {n}"
                )));
            }
        }
        Ok(())
    }

    /// Parse the JSON column format.
    ///
    /// Empty arrays are ambiguous; `kinds` decides which columns are vectors.
    pub fn from_json(text: &str, kinds: &HashMap<String, FieldKind>) -> Result<Self> {
        let file: ColumnFile = serde_json::from_str(text)?;
        let mut table = Self::new();
        for (name, data) in file.columns {
            match (data, kinds.get(&name)) {
                (ColumnData::Scalar(v), Some(FieldKind::Vector)) if v.is_empty() => {
                    table.vectors.insert(name, Vec::new());
                }
                (ColumnData::Scalar(v), _) => {
                    table.scalars.insert(name, v);
                }
                (ColumnData::Vector(v), _) => {
                    table.vectors.insert(name, v);
                }
            }
        }
        table.validate()?;
        Ok(table)
    }

    /// Serialize to the JSON column format.
    pub fn to_json(&self) -> Result<String> {
        let mut columns = BTreeMap::new();
        for (k, v) in &self.scalars {
            columns.insert(k.clone(), ColumnData::Scalar(v.clone()));
        }
        for (k, v) in &self.vectors {
            columns.insert(k.clone(), ColumnData::Vector(v.clone()));
        }
        Ok(serde_json::to_string(&ColumnFile { columns })?)
    }

    fn check_fields(&self, input: &Path, fields: &[(String, FieldKind)]) -> Result<()> {
        for (name, kind) in fields {
            let present = match kind {
                FieldKind::Scalar => self.scalars.contains_key(name),
                FieldKind::Vector => self.vectors.contains_key(name),
            };
            if !present {
                return Err(Error::Source(format!(
                    "{}: missing {kind:?} column '{name}'",
                    input.display()
                )));
            }
        }
        Ok(())
    }
}

/// Event source reading one [`ColumnTable`].
#[derive(Debug)]
pub struct ColumnSource {
    table: Arc<ColumnTable>,
    current: usize,
}

impl ColumnSource {
    /// Source positioned before the first row.
    pub fn new(table: Arc<ColumnTable>) -> Self {
        Self { table, current: 0 }
    }
}

impl Event for ColumnSource {
    fn scalar(&self, name: &str) -> Option<f64> {
        self.table.scalars.get(name).and_then(|c| c.get(self.current).copied())
    }

    fn vector(&self, name: &str) -> Option<&[f64]> {
        self.table.vectors.get(name).and_then(|c| c.get(self.current)).map(Vec::as_slice)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl EventSource for ColumnSource {
    fn row_count(&self) -> u64 {
        self.table.row_count() as u64
    }

    fn load_row(&mut self, index: u64) -> Result<()> {
        if index >= self.row_count() {
            return Err(Error::Source(format!(
                "row {index} out of range ({} rows)",
                self.row_count()
            )));
        }
        self.current = index as usize;
        Ok(())
    }

    fn event(&self) -> &dyn Event {
        self
    }
}

/// Factory over named in-memory tables; patterns match table names.
#[derive(Debug, Clone)]
pub struct MemoryFactory {
    schema: String,
    tables: BTreeMap<PathBuf, Arc<ColumnTable>>,
}

impl MemoryFactory {
    /// Empty factory for `schema`.
    pub fn new(schema: impl Into<String>) -> Self {
        Self { schema: schema.into(), tables: BTreeMap::new() }
    }

    /// Register a table under `name`.
    pub fn insert(&mut self, name: impl Into<PathBuf>, table: ColumnTable) {
        self.tables.insert(name.into(), Arc::new(table));
    }
}

impl SourceFactory for MemoryFactory {
    fn schema(&self) -> &str {
        &self.schema
    }

    fn fields(&self) -> Vec<(String, FieldKind)> {
        let all: BTreeSet<(String, FieldKind)> =
            self.tables.values().flat_map(|t| t.fields()).collect();
        all.into_iter().collect()
    }

    fn resolve(&self, patterns: &[String]) -> Result<BTreeSet<PathBuf>> {
        let mut out = BTreeSet::new();
        for p in patterns {
            let pattern = glob::Pattern::new(p)
                .map_err(|e| Error::Config(format!("bad pattern '{p}': {e}")))?;
            out.extend(
                self.tables.keys().filter(|k| pattern.matches_path(k.as_path())).cloned(),
            );
        }
        Ok(out)
    }

    fn open(&self, input: &Path) -> Result<Box<dyn EventSource>> {
        let table = self
            .tables
            .get(input)
            .ok_or_else(|| Error::Source(format!("no table named '{}'", input.display())))?;
        table.validate()?;
        Ok(Box::new(ColumnSource::new(Arc::clone(table))))
    }
}

/// Factory reading JSON column files from disk.
#[derive(Debug, Clone)]
pub struct JsonColumnsFactory {
    schema: String,
    fields: Vec<(String, FieldKind)>,
}

impl JsonColumnsFactory {
    /// Factory for files that must provide at least `fields`.
    pub fn new(schema: impl Into<String>, fields: Vec<(String, FieldKind)>) -> Self {
        Self { schema: schema.into(), fields }
    }
}

impl SourceFactory for JsonColumnsFactory {
    fn schema(&self) -> &str {
        &self.schema
    }

    fn fields(&self) -> Vec<(String, FieldKind)> {
        self.fields.clone()
    }

    fn resolve(&self, patterns: &[String]) -> Result<BTreeSet<PathBuf>> {
        let mut out = BTreeSet::new();
        for p in patterns {
            let paths =
                glob::glob(p).map_err(|e| Error::Config(format!("bad pattern '{p}': {e}")))?;
            for entry in paths {
                match entry {
                    Ok(path) => {
                        let real = std::fs::canonicalize(&path).map_err(|e| {
                            Error::Source(format!("cannot resolve {}: {e}", path.display()))
                        })?;
                        out.insert(real);
                    }
                    Err(e) => tracing::warn!(pattern = %p, error = %e, "unreadable glob match"),
                }
            }
        }
        Ok(out)
    }

    fn open(&self, input: &Path) -> Result<Box<dyn EventSource>> {
        let text = std::fs::read_to_string(input)?;
        let kinds: HashMap<String, FieldKind> = self.fields.iter().cloned().collect();
        let table = ColumnTable::from_json(&text, &kinds)
            .map_err(|e| Error::Source(format!("{}: {e}", input.display())))?;
        table.check_fields(input, &self.fields)?;
        Ok(Box::new(ColumnSource::new(Arc::new(table))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ColumnTable {
        ColumnTable::new()
            .with_scalar("met", vec![100.0, 250.0, 400.0])
            .with_vector("jets_pt", vec![vec![50.0, 20.0], vec![], vec![80.0]])
    }

    #[test]
    fn column_source_reads_rows() {
        let mut src = ColumnSource::new(Arc::new(sample()));
        assert_eq!(src.row_count(), 3);
        src.load_row(1).unwrap();
        assert_eq!(src.event().scalar("met"), Some(250.0));
        assert_eq!(src.event().vector("jets_pt"), Some(&[][..]));
        src.load_row(2).unwrap();
        assert_eq!(src.event().vector("jets_pt"), Some(&[80.0][..]));
        assert!(src.load_row(3).is_err());
    }

    #[test]
    fn ragged_columns_fail_validation() {
        let t = ColumnTable::new().with_scalar("a", vec![1.0]).with_scalar("b", vec![1.0, 2.0]);
        assert!(matches!(t.validate(), Err(Error::Source(_))));
    }

    #[test]
    fn json_roundtrip_keeps_empty_vectors() {
        let t = ColumnTable::new().with_scalar("met", vec![]).with_vector("jets_pt", vec![]);
        let kinds = HashMap::from([("jets_pt".to_string(), FieldKind::Vector)]);
        let back = ColumnTable::from_json(&t.to_json().unwrap(), &kinds).unwrap();
        assert_eq!(back, t);

        let full = sample();
        let back = ColumnTable::from_json(&full.to_json().unwrap(), &HashMap::new()).unwrap();
        assert_eq!(back, full);
    }

    #[test]
    fn memory_factory_resolves_globs() {
        let mut f = MemoryFactory::new("flat");
        f.insert("ttbar_1.json", sample());
        f.insert("ttbar_2.json", sample());
        f.insert("wjets.json", sample());
        let hits = f.resolve(&["ttbar_*.json".to_string()]).unwrap();
        assert_eq!(hits.len(), 2);
        assert!(f.resolve(&["nothing*".to_string()]).unwrap().is_empty());
        assert!(f.resolve(&["[".to_string()]).is_err());
        assert_eq!(
            f.fields(),
            vec![("jets_pt".to_string(), FieldKind::Vector), ("met".to_string(), FieldKind::Scalar)]
        );
    }
}
