//! Run file v0 (YAML) parsing and semantic validation.
//!
//! Validation compiles every expression and resolves every cross-reference
//! into a [`RunPlan`] without touching any input file.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use ys_core::FieldKind;
use ys_expr::{ExpressionBackend, FormulaBackend, NamedFunc};
use ys_scan::{Axis, ProcessKind, TableRow};
use ys_stats::{ToyConfig, ToyMode};

pub const RUN_V0: &str = "yieldscan_run_v0";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfigV0 {
    pub schema_version: String,
    #[serde(default = "default_luminosity")]
    pub luminosity: f64,
    /// Relative paths are taken from the run file's directory.
    #[serde(default = "default_out_dir")]
    pub out_dir: PathBuf,
    #[serde(default)]
    pub subdir: String,
    #[serde(default)]
    pub execution: Execution,
    pub source: SourceSection,
    pub processes: Vec<ProcessEntry>,
    #[serde(default)]
    pub tables: Vec<TableEntry>,
    #[serde(default)]
    pub histograms: Vec<HistEntry>,
    #[serde(default)]
    pub hist2d: Vec<Hist2DEntry>,
    #[serde(default)]
    pub event_scans: Vec<EventScanEntry>,
    #[serde(default)]
    pub kappas: Vec<KappaEntry>,
}

fn default_luminosity() -> f64 {
    1.0
}

fn default_out_dir() -> PathBuf {
    PathBuf::from("plots")
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Execution {
    /// Worker threads (0 = auto).
    #[serde(default)]
    pub threads: usize,
    #[serde(default = "default_true")]
    pub multithreaded: bool,
    #[serde(default)]
    pub min_print: bool,
}

impl Default for Execution {
    fn default() -> Self {
        Self { threads: 0, multithreaded: true, min_print: false }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceSection {
    #[serde(default = "default_schema")]
    pub schema: String,
    pub fields: BTreeMap<String, FieldDecl>,
}

fn default_schema() -> String {
    "json_columns".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldDecl {
    Scalar,
    Vector,
}

impl From<FieldDecl> for FieldKind {
    fn from(d: FieldDecl) -> Self {
        match d {
            FieldDecl::Scalar => FieldKind::Scalar,
            FieldDecl::Vector => FieldKind::Vector,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessEntry {
    pub name: String,
    pub kind: ProcessKind,
    pub inputs: Vec<String>,
    #[serde(default)]
    pub cut: Option<String>,
    #[serde(default)]
    pub weight: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableEntry {
    pub name: String,
    /// Empty means every process.
    #[serde(default)]
    pub processes: Vec<String>,
    pub rows: Vec<RowEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RowEntry {
    pub label: String,
    #[serde(default)]
    pub cut: Option<String>,
    #[serde(default)]
    pub weight: Option<String>,
    #[serde(default)]
    pub separator: bool,
    #[serde(default)]
    pub lines_before: usize,
    #[serde(default)]
    pub lines_after: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HistEntry {
    pub name: String,
    pub variable: String,
    #[serde(default)]
    pub edges: Option<Vec<f64>>,
    #[serde(default)]
    pub bins: Option<usize>,
    #[serde(default)]
    pub low: Option<f64>,
    #[serde(default)]
    pub high: Option<f64>,
    #[serde(default)]
    pub cut: Option<String>,
    #[serde(default)]
    pub weight: Option<String>,
    #[serde(default)]
    pub processes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AxisEntry {
    pub variable: String,
    #[serde(default)]
    pub edges: Option<Vec<f64>>,
    #[serde(default)]
    pub bins: Option<usize>,
    #[serde(default)]
    pub low: Option<f64>,
    #[serde(default)]
    pub high: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Hist2DEntry {
    pub name: String,
    pub x: AxisEntry,
    pub y: AxisEntry,
    #[serde(default)]
    pub cut: Option<String>,
    #[serde(default)]
    pub weight: Option<String>,
    #[serde(default)]
    pub max_points: Option<usize>,
    #[serde(default)]
    pub processes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventScanEntry {
    pub name: String,
    #[serde(default)]
    pub cut: Option<String>,
    pub columns: Vec<String>,
    #[serde(default = "default_precision")]
    pub precision: usize,
    #[serde(default)]
    pub processes: Vec<String>,
}

fn default_precision() -> usize {
    2
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KappaEntry {
    pub name: String,
    pub table: String,
    #[serde(default)]
    pub toys: ToyConfig,
    pub observables: Vec<ObservableEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObservableEntry {
    pub row: RowRef,
    /// Empty means every background process of the table (data processes in
    /// data mode).
    #[serde(default)]
    pub processes: Vec<String>,
    #[serde(default = "default_power")]
    pub power: f64,
}

fn default_power() -> f64 {
    1.0
}

/// A table row, by position or by label.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RowRef {
    Index(usize),
    Label(String),
}

pub fn read_run_config(path: &Path) -> Result<RunConfigV0> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;

    let doc: serde_yaml_ng::Value = serde_yaml_ng::from_slice(&bytes)?;
    let schema_version = doc.get("schema_version").and_then(|v| v.as_str());
    match schema_version {
        Some(RUN_V0) => {}
        Some(other) => anyhow::bail!("unsupported schema_version: {other} (expected {RUN_V0})"),
        None => anyhow::bail!("missing schema_version (expected {RUN_V0})"),
    }
    Ok(serde_yaml_ng::from_slice(&bytes)?)
}

#[derive(Debug, Clone)]
pub struct RunPlan {
    pub luminosity: f64,
    pub out_dir: PathBuf,
    pub subdir: String,
    pub threads: usize,
    pub multithreaded: bool,
    pub min_print: bool,
    pub schema: String,
    pub fields: Vec<(String, FieldKind)>,
    pub processes: Vec<ProcessPlan>,
    pub tables: Vec<TablePlan>,
    pub histograms: Vec<HistPlan>,
    pub hist2d: Vec<Hist2DPlan>,
    pub event_scans: Vec<EventScanPlan>,
    pub kappas: Vec<KappaPlan>,
}

#[derive(Debug, Clone)]
pub struct ProcessPlan {
    pub name: String,
    pub kind: ProcessKind,
    pub inputs: Vec<String>,
    pub cut: NamedFunc,
    pub weight: NamedFunc,
}

#[derive(Debug, Clone)]
pub struct TablePlan {
    pub name: String,
    /// Indices into [`RunPlan::processes`].
    pub processes: Vec<usize>,
    pub rows: Vec<TableRow>,
}

#[derive(Debug, Clone)]
pub struct HistPlan {
    pub name: String,
    pub axis: Axis,
    pub cut: NamedFunc,
    pub weight: NamedFunc,
    pub processes: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct Hist2DPlan {
    pub name: String,
    pub x: Axis,
    pub y: Axis,
    pub cut: NamedFunc,
    pub weight: NamedFunc,
    pub max_points: Option<usize>,
    pub processes: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct EventScanPlan {
    pub name: String,
    pub cut: NamedFunc,
    pub columns: Vec<NamedFunc>,
    pub precision: usize,
    pub processes: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct KappaPlan {
    pub name: String,
    /// Index into [`RunPlan::tables`].
    pub table: usize,
    pub toys: ToyConfig,
    pub observables: Vec<ObservablePlan>,
}

#[derive(Debug, Clone)]
pub struct ObservablePlan {
    pub row: usize,
    pub processes: Vec<usize>,
    pub power: f64,
}

fn find_dup<'a>(names: impl IntoIterator<Item = &'a str>) -> Option<&'a str> {
    let mut seen = HashSet::new();
    names.into_iter().find(|n| !seen.insert(*n))
}

fn build_axis(
    owner: &str,
    variable: NamedFunc,
    edges: &Option<Vec<f64>>,
    bins: Option<usize>,
    low: Option<f64>,
    high: Option<f64>,
) -> Result<Axis> {
    match (edges, bins, low, high) {
        (Some(edges), None, None, None) => Axis::from_edges(edges.clone(), variable),
        (None, Some(bins), Some(low), Some(high)) => Axis::uniform(bins, low, high, variable),
        _ => anyhow::bail!("{owner}: give either edges or bins/low/high"),
    }
    .with_context(|| format!("{owner}: invalid binning"))
}

fn resolve_path(base_dir: &Path, p: &Path) -> PathBuf {
    if p.is_absolute() { p.to_path_buf() } else { base_dir.join(p) }
}

impl RunConfigV0 {
    /// Validate and compile into a [`RunPlan`]; `base_dir` anchors relative paths.
    pub fn to_run_plan(&self, base_dir: &Path) -> Result<RunPlan> {
        if self.schema_version != RUN_V0 {
            anyhow::bail!("unsupported schema_version: {}", self.schema_version);
        }
        if !(self.luminosity.is_finite() && self.luminosity > 0.0) {
            anyhow::bail!("luminosity must be finite and > 0, got {}", self.luminosity);
        }
        if self.source.fields.is_empty() {
            anyhow::bail!("source.fields must be non-empty");
        }
        if self.processes.is_empty() {
            anyhow::bail!("processes must be non-empty");
        }
        if let Some(dup) = find_dup(self.processes.iter().map(|p| p.name.as_str())) {
            anyhow::bail!("duplicate process name: {dup}");
        }
        let figure_names = self
            .tables
            .iter()
            .map(|t| t.name.as_str())
            .chain(self.histograms.iter().map(|h| h.name.as_str()))
            .chain(self.hist2d.iter().map(|h| h.name.as_str()))
            .chain(self.event_scans.iter().map(|e| e.name.as_str()));
        if let Some(dup) = find_dup(figure_names) {
            anyhow::bail!("duplicate figure name: {dup}");
        }
        if let Some(dup) = find_dup(self.kappas.iter().map(|k| k.name.as_str())) {
            anyhow::bail!("duplicate kappa name: {dup}");
        }

        let fields: Vec<(String, FieldKind)> =
            self.source.fields.iter().map(|(n, d)| (n.clone(), (*d).into())).collect();
        let backend = FormulaBackend::new(fields.iter().cloned());
        let compile = |what: &str, text: Option<&str>, default: f64| -> Result<NamedFunc> {
            backend
                .compile_or(text, default)
                .with_context(|| format!("{what}: invalid expression"))
        };

        let process_index: HashMap<&str, usize> =
            self.processes.iter().enumerate().map(|(i, p)| (p.name.as_str(), i)).collect();
        let lookup = |owner: &str, names: &[String]| -> Result<Vec<usize>> {
            if names.is_empty() {
                return Ok((0..self.processes.len()).collect());
            }
            names
                .iter()
                .map(|n| {
                    process_index
                        .get(n.as_str())
                        .copied()
                        .ok_or_else(|| anyhow::anyhow!("{owner}: unknown process '{n}'"))
                })
                .collect()
        };

        let mut processes = Vec::with_capacity(self.processes.len());
        for p in &self.processes {
            if p.inputs.is_empty() {
                anyhow::bail!("process '{}' inputs must be non-empty", p.name);
            }
            let inputs = p
                .inputs
                .iter()
                .map(|i| resolve_path(base_dir, Path::new(i)).to_string_lossy().into_owned())
                .collect();
            processes.push(ProcessPlan {
                name: p.name.clone(),
                kind: p.kind,
                inputs,
                cut: compile(&format!("process '{}' cut", p.name), p.cut.as_deref(), 1.0)?,
                weight: compile(
                    &format!("process '{}' weight", p.name),
                    p.weight.as_deref(),
                    1.0,
                )?,
            });
        }

        let mut tables = Vec::with_capacity(self.tables.len());
        for t in &self.tables {
            let owner = format!("table '{}'", t.name);
            if t.rows.is_empty() {
                anyhow::bail!("{owner} rows must be non-empty");
            }
            let mut rows = Vec::with_capacity(t.rows.len());
            for r in &t.rows {
                let row = if r.separator {
                    if r.cut.is_some() || r.weight.is_some() {
                        anyhow::bail!(
                            "{owner}: separator row '{}' cannot have a cut or weight",
                            r.label
                        );
                    }
                    TableRow::separator(&r.label)
                } else {
                    let what = format!("{owner} row '{}'", r.label);
                    TableRow::new(&r.label, compile(&what, r.cut.as_deref(), 1.0)?)
                        .with_weight(compile(&what, r.weight.as_deref(), 1.0)?)
                };
                rows.push(row.with_lines(r.lines_before, r.lines_after));
            }
            let procs = lookup(&owner, &t.processes)?;
            tables.push(TablePlan { name: t.name.clone(), processes: procs, rows });
        }

        let mut histograms = Vec::with_capacity(self.histograms.len());
        for h in &self.histograms {
            let owner = format!("histogram '{}'", h.name);
            let variable = compile(&format!("{owner} variable"), Some(h.variable.as_str()), 0.0)?;
            let axis = build_axis(&owner, variable, &h.edges, h.bins, h.low, h.high)?;
            histograms.push(HistPlan {
                name: h.name.clone(),
                axis,
                cut: compile(&format!("{owner} cut"), h.cut.as_deref(), 1.0)?,
                weight: compile(&format!("{owner} weight"), h.weight.as_deref(), 1.0)?,
                processes: lookup(&owner, &h.processes)?,
            });
        }

        let mut hist2d = Vec::with_capacity(self.hist2d.len());
        for h in &self.hist2d {
            let owner = format!("2d histogram '{}'", h.name);
            let mut axes = Vec::with_capacity(2);
            for (label, a) in [("x", &h.x), ("y", &h.y)] {
                let what = format!("{owner} {label}");
                let variable =
                    compile(&format!("{what} variable"), Some(a.variable.as_str()), 0.0)?;
                axes.push(build_axis(&what, variable, &a.edges, a.bins, a.low, a.high)?);
            }
            let y = axes.pop().ok_or_else(|| anyhow::anyhow!("{owner}: missing y axis"))?;
            let x = axes.pop().ok_or_else(|| anyhow::anyhow!("{owner}: missing x axis"))?;
            if h.max_points == Some(0) {
                anyhow::bail!("{owner}: max_points must be > 0");
            }
            hist2d.push(Hist2DPlan {
                name: h.name.clone(),
                x,
                y,
                cut: compile(&format!("{owner} cut"), h.cut.as_deref(), 1.0)?,
                weight: compile(&format!("{owner} weight"), h.weight.as_deref(), 1.0)?,
                max_points: h.max_points,
                processes: lookup(&owner, &h.processes)?,
            });
        }

        let mut event_scans = Vec::with_capacity(self.event_scans.len());
        for e in &self.event_scans {
            let owner = format!("event scan '{}'", e.name);
            if e.columns.is_empty() {
                anyhow::bail!("{owner} columns must be non-empty");
            }
            let columns = e
                .columns
                .iter()
                .map(|c| {
                    compile(&format!("{owner} column '{c}'"), Some(c.as_str()), 0.0)
                        .map(|f| f.with_name(c.as_str()))
                })
                .collect::<Result<Vec<_>>>()?;
            event_scans.push(EventScanPlan {
                name: e.name.clone(),
                cut: compile(&format!("{owner} cut"), e.cut.as_deref(), 1.0)?,
                columns,
                precision: e.precision,
                processes: lookup(&owner, &e.processes)?,
            });
        }

        let mut kappas = Vec::with_capacity(self.kappas.len());
        for k in &self.kappas {
            let owner = format!("kappa '{}'", k.name);
            let table = self
                .tables
                .iter()
                .position(|t| t.name == k.table)
                .ok_or_else(|| anyhow::anyhow!("{owner}: unknown table '{}'", k.table))?;
            let plan = &tables[table];
            if k.observables.is_empty() {
                anyhow::bail!("{owner} observables must be non-empty");
            }
            if k.toys.n_toys == 0 {
                anyhow::bail!("{owner}: toys.n_toys must be > 0");
            }
            if !(k.toys.central_mass > 0.0 && k.toys.central_mass <= 1.0) {
                anyhow::bail!("{owner}: toys.central_mass must be in (0, 1]");
            }
            let wanted = match k.toys.mode {
                ToyMode::Mc => ProcessKind::Background,
                ToyMode::Data => ProcessKind::Data,
            };
            let mut observables = Vec::with_capacity(k.observables.len());
            for (i, o) in k.observables.iter().enumerate() {
                let row = match &o.row {
                    RowRef::Index(idx) => *idx,
                    RowRef::Label(label) => plan
                        .rows
                        .iter()
                        .position(|r| r.label() == label)
                        .ok_or_else(|| anyhow::anyhow!("{owner}: unknown row '{label}'"))?,
                };
                if row >= plan.rows.len() {
                    anyhow::bail!(
                        "{owner}: row index {row} out of range (table has {} rows)",
                        plan.rows.len()
                    );
                }
                if !plan.rows[row].is_data_row() {
                    anyhow::bail!("{owner}: row {row} is a separator");
                }
                if !o.power.is_finite() {
                    anyhow::bail!("{owner}: observable {i} power must be finite");
                }
                let procs = if o.processes.is_empty() {
                    plan.processes
                        .iter()
                        .copied()
                        .filter(|&p| processes[p].kind == wanted)
                        .collect()
                } else {
                    let procs = lookup(&owner, &o.processes)?;
                    if let Some(&p) = procs.iter().find(|p| !plan.processes.contains(p)) {
                        anyhow::bail!(
                            "{owner}: process '{}' is not in table '{}'",
                            processes[p].name,
                            k.table
                        );
                    }
                    procs
                };
                if procs.is_empty() {
                    anyhow::bail!("{owner}: observable {i} selects no processes");
                }
                observables.push(ObservablePlan { row, processes: procs, power: o.power });
            }
            kappas.push(KappaPlan {
                name: k.name.clone(),
                table,
                toys: k.toys.clone(),
                observables,
            });
        }

        Ok(RunPlan {
            luminosity: self.luminosity,
            out_dir: resolve_path(base_dir, &self.out_dir),
            subdir: self.subdir.clone(),
            threads: self.execution.threads,
            multithreaded: self.execution.multithreaded,
            min_print: self.execution.min_print,
            schema: self.source.schema.clone(),
            fields,
            processes,
            tables,
            histograms,
            hist2d,
            event_scans,
            kappas,
        })
    }
}
