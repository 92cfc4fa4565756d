//! Per-event dumps of selected columns.
//!
//! Every event passing `scan cut && process cut` produces one line per
//! instance: scalar columns repeat on each line, vector columns print their
//! i-th element (blank once exhausted). A vector cut limits the instances to
//! its length and skips the elements it rejects. One text file is written per
//! process.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use ys_core::{Event, Result};
use ys_expr::NamedFunc;

use crate::figure::{Accumulate, Component, Figure, FigureComponent, output_path};
use crate::process::Process;

/// Printed rows between repeated headers.
const HEADER_EVERY: u64 = 8;

struct ScanDef {
    cut: NamedFunc,
    columns: Vec<NamedFunc>,
    precision: usize,
}

/// One printed line of a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanLine {
    /// Index of the event among those printed for this process.
    pub row: u64,
    /// Element index within the event.
    pub instance: usize,
    /// Column values; `None` where a vector column has no such element.
    pub values: Vec<Option<f64>>,
}

/// Lines collected for one process of an [`EventScan`].
#[derive(Clone)]
pub struct ScanLines {
    def: Arc<ScanDef>,
    cut: NamedFunc,
    /// Events that printed at least one line.
    pub rows: u64,
    /// Collected lines, in recording order.
    pub lines: Vec<ScanLine>,
}

enum Column {
    Scalar(f64),
    Vector(Vec<f64>),
}

impl ScanLines {
    fn new(def: Arc<ScanDef>, process: &Process) -> Self {
        let cut = def.cut.and(process.cut());
        Self { def, cut, rows: 0, lines: Vec::new() }
    }

    /// Plain-text rendering with a header every few rows.
    pub fn render(&self) -> String {
        let width = self.def.precision + 6;
        let precision = self.def.precision;
        let mut header = format!("{:>9} {:>8}", "Row", "Instance");
        for c in &self.def.columns {
            let name: String = c.name().chars().take(width).collect();
            let _ = write!(header, " {name:>width$}");
        }

        let mut out = String::new();
        let mut last_row = None;
        let mut printed = 0u64;
        for line in &self.lines {
            if last_row != Some(line.row) {
                if printed % HEADER_EVERY == 0 {
                    let _ = writeln!(out, "{header}");
                }
                printed += 1;
                last_row = Some(line.row);
            }
            let _ = write!(out, "{:>9} {:>8}", line.row, line.instance);
            for v in &line.values {
                match v {
                    Some(x) => {
                        let _ = write!(out, " {x:>width$.precision$}");
                    }
                    None => {
                        let _ = write!(out, " {:>width$}", "");
                    }
                }
            }
            out.push('\n');
        }
        out
    }
}

impl Accumulate for ScanLines {
    fn record(&mut self, _process: &Process, event: &dyn Event) {
        let cut = if self.cut.is_scalar() {
            if !self.cut.passes(event) {
                return;
            }
            None
        } else {
            Some(self.cut.get_vector(event))
        };
        let columns: Vec<Column> = self
            .def
            .columns
            .iter()
            .map(|c| {
                if c.is_scalar() {
                    Column::Scalar(c.get_scalar(event))
                } else {
                    Column::Vector(c.get_vector(event))
                }
            })
            .collect();

        let mut n = columns
            .iter()
            .map(|c| match c {
                Column::Scalar(_) => 1,
                Column::Vector(v) => v.len(),
            })
            .max()
            .unwrap_or(1);
        if let Some(cut) = &cut {
            n = n.min(cut.len());
        }

        let row = self.rows;
        let mut printed = false;
        for i in 0..n {
            if cut.as_ref().is_some_and(|c| c[i] == 0.0) {
                continue;
            }
            let values = columns
                .iter()
                .map(|c| match c {
                    Column::Scalar(x) => Some(*x),
                    Column::Vector(v) => v.get(i).copied(),
                })
                .collect();
            self.lines.push(ScanLine { row, instance: i, values });
            printed = true;
        }
        if printed {
            self.rows += 1;
        }
    }
}

type Dump = FigureComponent<ScanLines>;

/// Column dump of the events each process selects.
pub struct EventScan {
    name: String,
    def: Arc<ScanDef>,
    components: Vec<Arc<Dump>>,
}

impl EventScan {
    /// Scan of `columns` for events passing `cut`, printing `precision`
    /// decimals.
    pub fn new(
        name: impl Into<String>,
        cut: impl Into<NamedFunc>,
        columns: Vec<NamedFunc>,
        processes: &[Arc<Process>],
        precision: usize,
    ) -> Self {
        let def = Arc::new(ScanDef { cut: cut.into(), columns, precision });
        let components = processes
            .iter()
            .map(|p| {
                Arc::new(FigureComponent::new(Arc::clone(p), ScanLines::new(Arc::clone(&def), p)))
            })
            .collect();
        Self { name: name.into(), def, components }
    }

    /// Column names, in print order.
    pub fn columns(&self) -> Vec<&str> {
        self.def.columns.iter().map(NamedFunc::name).collect()
    }

    /// Snapshot of the lines collected for `process`.
    pub fn lines(&self, process: &Process) -> Option<ScanLines> {
        self.components
            .iter()
            .find(|c| c.process().id() == process.id())
            .map(|c| c.state().clone())
    }
}

impl Figure for EventScan {
    fn name(&self) -> &str {
        &self.name
    }

    fn components(&self) -> Vec<Arc<dyn Component>> {
        self.components.iter().map(|c| Arc::clone(c) as Arc<dyn Component>).collect()
    }

    fn print(&self, luminosity: f64, subdir: &str, out_dir: &Path) -> Result<()> {
        for c in &self.components {
            let stem = format!("{}_scan_{}", self.name, c.process().name());
            let path = output_path(out_dir, subdir, &stem, luminosity, "txt")?;
            let state = c.state();
            std::fs::write(&path, state.render())?;
            tracing::info!(
                scan = %self.name,
                process = c.process().name(),
                rows = state.rows,
                path = %path.display(),
                "event scan written"
            );
        }
        Ok(())
    }
}
