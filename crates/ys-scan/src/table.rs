//! Yield tables.
//!
//! A [`Table`] has an ordered list of rows; data rows carry a cut and a weight,
//! separator rows only a label. Each process gets a [`TableColumn`] holding
//! `sumw` / `sumw2` per row.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use ys_core::{Event, Result};
use ys_expr::NamedFunc;
use ys_stats::GammaParams;

use crate::figure::{Accumulate, Component, Figure, FigureComponent, for_each_entry, output_path};
use crate::process::{Process, ProcessKind};

/// One row of a [`Table`].
#[derive(Debug, Clone)]
pub struct TableRow {
    label: String,
    cut: NamedFunc,
    weight: NamedFunc,
    lines_before: usize,
    lines_after: usize,
    is_data_row: bool,
}

impl TableRow {
    /// Data row counting events that pass `cut`, with unit weight.
    pub fn new(label: impl Into<String>, cut: impl Into<NamedFunc>) -> Self {
        Self {
            label: label.into(),
            cut: cut.into(),
            weight: NamedFunc::constant(1.0),
            lines_before: 0,
            lines_after: 0,
            is_data_row: true,
        }
    }

    /// Label-only row.
    pub fn separator(label: impl Into<String>) -> Self {
        Self { is_data_row: false, ..Self::new(label, 0.0) }
    }

    /// Replace the row weight.
    pub fn with_weight(mut self, weight: impl Into<NamedFunc>) -> Self {
        self.weight = weight.into();
        self
    }

    /// Horizontal rules printed around the row.
    pub fn with_lines(mut self, before: usize, after: usize) -> Self {
        self.lines_before = before;
        self.lines_after = after;
        self
    }

    /// Row label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Row cut.
    pub fn cut(&self) -> &NamedFunc {
        &self.cut
    }

    /// Row weight.
    pub fn weight(&self) -> &NamedFunc {
        &self.weight
    }

    /// False for separator rows.
    pub fn is_data_row(&self) -> bool {
        self.is_data_row
    }
}

/// Per-process accumulator of a [`Table`].
///
/// Each data row selects entries with `row cut && process cut`, so a vector
/// process cut masks elements, not just whole rows.
#[derive(Debug, Clone)]
pub struct TableColumn {
    rows: Arc<[TableRow]>,
    cuts: Vec<NamedFunc>,
    sumw: Vec<f64>,
    sumw2: Vec<f64>,
}

impl TableColumn {
    fn new(rows: Arc<[TableRow]>, process: &Process) -> Self {
        let n = rows.len();
        let cuts = rows.iter().map(|r| r.cut.and(process.cut())).collect();
        Self { rows, cuts, sumw: vec![0.0; n], sumw2: vec![0.0; n] }
    }

    /// Sum of weights per row.
    pub fn sumw(&self) -> &[f64] {
        &self.sumw
    }

    /// Sum of squared weights per row.
    pub fn sumw2(&self) -> &[f64] {
        &self.sumw2
    }

    fn yields(&self, luminosity: f64) -> Vec<GammaParams> {
        self.sumw
            .iter()
            .zip(&self.sumw2)
            .map(|(&w, &w2)| {
                GammaParams::from_yield_and_uncertainty(luminosity * w, luminosity * w2.sqrt())
            })
            .collect()
    }
}

impl Accumulate for TableColumn {
    fn record(&mut self, process: &Process, event: &dyn Event) {
        let Self { rows, cuts, sumw, sumw2 } = self;
        for (irow, (row, cut)) in rows.iter().zip(cuts.iter()).enumerate() {
            if !row.is_data_row {
                continue;
            }
            for_each_entry(cut, &[&row.weight, process.weight()], event, |v| {
                let w = v[0] * v[1];
                sumw[irow] += w;
                sumw2[irow] += w * w;
            });
        }
    }
}

type Column = FigureComponent<TableColumn>;

/// Table of yields per row and process.
pub struct Table {
    name: String,
    rows: Arc<[TableRow]>,
    columns: Vec<Arc<Column>>,
}

impl Table {
    /// Table named `name` with one column per process.
    pub fn new(name: impl Into<String>, rows: Vec<TableRow>, processes: &[Arc<Process>]) -> Self {
        let rows: Arc<[TableRow]> = rows.into();
        let columns = processes
            .iter()
            .map(|p| {
                let column = TableColumn::new(Arc::clone(&rows), p);
                Arc::new(FigureComponent::new(Arc::clone(p), column))
            })
            .collect();
        Self { name: name.into(), rows, columns }
    }

    /// Table rows.
    pub fn rows(&self) -> &[TableRow] {
        &self.rows
    }

    fn column(&self, process: &Process) -> Option<&Arc<Column>> {
        self.columns.iter().find(|c| c.process().id() == process.id())
    }

    fn of_kind(&self, kind: ProcessKind) -> impl Iterator<Item = &Arc<Column>> {
        self.columns.iter().filter(move |c| c.kind() == kind)
    }

    /// Per-row yields of `process`, scaled by `luminosity`.
    pub fn yield_for(&self, process: &Process, luminosity: f64) -> Option<Vec<GammaParams>> {
        self.column(process).map(|c| c.state().yields(luminosity))
    }

    /// Per-row yields of `process` if it is a signal of this table.
    pub fn signal_yield(&self, process: &Process, luminosity: f64) -> Option<Vec<GammaParams>> {
        self.column(process)
            .filter(|c| c.kind() == ProcessKind::Signal)
            .map(|c| c.state().yields(luminosity))
    }

    /// Per-row sum over all background processes.
    pub fn background_yield(&self, luminosity: f64) -> Vec<GammaParams> {
        self.summed(ProcessKind::Background, luminosity)
    }

    /// Per-row sum over all data processes (never luminosity-scaled).
    pub fn data_yield(&self) -> Vec<GammaParams> {
        self.summed(ProcessKind::Data, 1.0)
    }

    fn summed(&self, kind: ProcessKind, luminosity: f64) -> Vec<GammaParams> {
        let mut total = vec![GammaParams::default(); self.rows.len()];
        for c in self.of_kind(kind) {
            for (t, y) in total.iter_mut().zip(c.state().yields(luminosity)) {
                *t += y;
            }
        }
        total
    }

    /// Plain-text rendering of the table.
    pub fn render(&self, luminosity: f64) -> String {
        let backgrounds: Vec<_> = self.of_kind(ProcessKind::Background).collect();
        let signals: Vec<_> = self.of_kind(ProcessKind::Signal).collect();
        let data: Vec<_> = self.of_kind(ProcessKind::Data).collect();
        let bkg_total = self.background_yield(luminosity);
        let data_total = self.data_yield();

        let label_width = self.rows.iter().map(|r| r.label.len()).max().unwrap_or(0).max(8);
        let mut header = format!("{:<label_width$}", "");
        for c in backgrounds.iter().chain(&signals) {
            let _ = write!(header, " | {:>12}", c.process().name());
        }
        if !backgrounds.is_empty() {
            let _ = write!(header, " | {:>20}", "SM bkg.");
        }
        if !data.is_empty() {
            let _ = write!(header, " | {:>10}", "Obs.");
        }
        let rule = "-".repeat(header.len());

        let mut out = String::new();
        let _ = writeln!(out, "# {} (L = {luminosity})", self.name);
        let _ = writeln!(out, "{header}");
        let _ = writeln!(out, "{rule}");
        for (irow, row) in self.rows.iter().enumerate() {
            for _ in 0..row.lines_before {
                let _ = writeln!(out, "{rule}");
            }
            let mut line = format!("{:<label_width$}", row.label);
            if row.is_data_row {
                for c in backgrounds.iter().chain(&signals) {
                    let _ = write!(line, " | {:>12.1}", luminosity * c.state().sumw[irow]);
                }
                if !backgrounds.is_empty() {
                    let t = bkg_total[irow];
                    let cell = format!("{:.1} +- {:.1}", t.yield_value(), t.uncertainty());
                    let _ = write!(line, " | {cell:>20}");
                }
                if !data.is_empty() {
                    let _ = write!(line, " | {:>10.0}", data_total[irow].yield_value());
                }
            }
            let _ = writeln!(out, "{}", line.trim_end());
            for _ in 0..row.lines_after {
                let _ = writeln!(out, "{rule}");
            }
        }
        out
    }
}

impl Figure for Table {
    fn name(&self) -> &str {
        &self.name
    }

    fn components(&self) -> Vec<Arc<dyn Component>> {
        self.columns.iter().map(|c| Arc::clone(c) as Arc<dyn Component>).collect()
    }

    fn print(&self, luminosity: f64, subdir: &str, out_dir: &Path) -> Result<()> {
        let path = output_path(out_dir, subdir, &self.name, luminosity, "txt")?;
        std::fs::write(&path, self.render(luminosity))?;
        tracing::info!(table = %self.name, path = %path.display(), "table written");
        Ok(())
    }
}
