//! One-dimensional histogram stacks.
//!
//! Each process fills its own bin contents with the figure-level cut (joined
//! with the process cut) and weight, multiplied by the process weight. Vector
//! variables fill one entry per element that passes the (vector) cut. Values
//! outside the axis land in the underflow / overflow counters; NaN values are
//! skipped and only counted.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use ys_core::{Error, Event, Result};
use ys_expr::NamedFunc;
use ys_stats::GammaParams;

use crate::figure::{Accumulate, Component, Figure, FigureComponent, for_each_entry, output_path};
use crate::process::{Process, ProcessKind};

/// Binning plus the variable being binned.
#[derive(Debug, Clone)]
pub struct Axis {
    edges: Vec<f64>,
    variable: NamedFunc,
}

impl Axis {
    /// Axis with explicit, strictly increasing edges.
    pub fn from_edges(edges: Vec<f64>, variable: impl Into<NamedFunc>) -> Result<Self> {
        if edges.len() < 2 {
            return Err(Error::Config(format!(
                "need at least 2 bin edges, got {}",
                edges.len()
            )));
        }
        if edges.iter().any(|e| !e.is_finite()) || edges.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::Config("bin edges must be finite and strictly increasing".into()));
        }
        Ok(Self { edges, variable: variable.into() })
    }

    /// `n_bins` equal-width bins over `[low, high)`.
    pub fn uniform(
        n_bins: usize,
        low: f64,
        high: f64,
        variable: impl Into<NamedFunc>,
    ) -> Result<Self> {
        if n_bins == 0 {
            return Err(Error::Config("uniform axis needs at least one bin".into()));
        }
        let width = (high - low) / n_bins as f64;
        let edges = (0..=n_bins).map(|i| low + width * i as f64).collect();
        Self::from_edges(edges, variable)
    }

    /// Bin edges.
    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    /// Number of bins.
    pub fn n_bins(&self) -> usize {
        self.edges.len() - 1
    }

    /// Variable filled into the axis.
    pub fn variable(&self) -> &NamedFunc {
        &self.variable
    }

    /// Bin index of `val`, `None` outside `[first edge, last edge)`.
    pub fn find_bin(&self, val: f64) -> Option<usize> {
        let edges = &self.edges;
        if !(val >= edges[0] && val < edges[edges.len() - 1]) {
            return None;
        }
        match edges.binary_search_by(|e| e.total_cmp(&val)) {
            Ok(i) => Some(i),
            Err(i) => Some(i - 1),
        }
    }
}

struct HistDef {
    axis: Axis,
    cut: NamedFunc,
    weight: NamedFunc,
}

/// Per-process bin contents of a [`Hist1D`].
///
/// Entries are selected with `figure cut && process cut`, so a vector process
/// cut masks the elements of a vector variable.
#[derive(Clone)]
pub struct HistFill {
    def: Arc<HistDef>,
    cut: NamedFunc,
    /// Sum of weights per bin.
    pub sumw: Vec<f64>,
    /// Sum of squared weights per bin.
    pub sumw2: Vec<f64>,
    /// Sum of weights below the first edge.
    pub underflow: f64,
    /// Sum of weights at or above the last edge.
    pub overflow: f64,
    /// Number of filled entries, including under/overflow.
    pub entries: u64,
    /// Entries skipped because the variable was NaN.
    pub nan_entries: u64,
}

impl HistFill {
    fn new(def: Arc<HistDef>, process: &Process) -> Self {
        let n = def.axis.n_bins();
        let cut = def.cut.and(process.cut());
        Self {
            def,
            cut,
            sumw: vec![0.0; n],
            sumw2: vec![0.0; n],
            underflow: 0.0,
            overflow: 0.0,
            entries: 0,
            nan_entries: 0,
        }
    }

    fn fill(&mut self, x: f64, w: f64) {
        if x.is_nan() {
            self.nan_entries += 1;
            return;
        }
        self.entries += 1;
        match self.def.axis.find_bin(x) {
            Some(b) => {
                self.sumw[b] += w;
                self.sumw2[b] += w * w;
            }
            None if x < self.def.axis.edges[0] => self.underflow += w,
            None => self.overflow += w,
        }
    }
}

impl Accumulate for HistFill {
    fn record(&mut self, process: &Process, event: &dyn Event) {
        let def = Arc::clone(&self.def);
        let cut = self.cut.clone();
        let values = [&def.axis.variable, &def.weight, process.weight()];
        for_each_entry(&cut, &values, event, |v| self.fill(v[0], v[1] * v[2]));
    }
}

type Stack = FigureComponent<HistFill>;

/// Histogram of one variable for several processes.
pub struct Hist1D {
    name: String,
    def: Arc<HistDef>,
    components: Vec<Arc<Stack>>,
}

#[derive(Serialize)]
struct ProcessJson<'a> {
    name: &'a str,
    kind: ProcessKind,
    contents: Vec<f64>,
    errors: Vec<f64>,
    underflow: f64,
    overflow: f64,
    entries: u64,
    nan_entries: u64,
}

#[derive(Serialize)]
struct HistJson<'a> {
    name: &'a str,
    variable: &'a str,
    cut: &'a str,
    weight: &'a str,
    luminosity: f64,
    edges: &'a [f64],
    processes: Vec<ProcessJson<'a>>,
    background_total: Vec<f64>,
    background_errors: Vec<f64>,
}

impl Hist1D {
    /// Histogram with unit weight and no figure-level cut.
    pub fn new(name: impl Into<String>, axis: Axis, processes: &[Arc<Process>]) -> Self {
        Self::with_selection(name, axis, 1.0, 1.0, processes)
    }

    /// Histogram with a figure-level cut and weight.
    pub fn with_selection(
        name: impl Into<String>,
        axis: Axis,
        cut: impl Into<NamedFunc>,
        weight: impl Into<NamedFunc>,
        processes: &[Arc<Process>],
    ) -> Self {
        let def = Arc::new(HistDef { axis, cut: cut.into(), weight: weight.into() });
        let components = processes
            .iter()
            .map(|p| {
                Arc::new(FigureComponent::new(Arc::clone(p), HistFill::new(Arc::clone(&def), p)))
            })
            .collect();
        Self { name: name.into(), def, components }
    }

    /// The histogram axis.
    pub fn axis(&self) -> &Axis {
        &self.def.axis
    }

    /// Snapshot of the contents filled for `process`.
    pub fn contents(&self, process: &Process) -> Option<HistFill> {
        self.components
            .iter()
            .find(|c| c.process().id() == process.id())
            .map(|c| c.state().clone())
    }

    /// Per-bin background sum, scaled by `luminosity`.
    pub fn background_total(&self, luminosity: f64) -> Vec<GammaParams> {
        let mut total = vec![GammaParams::default(); self.def.axis.n_bins()];
        for c in self.components.iter().filter(|c| c.kind() == ProcessKind::Background) {
            let fill = c.state();
            for (t, (w, w2)) in total.iter_mut().zip(fill.sumw.iter().zip(&fill.sumw2)) {
                *t +=
                    GammaParams::from_yield_and_uncertainty(luminosity * w, luminosity * w2.sqrt());
            }
        }
        total
    }

    /// JSON rendering with luminosity-scaled simulation contents.
    pub fn render(&self, luminosity: f64) -> Result<String> {
        let processes = self
            .components
            .iter()
            .map(|c| {
                let fill = c.state();
                let scale = if c.kind() == ProcessKind::Data { 1.0 } else { luminosity };
                ProcessJson {
                    name: c.process().name(),
                    kind: c.kind(),
                    contents: fill.sumw.iter().map(|w| scale * w).collect(),
                    errors: fill.sumw2.iter().map(|w2| scale * w2.sqrt()).collect(),
                    underflow: scale * fill.underflow,
                    overflow: scale * fill.overflow,
                    entries: fill.entries,
                    nan_entries: fill.nan_entries,
                }
            })
            .collect();
        let bkg = self.background_total(luminosity);
        let doc = HistJson {
            name: &self.name,
            variable: self.def.axis.variable.name(),
            cut: self.def.cut.name(),
            weight: self.def.weight.name(),
            luminosity,
            edges: &self.def.axis.edges,
            processes,
            background_total: bkg.iter().map(GammaParams::yield_value).collect(),
            background_errors: bkg.iter().map(GammaParams::uncertainty).collect(),
        };
        Ok(serde_json::to_string_pretty(&doc)?)
    }
}

impl Figure for Hist1D {
    fn name(&self) -> &str {
        &self.name
    }

    fn components(&self) -> Vec<Arc<dyn Component>> {
        self.components.iter().map(|c| Arc::clone(c) as Arc<dyn Component>).collect()
    }

    fn print(&self, luminosity: f64, subdir: &str, out_dir: &Path) -> Result<()> {
        let path = output_path(out_dir, subdir, &self.name, luminosity, "json")?;
        std::fs::write(&path, self.render(luminosity)?)?;
        tracing::info!(histogram = %self.name, path = %path.display(), "histogram written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SourceRegistry;
    use crate::source::{ColumnTable, MemoryFactory};
    use approx::assert_relative_eq;

    #[test]
    fn find_bin_edge_cases() {
        let axis = Axis::from_edges(vec![0.0, 1.0, 2.0, 3.0], 0.0).unwrap();
        assert_eq!(axis.find_bin(-0.5), None);
        assert_eq!(axis.find_bin(3.0), None);
        assert_eq!(axis.find_bin(0.0), Some(0));
        assert_eq!(axis.find_bin(1.0), Some(1));
        assert_eq!(axis.find_bin(2.99), Some(2));
        assert_eq!(axis.find_bin(f64::NAN), None);
    }

    #[test]
    fn bad_axes_are_rejected() {
        assert!(Axis::from_edges(vec![1.0], 0.0).is_err());
        assert!(Axis::from_edges(vec![0.0, 2.0, 1.0], 0.0).is_err());
        assert!(Axis::uniform(0, 0.0, 1.0, 0.0).is_err());
        assert_eq!(Axis::uniform(4, 0.0, 2.0, 0.0).unwrap().edges(), &[0.0, 0.5, 1.0, 1.5, 2.0]);
    }

    #[test]
    fn fills_scalar_and_vector_variables() {
        let mut f = MemoryFactory::new("flat");
        f.insert(
            "a",
            ColumnTable::new()
                .with_scalar("met", vec![50.0, 150.0, 500.0, -1.0])
                .with_vector("jets_pt", vec![vec![10.0, 60.0], vec![], vec![120.0], vec![70.0]]),
        );
        let reg = Arc::new(SourceRegistry::new());
        let p = Process::builder("p", ProcessKind::Background)
            .input("a")
            .weight(2.0)
            .build(&reg, &f)
            .unwrap();

        let met_axis = Axis::uniform(2, 0.0, 200.0, NamedFunc::field("met")).unwrap();
        let met = Hist1D::new("met", met_axis, &[Arc::clone(&p)]);
        let jets = NamedFunc::vector_field("jets_pt");
        let pt = Hist1D::with_selection(
            "jet_pt",
            Axis::from_edges(vec![0.0, 50.0, 100.0], jets.clone()).unwrap(),
            jets.greater(20.0),
            1.0,
            &[Arc::clone(&p)],
        );

        let met_c = met.component(&p).unwrap();
        let pt_c = pt.component(&p).unwrap();
        let mut src = p.sources()[0].lock();
        for i in 0..src.row_count() {
            src.load_row(i).unwrap();
            met_c.record_event(src.event());
            pt_c.record_event(src.event());
        }
        drop(src);

        let m = met.contents(&p).unwrap();
        assert_eq!(m.sumw, vec![2.0, 2.0]);
        assert_eq!(m.underflow, 2.0);
        assert_eq!(m.overflow, 2.0);
        assert_eq!(m.entries, 4);

        let j = pt.contents(&p).unwrap();
        assert_eq!(j.sumw, vec![0.0, 4.0]);
        assert_eq!(j.overflow, 2.0);
        assert_eq!(j.entries, 3);

        let bkg = met.background_total(10.0);
        assert_relative_eq!(bkg[0].yield_value(), 20.0, max_relative = 1e-12);

        let doc: serde_json::Value = serde_json::from_str(&met.render(10.0).unwrap()).unwrap();
        assert_eq!(doc["processes"][0]["contents"][1], 20.0);
        assert_eq!(doc["variable"], "met");
    }

    #[test]
    fn vector_process_cut_masks_entries() {
        let mut f = MemoryFactory::new("flat");
        f.insert("a", ColumnTable::new().with_vector("jets_pt", vec![vec![50.0, 10.0, 5.0]]));
        let reg = Arc::new(SourceRegistry::new());
        let jets = NamedFunc::vector_field("jets_pt");
        let p = Process::builder("p", ProcessKind::Background)
            .input("a")
            .cut(jets.greater(30.0))
            .build(&reg, &f)
            .unwrap();
        let h = Hist1D::new(
            "jets",
            Axis::from_edges(vec![0.0, 20.0, 100.0], jets.clone()).unwrap(),
            &[Arc::clone(&p)],
        );
        let comp = h.component(&p).unwrap();
        let mut src = p.sources()[0].lock();
        src.load_row(0).unwrap();
        comp.record_event(src.event());
        drop(src);

        let fill = h.contents(&p).unwrap();
        assert_eq!(fill.sumw, vec![0.0, 1.0]);
        assert_eq!(fill.entries, 1);
    }

    #[test]
    fn nan_values_are_counted_apart() {
        let mut f = MemoryFactory::new("flat");
        f.insert("a", ColumnTable::new().with_scalar("x", vec![f64::NAN, 0.5, f64::NAN]));
        let reg = Arc::new(SourceRegistry::new());
        let p = Process::builder("p", ProcessKind::Background).input("a").build(&reg, &f).unwrap();
        let h = Hist1D::new(
            "x",
            Axis::uniform(1, 0.0, 1.0, NamedFunc::field("x")).unwrap(),
            &[Arc::clone(&p)],
        );
        let comp = h.component(&p).unwrap();
        let mut src = p.sources()[0].lock();
        for i in 0..src.row_count() {
            src.load_row(i).unwrap();
            comp.record_event(src.event());
        }
        drop(src);

        let fill = h.contents(&p).unwrap();
        assert_eq!(fill.sumw, vec![1.0]);
        assert_eq!(fill.entries, 1);
        assert_eq!(fill.nan_entries, 2);
        assert_eq!(fill.overflow, 0.0);
    }
}
