//! Two-dimensional histograms.
//!
//! Each process bins `(x, y)` pairs selected by `figure cut && process cut`
//! and keeps a bounded list of the raw points for scatter output. Vector
//! variables are broadcast the same way as in [`Hist1D`](crate::Hist1D).

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use ys_core::{Event, Result};
use ys_expr::NamedFunc;

use crate::figure::{Accumulate, Component, Figure, FigureComponent, for_each_entry, output_path};
use crate::hist1d::Axis;
use crate::process::{Process, ProcessKind};

/// Raw points kept per process unless overridden.
pub const DEFAULT_MAX_POINTS: usize = 10_000;

struct Hist2DDef {
    x: Axis,
    y: Axis,
    cut: NamedFunc,
    weight: NamedFunc,
    max_points: usize,
}

/// Per-process contents of a [`Hist2D`].
#[derive(Clone)]
pub struct Hist2DFill {
    def: Arc<Hist2DDef>,
    cut: NamedFunc,
    /// Sum of weights, `sumw[ix * ny + iy]`.
    pub sumw: Vec<f64>,
    /// Sum of squared weights, same layout as `sumw`.
    pub sumw2: Vec<f64>,
    /// Sum of weights outside either axis.
    pub outside: f64,
    /// `(x, y, weight)` of the first points filled.
    pub points: Vec<[f64; 3]>,
    /// Points not kept once `points` was full.
    pub dropped_points: u64,
    /// Number of filled entries, including those outside the axes.
    pub entries: u64,
    /// Entries skipped because x or y was NaN.
    pub nan_entries: u64,
}

impl Hist2DFill {
    fn new(def: Arc<Hist2DDef>, process: &Process) -> Self {
        let n = def.x.n_bins() * def.y.n_bins();
        let cut = def.cut.and(process.cut());
        Self {
            def,
            cut,
            sumw: vec![0.0; n],
            sumw2: vec![0.0; n],
            outside: 0.0,
            points: Vec::new(),
            dropped_points: 0,
            entries: 0,
            nan_entries: 0,
        }
    }

    /// Sum of weights in bin `(ix, iy)`.
    pub fn bin(&self, ix: usize, iy: usize) -> f64 {
        self.sumw[ix * self.def.y.n_bins() + iy]
    }

    fn fill(&mut self, x: f64, y: f64, w: f64) {
        if x.is_nan() || y.is_nan() {
            self.nan_entries += 1;
            return;
        }
        self.entries += 1;
        match (self.def.x.find_bin(x), self.def.y.find_bin(y)) {
            (Some(ix), Some(iy)) => {
                let b = ix * self.def.y.n_bins() + iy;
                self.sumw[b] += w;
                self.sumw2[b] += w * w;
            }
            _ => self.outside += w,
        }
        if self.points.len() < self.def.max_points {
            self.points.push([x, y, w]);
        } else {
            self.dropped_points += 1;
        }
    }
}

impl Accumulate for Hist2DFill {
    fn record(&mut self, process: &Process, event: &dyn Event) {
        let def = Arc::clone(&self.def);
        let cut = self.cut.clone();
        let values = [def.x.variable(), def.y.variable(), &def.weight, process.weight()];
        for_each_entry(&cut, &values, event, |v| self.fill(v[0], v[1], v[2] * v[3]));
    }
}

type Plane = FigureComponent<Hist2DFill>;

/// Histogram of two variables against each other for several processes.
pub struct Hist2D {
    name: String,
    def: Arc<Hist2DDef>,
    components: Vec<Arc<Plane>>,
}

#[derive(Serialize)]
struct ProcessJson<'a> {
    name: &'a str,
    kind: ProcessKind,
    contents: Vec<Vec<f64>>,
    errors: Vec<Vec<f64>>,
    outside: f64,
    entries: u64,
    nan_entries: u64,
    points: Vec<[f64; 3]>,
    dropped_points: u64,
}

#[derive(Serialize)]
struct Hist2DJson<'a> {
    name: &'a str,
    x_variable: &'a str,
    y_variable: &'a str,
    cut: &'a str,
    weight: &'a str,
    luminosity: f64,
    x_edges: &'a [f64],
    y_edges: &'a [f64],
    processes: Vec<ProcessJson<'a>>,
}

impl Hist2D {
    /// 2D histogram with unit weight and no figure-level cut.
    pub fn new(name: impl Into<String>, x: Axis, y: Axis, processes: &[Arc<Process>]) -> Self {
        Self::with_selection(name, x, y, 1.0, 1.0, processes)
    }

    /// 2D histogram with a figure-level cut and weight.
    pub fn with_selection(
        name: impl Into<String>,
        x: Axis,
        y: Axis,
        cut: impl Into<NamedFunc>,
        weight: impl Into<NamedFunc>,
        processes: &[Arc<Process>],
    ) -> Self {
        let def = Arc::new(Hist2DDef {
            x,
            y,
            cut: cut.into(),
            weight: weight.into(),
            max_points: DEFAULT_MAX_POINTS,
        });
        Self::from_def(name.into(), def, processes)
    }

    /// Same histogram keeping at most `max_points` raw points per process.
    pub fn with_max_points(self, max_points: usize) -> Self {
        let def = Arc::new(Hist2DDef {
            x: self.def.x.clone(),
            y: self.def.y.clone(),
            cut: self.def.cut.clone(),
            weight: self.def.weight.clone(),
            max_points,
        });
        let processes: Vec<_> = self.components.iter().map(|c| Arc::clone(c.process())).collect();
        Self::from_def(self.name, def, &processes)
    }

    fn from_def(name: String, def: Arc<Hist2DDef>, processes: &[Arc<Process>]) -> Self {
        let components = processes
            .iter()
            .map(|p| {
                Arc::new(FigureComponent::new(Arc::clone(p), Hist2DFill::new(Arc::clone(&def), p)))
            })
            .collect();
        Self { name, def, components }
    }

    /// Snapshot of the contents filled for `process`.
    pub fn contents(&self, process: &Process) -> Option<Hist2DFill> {
        self.components
            .iter()
            .find(|c| c.process().id() == process.id())
            .map(|c| c.state().clone())
    }

    /// JSON rendering; simulation weights are scaled by `luminosity`.
    pub fn render(&self, luminosity: f64) -> Result<String> {
        let (nx, ny) = (self.def.x.n_bins(), self.def.y.n_bins());
        let processes = self
            .components
            .iter()
            .map(|c| {
                let fill = c.state();
                let scale = if c.kind() == ProcessKind::Data { 1.0 } else { luminosity };
                ProcessJson {
                    name: c.process().name(),
                    kind: c.kind(),
                    contents: grid(&fill.sumw, nx, ny, |w| scale * w),
                    errors: grid(&fill.sumw2, nx, ny, |w2| scale * w2.sqrt()),
                    outside: scale * fill.outside,
                    entries: fill.entries,
                    nan_entries: fill.nan_entries,
                    points: fill.points.iter().map(|&[x, y, w]| [x, y, scale * w]).collect(),
                    dropped_points: fill.dropped_points,
                }
            })
            .collect();
        let doc = Hist2DJson {
            name: &self.name,
            x_variable: self.def.x.variable().name(),
            y_variable: self.def.y.variable().name(),
            cut: self.def.cut.name(),
            weight: self.def.weight.name(),
            luminosity,
            x_edges: self.def.x.edges(),
            y_edges: self.def.y.edges(),
            processes,
        };
        Ok(serde_json::to_string_pretty(&doc)?)
    }
}

fn grid(flat: &[f64], nx: usize, ny: usize, f: impl Fn(f64) -> f64) -> Vec<Vec<f64>> {
    (0..nx).map(|ix| flat[ix * ny..(ix + 1) * ny].iter().map(|&w| f(w)).collect()).collect()
}

impl Figure for Hist2D {
    fn name(&self) -> &str {
        &self.name
    }

    fn components(&self) -> Vec<Arc<dyn Component>> {
        self.components.iter().map(|c| Arc::clone(c) as Arc<dyn Component>).collect()
    }

    fn print(&self, luminosity: f64, subdir: &str, out_dir: &Path) -> Result<()> {
        let path = output_path(out_dir, subdir, &self.name, luminosity, "json")?;
        std::fs::write(&path, self.render(luminosity)?)?;
        tracing::info!(histogram = %self.name, path = %path.display(), "2d histogram written");
        Ok(())
    }
}
