//! Scan orchestrator.
//!
//! [`PlotMaker::make_plots`] groups every (process, component) pair of the
//! registered figures by pooled event source, scans each source exactly once
//! (one worker-pool task per source), and then renders every figure once.

use std::any::Any;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use ys_core::{Error, Result};

use crate::figure::{Component, Figure};
use crate::process::Process;
use crate::registry::{PooledSource, ProcessId, SourceKey};
use crate::thread_pool::{ThreadPool, catch_panic, default_threads};

/// Progress message at `info`, or `debug` when minimal output is requested.
macro_rules! progress {
    ($quiet:expr, $($arg:tt)+) => {
        if $quiet {
            tracing::debug!($($arg)+);
        } else {
            tracing::info!($($arg)+);
        }
    };
}

/// Bookkeeping for one scanned source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceScan {
    /// Row schema.
    pub schema: String,
    /// Physical input.
    pub input: PathBuf,
    /// Rows read.
    pub rows: u64,
    /// Processes evaluated on every row.
    pub processes: usize,
    /// Wall-clock time of the scan.
    pub elapsed: Duration,
}

/// Result of one [`PlotMaker::make_plots`] call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanSummary {
    /// One entry per scanned source, ordered by source key.
    pub sources: Vec<SourceScan>,
    /// Number of rendered figures.
    pub figures: usize,
    /// Wall-clock time of the whole run.
    pub elapsed: Duration,
}

impl ScanSummary {
    /// Total rows read over all sources.
    pub fn rows_read(&self) -> u64 {
        self.sources.iter().map(|s| s.rows).sum()
    }
}

struct Registered {
    figure: Arc<dyn Figure>,
    any: Arc<dyn Any + Send + Sync>,
}

/// Work for one process inside one source scan.
struct ProcessWork {
    process: Arc<Process>,
    components: Vec<Arc<dyn Component>>,
}

struct SourceWork {
    source: Arc<PooledSource>,
    processes: BTreeMap<ProcessId, ProcessWork>,
}

/// Owns the figures of a run and drives the scan.
pub struct PlotMaker {
    figures: Vec<Registered>,
    multithreaded: bool,
    min_print: bool,
    threads: usize,
    out_dir: PathBuf,
}

impl Default for PlotMaker {
    fn default() -> Self {
        Self::new()
    }
}

impl PlotMaker {
    /// Multithreaded orchestrator writing into `./plots`.
    pub fn new() -> Self {
        Self {
            figures: Vec::new(),
            multithreaded: true,
            min_print: false,
            threads: default_threads(),
            out_dir: PathBuf::from("plots"),
        }
    }

    /// Register a figure and return a typed handle to it.
    pub fn push<F: Figure + 'static>(&mut self, figure: F) -> Arc<F> {
        let typed = Arc::new(figure);
        self.figures.push(Registered {
            figure: Arc::clone(&typed) as Arc<dyn Figure>,
            any: Arc::clone(&typed) as Arc<dyn Any + Send + Sync>,
        });
        typed
    }

    /// Registered figures, in push order.
    pub fn figures(&self) -> Vec<Arc<dyn Figure>> {
        self.figures.iter().map(|r| Arc::clone(&r.figure)).collect()
    }

    /// Most recently pushed figure of type `F`.
    pub fn get_last<F: Figure + 'static>(&self) -> Option<Arc<F>> {
        self.figures.iter().rev().find_map(|r| Arc::clone(&r.any).downcast::<F>().ok())
    }

    /// Forget every figure.
    pub fn clear(&mut self) {
        self.figures.clear();
    }

    /// Scan sources on the worker pool (default) or in the calling thread.
    pub fn set_multithreaded(&mut self, on: bool) -> &mut Self {
        self.multithreaded = on;
        self
    }

    /// Whether sources are scanned on the worker pool.
    pub fn multithreaded(&self) -> bool {
        self.multithreaded
    }

    /// Demote per-source progress messages to debug level.
    pub fn set_min_print(&mut self, on: bool) -> &mut Self {
        self.min_print = on;
        self
    }

    /// Upper bound on worker threads.
    pub fn set_threads(&mut self, threads: usize) -> &mut Self {
        self.threads = threads.max(1);
        self
    }

    /// Root directory for rendered figures.
    pub fn set_out_dir(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
        self.out_dir = dir.into();
        self
    }

    /// Root directory for rendered figures.
    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    fn plan(&self) -> BTreeMap<SourceKey, SourceWork> {
        let mut work: BTreeMap<SourceKey, SourceWork> = BTreeMap::new();
        for reg in &self.figures {
            for component in reg.figure.components() {
                let process = Arc::clone(component.process());
                for source in process.sources() {
                    let entry = work.entry(source.key().clone()).or_insert_with(|| SourceWork {
                        source: Arc::clone(source),
                        processes: BTreeMap::new(),
                    });
                    entry
                        .processes
                        .entry(process.id())
                        .or_insert_with(|| ProcessWork {
                            process: Arc::clone(&process),
                            components: Vec::new(),
                        })
                        .components
                        .push(Arc::clone(&component));
                }
            }
        }
        work
    }

    /// Scan every needed source once, then render each figure once.
    ///
    /// Any source failing (I/O error or a panic inside an expression) fails
    /// the whole run; figures are only rendered after every scan succeeded.
    pub fn make_plots(&self, luminosity: f64, subdir: &str) -> Result<ScanSummary> {
        let start = Instant::now();
        let plan = self.plan();
        let n_sources = plan.len();
        let quiet = self.min_print;
        progress!(quiet, sources = n_sources, figures = self.figures.len(), "starting scan");

        let results: Vec<Result<SourceScan>> = if !self.multithreaded || n_sources <= 1 {
            plan.into_values()
                .map(|w| catch_panic(|| scan_source(w, quiet)).and_then(|r| r))
                .collect()
        } else {
            let pool = ThreadPool::new(self.threads.min(n_sources))?;
            let handles: Vec<_> =
                plan.into_values().map(|w| pool.push(move || scan_source(w, quiet))).collect();
            handles.into_iter().map(|h| h.join().and_then(|r| r)).collect()
        };

        let mut sources = Vec::with_capacity(results.len());
        let mut failure = None;
        for r in results {
            match r {
                Ok(scan) => sources.push(scan),
                Err(e) => {
                    tracing::error!(error = %e, "source scan failed");
                    failure.get_or_insert(e);
                }
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }

        for reg in &self.figures {
            reg.figure.print(luminosity, subdir, &self.out_dir).map_err(|e| {
                Error::Figure(format!("{}: {e}", reg.figure.name()))
            })?;
        }

        let summary =
            ScanSummary { sources, figures: self.figures.len(), elapsed: start.elapsed() };
        progress!(
            quiet,
            rows = summary.rows_read(),
            elapsed_s = summary.elapsed.as_secs_f64(),
            "scan finished"
        );
        Ok(summary)
    }
}

fn scan_source(work: SourceWork, quiet: bool) -> Result<SourceScan> {
    let start = Instant::now();
    let key = work.source.key().clone();
    let targets: Vec<ProcessWork> = work.processes.into_values().collect();

    let mut source = work.source.lock();
    let rows = source.row_count();
    progress!(quiet, source = %key, rows, processes = targets.len(), "scanning");

    for index in 0..rows {
        source.load_row(index)?;
        let event = source.event();
        for target in &targets {
            if !target.process.cut().passes(event) {
                continue;
            }
            for component in &target.components {
                component.record_event(event);
            }
        }
    }

    let elapsed = start.elapsed();
    progress!(quiet, source = %key, rows, elapsed_s = elapsed.as_secs_f64(), "scanned");
    Ok(SourceScan {
        schema: key.schema,
        input: key.input,
        rows,
        processes: targets.len(),
        elapsed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hist1d::{Axis, Hist1D};
    use crate::process::ProcessKind;
    use crate::registry::SourceRegistry;
    use crate::source::{ColumnTable, MemoryFactory};
    use crate::table::{Table, TableRow};
    use ys_expr::NamedFunc;

    fn tmp_dir(tag: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("ys_plot_maker_{tag}_{}_{nanos}", std::process::id()))
    }

    fn process(reg: &Arc<SourceRegistry>, name: &str) -> Arc<Process> {
        let mut f = MemoryFactory::new("flat");
        f.insert("a", ColumnTable::new().with_scalar("x", vec![1.0, 2.0, 3.0]));
        Process::builder(name, ProcessKind::Background).input("a").build(reg, &f).unwrap()
    }

    #[test]
    fn push_get_last_clear() {
        let reg = Arc::new(SourceRegistry::new());
        let p = process(&reg, "p");
        let mut pm = PlotMaker::new();
        let t1 = pm.push(Table::new("t1", vec![TableRow::new("all", 1.0)], &[Arc::clone(&p)]));
        let axis = Axis::uniform(1, 0.0, 10.0, NamedFunc::field("x")).unwrap();
        pm.push(Hist1D::new("h", axis, &[Arc::clone(&p)]));
        let t2 = pm.push(Table::new("t2", vec![TableRow::new("all", 1.0)], &[Arc::clone(&p)]));

        assert_eq!(pm.figures().len(), 3);
        assert!(Arc::ptr_eq(&pm.get_last::<Table>().unwrap(), &t2));
        assert!(!Arc::ptr_eq(&pm.get_last::<Table>().unwrap(), &t1));
        assert_eq!(pm.get_last::<Hist1D>().unwrap().name(), "h");
        pm.clear();
        assert!(pm.figures().is_empty());
        assert!(pm.get_last::<Table>().is_none());
    }

    #[test]
    fn panic_in_expression_fails_run_before_rendering() {
        let reg = Arc::new(SourceRegistry::new());
        let p = process(&reg, "p");
        let out = tmp_dir("panic");
        let bad = NamedFunc::scalar("bad", |ev| {
            let x = ev.scalar("x").unwrap_or(0.0);
            assert!(x < 3.0, "x out of range");
            x
        });
        let mut pm = PlotMaker::new();
        pm.set_out_dir(&out);
        pm.push(Table::new("t", vec![TableRow::new("bad", bad)], &[p]));

        pm.set_multithreaded(false);
        match pm.make_plots(1.0, "") {
            Err(Error::TaskFailed(msg)) => assert!(msg.contains("x out of range"), "{msg}"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(!out.join("t_lumi_1.txt").exists());
    }

    #[test]
    fn empty_plot_maker_renders_nothing() {
        let pm = PlotMaker::new();
        let summary = pm.make_plots(1.0, "x").unwrap();
        assert!(summary.sources.is_empty());
        assert_eq!(summary.figures, 0);
    }
}
