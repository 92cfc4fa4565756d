//! # ys-scan
//!
//! Reads each distinct event source exactly once per run and fans the rows
//! out to every figure component interested in them.
//!
//! ## Pieces
//!
//! - [`SourceRegistry`]: pools open sources by `(schema, input)`
//! - [`Process`]: named cut and weight over pooled sources
//! - [`ThreadPool`]: bounded FIFO worker pool with result handles
//! - [`Figure`] / [`Component`]: output artifacts and their per-process,
//!   individually locked accumulators ([`Table`], [`Hist1D`], [`Hist2D`],
//!   [`EventScan`])
//! - [`PlotMaker`]: plans the scan, dispatches one task per source, renders

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod event_scan;
pub mod figure;
pub mod hist1d;
pub mod hist2d;
pub mod plot_maker;
pub mod process;
pub mod registry;
pub mod source;
pub mod table;
pub mod thread_pool;

pub use event_scan::{EventScan, ScanLine, ScanLines};
pub use figure::{Accumulate, Component, Figure, FigureComponent};
pub use hist1d::{Axis, Hist1D, HistFill};
pub use hist2d::{Hist2D, Hist2DFill};
pub use plot_maker::{PlotMaker, ScanSummary, SourceScan};
pub use process::{Process, ProcessBuilder, ProcessKind};
pub use registry::{PooledSource, ProcessId, SourceKey, SourceRegistry};
pub use table::{Table, TableColumn, TableRow};
pub use thread_pool::{TaskHandle, ThreadPool, default_threads};
