//! Figure / component model.
//!
//! A [`Figure`] is an output artifact fed by one [`Component`] per process.
//! Components are the unit of mutual exclusion: the orchestrator may deliver
//! rows from several sources to the same component concurrently, and each
//! delivery takes that component's lock for the duration of one
//! `record_event` call only.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use ys_core::{Event, Result};
use ys_expr::NamedFunc;

use crate::process::{Process, ProcessKind};

/// Per-(figure, process) accumulator shared with the scan workers.
pub trait Component: Send + Sync {
    /// The process feeding this component.
    fn process(&self) -> &Arc<Process>;

    /// Account for one row that passed the process cut.
    fn record_event(&self, event: &dyn Event);
}

/// An output artifact rendered once per run.
pub trait Figure: Send + Sync {
    /// Name used for output files and logs.
    fn name(&self) -> &str;

    /// Every component of this figure.
    fn components(&self) -> Vec<Arc<dyn Component>>;

    /// Processes this figure reads, in component order.
    fn processes(&self) -> Vec<Arc<Process>> {
        self.components().iter().map(|c| Arc::clone(c.process())).collect()
    }

    /// Component fed by `process`, if the figure uses it.
    fn component(&self, process: &Process) -> Option<Arc<dyn Component>> {
        self.components().into_iter().find(|c| c.process().id() == process.id())
    }

    /// Render accumulated results under `out_dir/subdir`.
    fn print(&self, luminosity: f64, subdir: &str, out_dir: &Path) -> Result<()>;
}

/// State updated by [`FigureComponent::record_event`].
pub trait Accumulate: Send {
    /// Fold one passing row into the state.
    fn record(&mut self, process: &Process, event: &dyn Event);
}

/// Generic component: a process plus lock-protected accumulator state.
pub struct FigureComponent<A> {
    process: Arc<Process>,
    state: Mutex<A>,
}

impl<A: Accumulate> FigureComponent<A> {
    /// Component for `process` starting from `state`.
    pub fn new(process: Arc<Process>, state: A) -> Self {
        Self { process, state: Mutex::new(state) }
    }

    /// Lock the accumulator for reading results.
    pub fn state(&self) -> MutexGuard<'_, A> {
        self.state.lock().expect("figure component mutex poisoned")
    }

    /// Process kind, for routing into background/signal/data lists.
    pub fn kind(&self) -> ProcessKind {
        self.process.kind()
    }
}

impl<A: Accumulate> Component for FigureComponent<A> {
    fn process(&self) -> &Arc<Process> {
        &self.process
    }

    fn record_event(&self, event: &dyn Event) {
        self.state().record(&self.process, event);
    }
}

/// `out_dir/subdir/<name>_lumi_<luminosity>.<ext>`, creating directories.
pub(crate) fn output_path(
    out_dir: &Path,
    subdir: &str,
    name: &str,
    luminosity: f64,
    ext: &str,
) -> Result<PathBuf> {
    let dir = if subdir.is_empty() { out_dir.to_path_buf() } else { out_dir.join(subdir) };
    std::fs::create_dir_all(&dir)?;
    Ok(dir.join(format!("{name}_lumi_{luminosity}.{ext}")))
}

enum Evaluated {
    Scalar(f64),
    Vector(Vec<f64>),
}

impl Evaluated {
    fn at(&self, i: usize) -> f64 {
        match self {
            Evaluated::Scalar(x) => *x,
            Evaluated::Vector(v) => v[i],
        }
    }
}

/// Walk the entries of one row selected by `cut`.
///
/// `values` are evaluated lazily once `cut` is known to pass (for a scalar
/// cut) and broadcast against each other: if everything is scalar, `f` is
/// called once; otherwise once per element index up to the shortest vector,
/// skipping indices where a vector cut is zero. `f` receives the values in
/// the order given.
pub(crate) fn for_each_entry(
    cut: &NamedFunc,
    values: &[&NamedFunc],
    event: &dyn Event,
    mut f: impl FnMut(&[f64]),
) {
    let cut_eval = if cut.is_scalar() {
        if !cut.passes(event) {
            return;
        }
        Evaluated::Scalar(1.0)
    } else {
        Evaluated::Vector(cut.get_vector(event))
    };
    let evaluated: Vec<Evaluated> = values
        .iter()
        .map(|v| {
            if v.is_scalar() {
                Evaluated::Scalar(v.get_scalar(event))
            } else {
                Evaluated::Vector(v.get_vector(event))
            }
        })
        .collect();

    let min_len = std::iter::once(&cut_eval)
        .chain(evaluated.iter())
        .filter_map(|e| match e {
            Evaluated::Vector(v) => Some(v.len()),
            Evaluated::Scalar(_) => None,
        })
        .min();

    let mut buf = vec![0.0; evaluated.len()];
    match min_len {
        None => {
            for (slot, e) in buf.iter_mut().zip(&evaluated) {
                *slot = e.at(0);
            }
            f(&buf);
        }
        Some(n) => {
            for i in 0..n {
                if cut_eval.at(i) == 0.0 {
                    continue;
                }
                for (slot, e) in buf.iter_mut().zip(&evaluated) {
                    *slot = e.at(i);
                }
                f(&buf);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;

    struct Row {
        n: f64,
        v: Vec<f64>,
        w: Vec<f64>,
    }

    impl Event for Row {
        fn scalar(&self, name: &str) -> Option<f64> {
            (name == "n").then_some(self.n)
        }

        fn vector(&self, name: &str) -> Option<&[f64]> {
            match name {
                "v" => Some(self.v.as_slice()),
                "w" => Some(self.w.as_slice()),
                _ => None,
            }
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn collect(cut: &NamedFunc, values: &[&NamedFunc], row: &Row) -> Vec<Vec<f64>> {
        let mut out = Vec::new();
        for_each_entry(cut, values, row, |vals| out.push(vals.to_vec()));
        out
    }

    #[test]
    fn scalar_cut_and_values() {
        let row = Row { n: 3.0, v: vec![], w: vec![] };
        let n = NamedFunc::field("n");
        assert_eq!(collect(&n.greater(2.0), &[&n], &row), vec![vec![3.0]]);
        assert!(collect(&n.greater(5.0), &[&n], &row).is_empty());
    }

    #[test]
    fn vector_cut_selects_elements() {
        let row = Row { n: 2.0, v: vec![10.0, 40.0, 60.0], w: vec![1.0, 2.0] };
        let v = NamedFunc::vector_field("v");
        let w = NamedFunc::vector_field("w");
        let n = NamedFunc::field("n");
        // Truncated to the shorter of v and w.
        assert_eq!(collect(&v.greater(30.0), &[&w, &n], &row), vec![vec![2.0, 2.0]]);
        assert_eq!(
            collect(&NamedFunc::constant(1.0), &[&v], &row),
            vec![vec![10.0], vec![40.0], vec![60.0]]
        );
    }

    #[test]
    fn failing_scalar_cut_skips_value_evaluation() {
        let row = Row { n: 0.0, v: vec![], w: vec![] };
        let boom = NamedFunc::scalar("boom", |_| panic!("evaluated"));
        assert!(collect(&NamedFunc::field("n"), &[&boom], &row).is_empty());
    }
}
