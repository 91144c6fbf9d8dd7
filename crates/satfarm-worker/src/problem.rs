//! Problems shared between trials.

use once_cell::sync::OnceCell;
use satfarm_base::Result;
use satfarm_probsat::Formula;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

/// A problem file, parsed on first use by whichever thread gets there first.
#[derive(Debug)]
pub struct Problem {
    path: PathBuf,
    formula: OnceCell<Formula>,
}

impl Problem {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            formula: OnceCell::new(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The parsed formula; other threads block while one parses.
    ///
    /// A failed parse is not cached, so the next caller tries again.
    pub fn formula(&self) -> Result<&Formula> {
        self.formula.get_or_try_init(|| Formula::load(&self.path))
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.formula.get().is_some()
    }
}

/// Hands out one [`Problem`] per filename for as long as any job holds it.
#[derive(Debug, Default)]
pub struct ProblemCache {
    entries: HashMap<String, Weak<Problem>>,
}

impl ProblemCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the live problem for `filename`, creating it if needed.
    pub fn get(&mut self, filename: &str) -> Arc<Problem> {
        if let Some(problem) = self.entries.get(filename).and_then(Weak::upgrade) {
            return problem;
        }
        self.entries.retain(|_, weak| weak.strong_count() > 0);
        let problem = Arc::new(Problem::new(filename));
        self.entries
            .insert(filename.to_string(), Arc::downgrade(&problem));
        problem
    }

    /// Number of problems still referenced by jobs.
    #[must_use]
    pub fn live(&self) -> usize {
        self.entries.values().filter(|w| w.strong_count() > 0).count()
    }
}
