//! Clause database with per-literal occurrence lists.

use satfarm_base::{Error, Result};
use satfarm_format::DimacsCnf;
use std::path::Path;

/// A literal: variable index (0-based) and polarity packed into one word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Lit(u32);

impl Lit {
    /// Creates the literal of `var`, negated if `negative`.
    #[must_use]
    pub const fn new(var: u32, negative: bool) -> Self {
        Self(var << 1 | negative as u32)
    }

    /// Converts a DIMACS literal (1-based, sign is polarity).
    pub fn from_dimacs(lit: i64) -> Result<Self> {
        let var = lit.unsigned_abs();
        if lit == 0 || var > u64::from(u32::MAX >> 1) {
            return Err(Error::Parse(format!("literal {lit} out of range")));
        }
        Ok(Self::new((var - 1) as u32, lit < 0))
    }

    #[must_use]
    pub const fn var(self) -> u32 {
        self.0 >> 1
    }

    #[must_use]
    pub const fn is_negative(self) -> bool {
        self.0 & 1 == 1
    }

    #[must_use]
    pub const fn negate(self) -> Self {
        Self(self.0 ^ 1)
    }

    /// Dense index for per-literal tables.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Whether the literal holds under `assignment`.
    #[must_use]
    pub fn is_true(self, assignment: &[bool]) -> bool {
        assignment[self.var() as usize] != self.is_negative()
    }
}

/// An immutable CNF formula prepared for local search.
#[derive(Debug, Clone)]
pub struct Formula {
    num_vars: usize,
    clauses: Vec<Vec<Lit>>,
    occurrences: Vec<Vec<u32>>,
}

impl Formula {
    /// Builds the formula, removing duplicate literals and tautologies.
    pub fn from_dimacs(cnf: &DimacsCnf) -> Result<Self> {
        if cnf.num_vars > (u32::MAX >> 1) as usize {
            return Err(Error::Parse(format!("{} variables are too many", cnf.num_vars)));
        }
        let mut clauses = Vec::with_capacity(cnf.clauses.len());
        for raw in &cnf.clauses {
            let mut clause = raw
                .iter()
                .map(|&lit| Lit::from_dimacs(lit))
                .collect::<Result<Vec<_>>>()?;
            if clause.iter().any(|lit| lit.var() as usize >= cnf.num_vars) {
                return Err(Error::Parse(format!(
                    "clause {raw:?} exceeds {} variables",
                    cnf.num_vars
                )));
            }
            clause.sort_unstable();
            clause.dedup();
            if clause.is_empty() {
                return Err(Error::Parse("empty clause".to_string()));
            }
            // x and -x are adjacent after sorting
            let tautology = clause.windows(2).any(|w| w[0].var() == w[1].var());
            if !tautology {
                clauses.push(clause);
            }
        }

        let mut occurrences = vec![Vec::new(); cnf.num_vars * 2];
        for (index, clause) in clauses.iter().enumerate() {
            for lit in clause {
                occurrences[lit.index()].push(index as u32);
            }
        }

        Ok(Self {
            num_vars: cnf.num_vars,
            clauses,
            occurrences,
        })
    }

    /// Reads a DIMACS file.
    pub fn load(path: &Path) -> Result<Self> {
        let cnf = DimacsCnf::from_path(path)?;
        let formula = Self::from_dimacs(&cnf)?;
        tracing::debug!(
            "Loaded {} ({} vars, {} clauses)",
            path.display(),
            formula.num_vars,
            formula.clauses.len()
        );
        Ok(formula)
    }

    #[must_use]
    pub fn num_vars(&self) -> usize {
        self.num_vars
    }

    #[must_use]
    pub fn num_clauses(&self) -> usize {
        self.clauses.len()
    }

    #[must_use]
    pub fn clause(&self, index: usize) -> &[Lit] {
        &self.clauses[index]
    }

    /// Clauses containing `lit`.
    #[must_use]
    pub fn occurrences(&self, lit: Lit) -> &[u32] {
        &self.occurrences[lit.index()]
    }

    /// Most clauses any single literal appears in; bounds every break count.
    #[must_use]
    pub fn max_occurrences(&self) -> usize {
        self.occurrences.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// Checks an assignment against every clause.
    #[must_use]
    pub fn is_satisfied_by(&self, assignment: &[bool]) -> bool {
        assignment.len() == self.num_vars
            && self
                .clauses
                .iter()
                .all(|clause| clause.iter().any(|lit| lit.is_true(assignment)))
    }
}
