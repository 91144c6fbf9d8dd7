//! One probSAT run.

use satfarm_base::utils::XorShift64;

use crate::formula::{Formula, Lit};
use crate::probability::BreakProbability;

const NOT_UNSAT: u32 = u32::MAX;

/// Search state of a single trial.
///
/// Keeps, per clause, the number of true literals and the XOR of the
/// variables making it true; when exactly one literal is true the XOR is that
/// literal's variable, which is the variable whose flip would break the clause.
pub struct Trial<'a, P: BreakProbability + ?Sized> {
    formula: &'a Formula,
    probability: &'a P,
    rng: XorShift64,
    seed: u64,
    assignment: Vec<bool>,
    true_count: Vec<u32>,
    critical: Vec<u32>,
    break_count: Vec<u32>,
    unsat: Vec<u32>,
    unsat_pos: Vec<u32>,
    weights: Vec<f64>,
    flips: u64,
}

impl<'a, P: BreakProbability + ?Sized> Trial<'a, P> {
    /// Starts a trial from a random assignment drawn from `seed`.
    pub fn new(formula: &'a Formula, probability: &'a P, seed: u64) -> Self {
        let mut rng = XorShift64::new(seed);
        let assignment = (0..formula.num_vars()).map(|_| rng.next_bool()).collect();
        let mut trial = Self {
            formula,
            probability,
            rng,
            seed,
            assignment,
            true_count: vec![0; formula.num_clauses()],
            critical: vec![0; formula.num_clauses()],
            break_count: vec![0; formula.num_vars()],
            unsat: Vec::new(),
            unsat_pos: vec![NOT_UNSAT; formula.num_clauses()],
            weights: Vec::new(),
            flips: 0,
        };
        trial.initialize();
        trial
    }

    fn initialize(&mut self) {
        for index in 0..self.formula.num_clauses() {
            let mut count = 0;
            let mut critical = 0;
            for lit in self.formula.clause(index) {
                if lit.is_true(&self.assignment) {
                    count += 1;
                    critical ^= lit.var();
                }
            }
            self.true_count[index] = count;
            self.critical[index] = critical;
            match count {
                0 => self.mark_unsat(index as u32),
                1 => self.break_count[critical as usize] += 1,
                _ => {}
            }
        }
    }

    fn mark_unsat(&mut self, clause: u32) {
        self.unsat_pos[clause as usize] = self.unsat.len() as u32;
        self.unsat.push(clause);
    }

    fn mark_sat(&mut self, clause: u32) {
        let pos = self.unsat_pos[clause as usize];
        debug_assert_ne!(pos, NOT_UNSAT);
        self.unsat_pos[clause as usize] = NOT_UNSAT;
        if let Some(last) = self.unsat.pop() {
            if last != clause {
                self.unsat[pos as usize] = last;
                self.unsat_pos[last as usize] = pos;
            }
        }
    }

    fn flip(&mut self, var: u32) {
        let was_true = self.assignment[var as usize];
        self.assignment[var as usize] = !was_true;
        let formula = self.formula;
        let made_true = Lit::new(var, was_true);

        for &clause in formula.occurrences(made_true) {
            let c = clause as usize;
            let before = self.true_count[c];
            self.true_count[c] = before + 1;
            match before {
                0 => {
                    self.mark_sat(clause);
                    self.break_count[var as usize] += 1;
                    self.critical[c] = var;
                }
                1 => {
                    self.break_count[self.critical[c] as usize] -= 1;
                    self.critical[c] ^= var;
                }
                _ => self.critical[c] ^= var,
            }
        }

        for &clause in formula.occurrences(made_true.negate()) {
            let c = clause as usize;
            let after = self.true_count[c] - 1;
            self.true_count[c] = after;
            self.critical[c] ^= var;
            match after {
                0 => {
                    self.mark_unsat(clause);
                    self.break_count[var as usize] -= 1;
                }
                1 => self.break_count[self.critical[c] as usize] += 1,
                _ => {}
            }
        }
    }

    /// Performs one flip in an unsatisfied clause.
    pub fn step(&mut self) {
        if self.unsat.is_empty() {
            return;
        }
        let formula = self.formula;
        let pick = (self.flips % self.unsat.len() as u64) as usize;
        let clause = formula.clause(self.unsat[pick] as usize);

        self.weights.clear();
        let mut total = 0.0;
        for lit in clause {
            total += self
                .probability
                .probability(self.break_count[lit.var() as usize]);
            self.weights.push(total);
        }
        let target = self.rng.next_f64() * total;
        let chosen = self
            .weights
            .iter()
            .position(|&w| target < w)
            .unwrap_or(clause.len() - 1);

        self.flip(clause[chosen].var());
        self.flips += 1;
    }

    /// Flips until satisfied or `max_flips` flips were made.
    pub fn run(&mut self, max_flips: u64) -> bool {
        while !self.is_solved() && self.flips < max_flips {
            self.step();
        }
        self.is_solved()
    }

    #[must_use]
    pub fn is_solved(&self) -> bool {
        self.unsat.is_empty()
    }

    #[must_use]
    pub fn flips(&self) -> u64 {
        self.flips
    }

    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    #[must_use]
    pub fn assignment(&self) -> &[bool] {
        &self.assignment
    }

    /// Number of currently unsatisfied clauses.
    #[must_use]
    pub fn num_unsat(&self) -> usize {
        self.unsat.len()
    }

    /// Recomputes all incremental state and compares.
    #[cfg(test)]
    fn is_consistent(&self) -> bool {
        let mut breaks = vec![0u32; self.formula.num_vars()];
        let mut unsat = 0;
        for index in 0..self.formula.num_clauses() {
            let true_lits: Vec<_> = self
                .formula
                .clause(index)
                .iter()
                .filter(|lit| lit.is_true(&self.assignment))
                .collect();
            if true_lits.len() as u32 != self.true_count[index] {
                return false;
            }
            match true_lits.len() {
                0 => {
                    unsat += 1;
                    let pos = self.unsat_pos[index];
                    if pos == NOT_UNSAT || self.unsat[pos as usize] != index as u32 {
                        return false;
                    }
                }
                1 => breaks[true_lits[0].var() as usize] += 1,
                _ => {}
            }
        }
        breaks == self.break_count && unsat == self.unsat.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probability::ProbabilityFunction;
    use satfarm_format::DimacsCnf;

    fn formula(text: &str) -> Formula {
        Formula::from_dimacs(&DimacsCnf::parse_str(text).unwrap()).unwrap()
    }

    /// A satisfiable random-looking 3-SAT instance with 12 variables.
    const SMALL_SAT: &str = "p cnf 12 20
1 -5 9 0
-2 6 -10 0
3 7 11 0
-4 -8 12 0
5 -9 1 0
2 10 -6 0
-3 -11 7 0
4 8 -12 0
9 2 -3 0
-10 4 5 0
11 -1 6 0
-12 7 8 0
1 2 3 0
-4 -5 -6 0
7 -8 9 0
10 11 -12 0
-1 3 -5 0
2 -4 6 0
-7 8 10 0
9 -11 12 0
";

    #[test]
    fn test_solves_small_instance() {
        let f = formula(SMALL_SAT);
        let prob = ProbabilityFunction::default();
        for seed in 1..20 {
            let mut trial = Trial::new(&f, &prob, seed);
            assert!(trial.run(100_000), "seed {seed} failed");
            assert!(f.is_satisfied_by(trial.assignment()));
            assert!(trial.is_consistent());
        }
    }

    #[test]
    fn test_unsatisfiable_stops_at_budget() {
        let f = formula("p cnf 2 4\n1 2 0\n-1 2 0\n1 -2 0\n-1 -2 0\n");
        let prob = ProbabilityFunction::default();
        let mut trial = Trial::new(&f, &prob, 99);
        assert!(!trial.run(500));
        assert_eq!(trial.flips(), 500);
        assert!(trial.num_unsat() > 0);
        assert!(trial.is_consistent());
    }

    #[test]
    fn test_incremental_state_stays_consistent() {
        let f = formula(SMALL_SAT);
        let prob = ProbabilityFunction::Exponential { cb: 2.5 };
        let mut trial = Trial::new(&f, &prob, 7);
        assert!(trial.is_consistent());
        for _ in 0..200 {
            if trial.is_solved() {
                break;
            }
            trial.step();
            assert!(trial.is_consistent());
        }
    }

    #[test]
    fn test_same_seed_same_run() {
        let f = formula(SMALL_SAT);
        let prob = ProbabilityFunction::default();
        let mut a = Trial::new(&f, &prob, 1234);
        let mut b = Trial::new(&f, &prob, 1234);
        a.run(10_000);
        b.run(10_000);
        assert_eq!(a.flips(), b.flips());
        assert_eq!(a.assignment(), b.assignment());
        assert_eq!(a.seed(), 1234);
    }

    #[test]
    fn test_already_satisfied_needs_no_flips() {
        let f = formula("p cnf 1 1\n1 -1 0\n");
        let prob = ProbabilityFunction::default();
        let mut trial = Trial::new(&f, &prob, 5);
        assert!(trial.run(10));
        assert_eq!(trial.flips(), 0);
    }
}
