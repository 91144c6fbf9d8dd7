//! DIMACS CNF format parser.
//!
//! Standard format used in SAT competitions.

use satfarm_base::{Error, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

/// A DIMACS CNF formula.
#[derive(Debug, Clone)]
pub struct DimacsCnf {
    /// Number of variables declared in the header.
    pub num_vars: usize,
    /// Number of clauses declared in the header.
    pub declared_clauses: usize,
    /// Clauses as vectors of literals.
    pub clauses: Vec<Vec<i64>>,
}

impl DimacsCnf {
    /// Parses DIMACS CNF from a reader.
    ///
    /// Clauses may span several lines and are terminated by `0`. A `%` line
    /// ends the formula, as in the SATLIB benchmark files.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let reader = BufReader::new(reader);
        let mut num_vars = 0;
        let mut declared_clauses = 0;
        let mut clauses = Vec::new();
        let mut clause = Vec::new();
        let mut header_found = false;

        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            let line_no = index + 1;

            // Skip empty lines and comments
            if line.is_empty() || line.starts_with('c') {
                continue;
            }
            if line.starts_with('%') {
                break;
            }

            // Parse header
            if line.starts_with('p') {
                if header_found {
                    return Err(Error::Parse(format!("line {line_no}: duplicate header")));
                }
                let parts: Vec<&str> = line.split_whitespace().collect();
                if parts.len() != 4 || parts[1] != "cnf" {
                    return Err(Error::Parse(format!(
                        "line {line_no}: expected 'p cnf <vars> <clauses>'"
                    )));
                }
                num_vars = parts[2].parse().map_err(|e| {
                    Error::Parse(format!("line {line_no}: invalid variable count: {e}"))
                })?;
                declared_clauses = parts[3].parse().map_err(|e| {
                    Error::Parse(format!("line {line_no}: invalid clause count: {e}"))
                })?;
                header_found = true;
                clauses.reserve(declared_clauses);
                continue;
            }

            if !header_found {
                return Err(Error::Parse(
                    "DIMACS header 'p cnf ...' not found".to_string(),
                ));
            }

            for token in line.split_whitespace() {
                let lit: i64 = token.parse().map_err(|e| {
                    Error::Parse(format!("line {line_no}: invalid literal {token:?}: {e}"))
                })?;
                if lit == 0 {
                    if clause.is_empty() {
                        return Err(Error::Parse(format!("line {line_no}: empty clause")));
                    }
                    clauses.push(std::mem::take(&mut clause));
                } else if lit.unsigned_abs() as usize > num_vars {
                    return Err(Error::Parse(format!(
                        "line {line_no}: literal {lit} exceeds declared {num_vars} variables"
                    )));
                } else {
                    clause.push(lit);
                }
            }
        }

        if !header_found {
            return Err(Error::Parse(
                "DIMACS header 'p cnf ...' not found".to_string(),
            ));
        }
        // Handle a last clause not terminated by 0
        if !clause.is_empty() {
            clauses.push(clause);
        }

        Ok(Self {
            num_vars,
            declared_clauses,
            clauses,
        })
    }

    /// Parses DIMACS CNF from a string.
    pub fn parse_str(s: &str) -> Result<Self> {
        Self::from_reader(s.as_bytes())
    }

    /// Reads and parses a file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| Error::Parse(format!("cannot open {}: {e}", path.display())))?;
        Self::from_reader(file)
    }

    /// Converts to DIMACS string.
    #[must_use]
    pub fn to_dimacs(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("p cnf {} {}\n", self.num_vars, self.clauses.len()));
        for clause in &self.clauses {
            for lit in clause {
                out.push_str(&format!("{lit} "));
            }
            out.push_str("0\n");
        }
        out
    }
}
