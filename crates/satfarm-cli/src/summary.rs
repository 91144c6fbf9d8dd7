//! Run statistics and report output.
//!
//! Reports go to stdout with a `c ` prefix on every line and, when an output
//! file is given, to that file without the prefix.

use std::io::Write;
use std::time::Duration;

use satfarm_base::Result;
use satfarm_protocol::{SolutionRecord, TaskFile, TaskStatistics};

/// Where report lines are written.
pub struct Report {
    stdout: Box<dyn Write + Send>,
    file: Option<Box<dyn Write + Send>>,
}

impl Report {
    pub fn new(stdout: Box<dyn Write + Send>, file: Option<Box<dyn Write + Send>>) -> Self {
        Self { stdout, file }
    }

    /// Writes one line to both destinations.
    pub fn line(&mut self, text: &str) -> Result<()> {
        writeln!(self.stdout, "c {text}")?;
        if let Some(file) = self.file.as_mut() {
            writeln!(file, "{text}")?;
        }
        Ok(())
    }

    /// Writes a block of lines followed by an empty line.
    pub fn block(&mut self, lines: &[String]) -> Result<()> {
        for line in lines {
            self.line(line)?;
        }
        writeln!(self.stdout)?;
        if let Some(file) = self.file.as_mut() {
            writeln!(file)?;
        }
        self.flush()
    }

    pub fn flush(&mut self) -> Result<()> {
        self.stdout.flush()?;
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

fn ratio(flips: u64, per: u64) -> f64 {
    if per == 0 {
        0.0
    } else {
        flips as f64 / per as f64
    }
}

fn millis(micros: u64) -> f64 {
    micros as f64 / 1000.0
}

/// Statistics of the whole run, merged from every per-file report.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub instances_started: u64,
    pub total_flips: u64,
    pub avg_flips_per_second: f64,
    pub avg_flips_per_var: f64,
    pub avg_flips_per_clause: f64,
    /// Milliseconds.
    pub init_ms: f64,
    /// Milliseconds.
    pub solve_ms: f64,
    /// Milliseconds.
    pub overall_ms: f64,
    pub instances_solved: u64,
    pub min_flips_to_solve: u64,
}

impl Default for RunSummary {
    fn default() -> Self {
        Self {
            instances_started: 0,
            total_flips: 0,
            avg_flips_per_second: 0.0,
            avg_flips_per_var: 0.0,
            avg_flips_per_clause: 0.0,
            init_ms: 0.0,
            solve_ms: 0.0,
            overall_ms: 0.0,
            instances_solved: 0,
            min_flips_to_solve: u64::MAX,
        }
    }
}

impl RunSummary {
    /// Merges one file's statistics, weighting averages by trial count.
    pub fn add_statistics(&mut self, stats: &TaskStatistics) {
        let before = self.instances_started as f64;
        let added = stats.instances_started as f64;
        let total = self.instances_started + stats.instances_started;
        if total > 0 {
            let weigh = |old: f64, new: f64| (old * before + new * added) / total as f64;
            self.avg_flips_per_second = weigh(self.avg_flips_per_second, stats.avg_flips_per_second);
            self.avg_flips_per_var =
                weigh(self.avg_flips_per_var, ratio(stats.total_flips, stats.num_vars));
            self.avg_flips_per_clause =
                weigh(self.avg_flips_per_clause, ratio(stats.total_flips, stats.num_clauses));
        }
        self.instances_started = total;
        self.total_flips += stats.total_flips;
        self.init_ms += millis(stats.init_micros);
        self.solve_ms += millis(stats.solve_micros);
        self.overall_ms += millis(stats.overall_micros);
        self.instances_solved += stats.times_solved;
        if stats.times_solved > 0 {
            self.min_flips_to_solve = self.min_flips_to_solve.min(stats.min_flips_to_solve);
        }
    }

    /// Records a reported solution.
    pub fn add_solution(&mut self, solution: &SolutionRecord) {
        self.min_flips_to_solve = self.min_flips_to_solve.min(solution.flips);
    }

    /// Report lines for the whole run.
    pub fn lines(&self, name: &str) -> Vec<String> {
        let mut lines = vec![
            format!("{name} overall statistic:"),
            format!("{} instances started", self.instances_started),
            format!("{} flips executed", self.total_flips),
            format!("{} flips per second (avg)", self.avg_flips_per_second),
            format!("{} flips per var (avg)", self.avg_flips_per_var),
            format!("{} flips per clause (avg)", self.avg_flips_per_clause),
            format!("{} total init duration (ms)", self.init_ms),
            format!("{} total solve duration (ms)", self.solve_ms),
            format!("{} total overall duration (ms)", self.overall_ms),
            format!("{} instances solved", self.instances_solved),
        ];
        if self.min_flips_to_solve != u64::MAX {
            lines.push(format!("{} flips until solved (min)", self.min_flips_to_solve));
        }
        lines
    }
}

/// Report lines for one file's final statistics.
pub fn file_lines(file: &TaskFile, stats: &TaskStatistics) -> Vec<String> {
    let budget = u64::from(file.max_flips) * u64::from(file.start_configs);
    let mut lines = vec![
        format!("filename: {}", file.filename),
        format!("{} num variables", stats.num_vars),
        format!("{} num clauses", stats.num_clauses),
        format!("{} / {} start configurations", stats.instances_started, file.start_configs),
        format!(
            "{} / ({} * {} = {}) flips",
            stats.total_flips, file.max_flips, file.start_configs, budget
        ),
        format!("{} flips per second (avg)", stats.avg_flips_per_second),
        format!("{} flips per var (avg)", ratio(stats.total_flips, stats.num_vars)),
        format!("{} flips per clause (avg)", ratio(stats.total_flips, stats.num_clauses)),
        format!("{} total init duration (us)", stats.init_micros),
        format!("{} total solve duration (us)", stats.solve_micros),
        format!("{} total overall duration (us)", stats.overall_micros),
        format!("{} times solved", stats.times_solved),
    ];
    if stats.times_solved > 0 {
        lines.push(format!("{} flips until solved (min)", stats.min_flips_to_solve));
    }
    lines
}

/// Report lines for a solution.
pub fn solution_lines(solution: &SolutionRecord) -> Vec<String> {
    let fps = if solution.solve_micros == 0 {
        0.0
    } else {
        (solution.flips as f64 / solution.solve_micros as f64 * 1e6).round()
    };
    vec![
        "SATISFIABLE".to_string(),
        format!("filename: {}", solution.filename),
        format!("seed: {}", solution.seed),
        format!("num_flips_done: {}", solution.flips),
        format!("solve_duration: {} ms", millis(solution.solve_micros)),
        format!("num_vars: {}", solution.num_vars),
        format!("num_clauses: {}", solution.num_clauses),
        format!("flips per second: {fps}"),
        format!("flips per var: {}", ratio(solution.flips, solution.num_vars)),
        format!("flips per clause: {}", ratio(solution.flips, solution.num_clauses)),
    ]
}

/// Report line for a duration in milliseconds.
pub fn duration_line(label: &str, duration: Duration) -> String {
    format!("{label}: {} ms", duration.as_secs_f64() * 1000.0)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Writer whose output stays readable after being boxed.
    #[derive(Clone, Default)]
    pub(crate) struct Captured(pub Arc<Mutex<Vec<u8>>>);

    impl Captured {
        pub(crate) fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn stats(started: u64, flips: u64, fps: f64, vars: u64, clauses: u64) -> TaskStatistics {
        TaskStatistics {
            instances_started: started,
            total_flips: flips,
            avg_flips_per_second: fps,
            num_vars: vars,
            num_clauses: clauses,
            ..TaskStatistics::default()
        }
    }

    #[test]
    fn test_weighted_merge() {
        let mut summary = RunSummary::default();
        summary.add_statistics(&stats(1, 100, 10.0, 10, 50));
        summary.add_statistics(&stats(3, 600, 30.0, 20, 100));
        assert_eq!(summary.instances_started, 4);
        assert_eq!(summary.total_flips, 700);
        assert!((summary.avg_flips_per_second - 25.0).abs() < 1e-9);
        // 10 flips/var weighted 1, 30 flips/var weighted 3
        assert!((summary.avg_flips_per_var - 25.0).abs() < 1e-9);
        assert!((summary.avg_flips_per_clause - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_unstarted_file_changes_nothing() {
        let mut summary = RunSummary::default();
        summary.add_statistics(&stats(0, 0, 0.0, 0, 0));
        assert_eq!(summary, RunSummary::default());
    }

    #[test]
    fn test_min_flips_from_solutions() {
        let mut summary = RunSummary::default();
        assert!(!summary.lines("run").iter().any(|l| l.contains("until solved")));
        summary.add_solution(&SolutionRecord {
            seed: 1,
            flips: 77,
            solve_micros: 10,
            num_vars: 7,
            num_clauses: 11,
            filename: "a.cnf".into(),
        });
        assert_eq!(summary.min_flips_to_solve, 77);
        assert!(summary
            .lines("run")
            .contains(&"77 flips until solved (min)".to_string()));
    }

    #[test]
    fn test_report_prefixes_stdout_only() {
        let out = Captured::default();
        let file = Captured::default();
        let mut report = Report::new(Box::new(out.clone()), Some(Box::new(file.clone())));
        report
            .block(&["SATISFIABLE".to_string(), "seed: 4".to_string()])
            .unwrap();
        assert_eq!(out.text(), "c SATISFIABLE\nc seed: 4\n\n");
        assert_eq!(file.text(), "SATISFIABLE\nseed: 4\n\n");
    }

    #[test]
    fn test_solution_lines() {
        let lines = solution_lines(&SolutionRecord {
            seed: 5,
            flips: 2000,
            solve_micros: 1000,
            num_vars: 10,
            num_clauses: 40,
            filename: "/data/x.cnf".into(),
        });
        assert_eq!(lines[0], "SATISFIABLE");
        assert!(lines.contains(&"flips per second: 2000000".to_string()));
        assert!(lines.contains(&"flips per clause: 50".to_string()));
    }

    #[test]
    fn test_file_lines() {
        let file = TaskFile {
            start_configs: 4,
            max_flips: 100,
            filename: "a.cnf".into(),
        };
        let lines = file_lines(&file, &stats(4, 400, 1.0, 10, 20));
        assert!(lines.contains(&"4 / 4 start configurations".to_string()));
        assert!(lines.contains(&"400 / (100 * 4 = 400) flips".to_string()));
        assert!(!lines.iter().any(|l| l.contains("until solved")));
    }
}
