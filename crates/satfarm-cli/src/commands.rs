//! Manager command registry.

use std::fmt;
use std::path::PathBuf;

use satfarm_base::{Error, Result};

pub const HELP: &str = "\
commands available:
\thelp (shows this message)
\tadd_workers <num_workers> [worker arguments ...]
\tadd_file <start_configs> <max_flips> <formula.cnf>
\twait_for_server
\texit";

/// One manager command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    /// Start workers, passing extra arguments to each worker process.
    AddWorkers { count: u32, worker_args: Vec<String> },
    AddFile {
        start_configs: u32,
        max_flips: u32,
        path: PathBuf,
    },
    /// Wait until the server disconnects, then stop.
    WaitForServer,
    /// Terminate the run and stop.
    Exit,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Help => "help",
            Self::AddWorkers { .. } => "add_workers",
            Self::AddFile { .. } => "add_file",
            Self::WaitForServer => "wait_for_server",
            Self::Exit => "exit",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn number(command: &str, what: &str, field: &str) -> Result<u32> {
    field
        .parse()
        .map_err(|_| Error::Parse(format!("{command}: {what} must be a number, got '{field}'")))
}

/// Parses one input line; blank lines and `#` comments yield `None`.
pub fn parse(line: &str) -> Result<Option<Command>> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let Some((&name, args)) = fields.split_first() else {
        return Ok(None);
    };
    if name.starts_with('#') {
        return Ok(None);
    }

    let arity = |expected: &str| {
        Error::Parse(format!("invalid number of arguments for {name}, expected {expected}"))
    };
    let command = match name {
        "help" => Command::Help,
        "add_workers" => {
            let (count, rest) = args.split_first().ok_or_else(|| arity("<num_workers> ..."))?;
            let count = number(name, "num_workers", count)?;
            if count == 0 {
                return Err(Error::Rejected("add_workers needs at least one worker".into()));
            }
            Command::AddWorkers {
                count,
                worker_args: rest.iter().map(|s| (*s).to_string()).collect(),
            }
        }
        "add_file" => match args {
            [start_configs, max_flips, path] => Command::AddFile {
                start_configs: number(name, "start_configs", start_configs)?,
                max_flips: number(name, "max_flips", max_flips)?,
                path: PathBuf::from(*path),
            },
            _ => return Err(arity("<start_configs> <max_flips> <path>")),
        },
        "wait_for_server" if args.is_empty() => Command::WaitForServer,
        "wait_for_server" => return Err(arity("no arguments")),
        "exit" => Command::Exit,
        other => return Err(Error::Parse(format!("invalid command '{other}'"))),
    };
    Ok(Some(command))
}
