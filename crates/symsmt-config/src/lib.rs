pub mod flags;

use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use flags::FLAGS;
pub use flags::{ConfigError, Flags};
use serde::Deserialize;

pub fn solver() -> SmtSolver {
    FLAGS.solver
}

pub fn solver_path() -> Option<&'static Path> {
    FLAGS.solver_path.as_deref()
}

/// Deadline applied to a solve call when the caller does not pass one.
pub fn default_timeout() -> Option<Duration> {
    FLAGS.timeout_ms.map(Duration::from_millis)
}

pub fn dump_smt() -> bool {
    FLAGS.dump_smt
}

pub fn dump_model() -> bool {
    FLAGS.dump_model
}

pub fn trace() -> bool {
    FLAGS.trace
}

pub fn log_dir() -> &'static PathBuf {
    &FLAGS.log_dir
}

#[derive(Clone, Copy, Debug, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(try_from = "String")]
pub enum SmtSolver {
    #[default]
    Z3,
    CVC5,
}

impl SmtSolver {
    const ERROR: &'static str = "expected one of `z3` or `cvc5`";

    /// Name of the executable looked up on `PATH` when no explicit path is configured.
    pub fn binary(self) -> &'static str {
        match self {
            SmtSolver::Z3 => "z3",
            SmtSolver::CVC5 => "cvc5",
        }
    }

    /// Arguments that put the solver in interactive SMT-LIB mode reading from stdin.
    pub fn args(self) -> &'static [&'static str] {
        match self {
            SmtSolver::Z3 => &["-in", "-smt2"],
            SmtSolver::CVC5 => &["--lang=smt2", "--incremental"],
        }
    }
}

impl FromStr for SmtSolver {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.to_ascii_lowercase();
        match s.as_str() {
            "z3" => Ok(SmtSolver::Z3),
            "cvc5" => Ok(SmtSolver::CVC5),
            _ => Err(Self::ERROR),
        }
    }
}

impl TryFrom<String> for SmtSolver {
    type Error = &'static str;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for SmtSolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SmtSolver::Z3 => write!(f, "z3"),
            SmtSolver::CVC5 => write!(f, "cvc5"),
        }
    }
}

/// Everything needed to start one solver process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SolverConfig {
    pub solver: SmtSolver,
    /// Explicit path to the executable. Falls back to [`SmtSolver::binary`] looked up on `PATH`.
    pub path: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

impl SolverConfig {
    pub fn new(solver: SmtSolver) -> Self {
        Self { solver, path: None, timeout: None }
    }

    /// The solver configured for this process through `symsmt.toml` and `SYMSMT_*` variables.
    pub fn from_flags() -> Self {
        Self { solver: solver(), path: solver_path().map(Path::to_path_buf), timeout: default_timeout() }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn program(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| PathBuf::from(self.solver.binary()))
    }
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self::from_flags()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solver_names_are_case_insensitive() {
        assert_eq!("Z3".parse::<SmtSolver>(), Ok(SmtSolver::Z3));
        assert_eq!("cvc5".parse::<SmtSolver>(), Ok(SmtSolver::CVC5));
        assert_eq!("CVC5".parse::<SmtSolver>(), Ok(SmtSolver::CVC5));
        assert!("yices".parse::<SmtSolver>().is_err());
    }

    #[test]
    fn program_defaults_to_binary_name() {
        let cfg = SolverConfig::new(SmtSolver::CVC5);
        assert_eq!(cfg.program(), PathBuf::from("cvc5"));
        let cfg = cfg.with_path("/opt/bin/cvc5-1.2");
        assert_eq!(cfg.program(), PathBuf::from("/opt/bin/cvc5-1.2"));
    }
}
