use std::{
    env,
    path::{Path, PathBuf},
    sync::LazyLock,
};

pub use config::ConfigError;
use config::{Config, Environment, File, FileFormat, Map};
use serde::Deserialize;

use crate::SmtSolver;

const ENV_PREFIX: &str = "SYMSMT";
const CONFIG_FILE_NAMES: [&str; 2] = ["symsmt.toml", ".symsmt.toml"];

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Flags {
    /// Default solver. Either `z3` or `cvc5`.
    pub solver: SmtSolver,
    /// Path to the solver executable. If absent the solver's name is looked up on `PATH`.
    pub solver_path: Option<PathBuf>,
    /// Deadline in milliseconds for a solve call that doesn't pass its own.
    pub timeout_ms: Option<u64>,
    /// Saves the SMT-LIB transcript of every solve call to [`Self::log_dir`] (debugging)
    pub dump_smt: bool,
    /// Saves every satisfying model as JSON to [`Self::log_dir`] (debugging)
    pub dump_model: bool,
    /// Writes a JSON trace of the library's `tracing` events to [`Self::log_dir`]
    pub trace: bool,
    /// Sets the directory to dump data. Defaults to `./log/`.
    pub log_dir: PathBuf,
}

impl Default for Flags {
    fn default() -> Self {
        Self {
            solver: SmtSolver::default(),
            solver_path: None,
            timeout_ms: None,
            dump_smt: false,
            dump_model: false,
            trace: false,
            log_dir: PathBuf::from("./log/"),
        }
    }
}

impl Flags {
    /// Layers defaults, an optional TOML file and `SYMSMT_*` variables, in increasing precedence.
    ///
    /// `env` replaces the process environment when present.
    pub fn from_sources(
        file: Option<&Path>,
        env: Option<Map<String, String>>,
    ) -> Result<Flags, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .source(env),
        );
        builder.build()?.try_deserialize()
    }
}

fn config_path() -> Option<PathBuf> {
    // find config file in current or parent directories
    let mut path = env::current_dir().ok()?;
    loop {
        for name in CONFIG_FILE_NAMES {
            let file = path.join(name);
            if file.exists() {
                return Some(file);
            }
        }
        if !path.pop() {
            return None;
        }
    }
}

pub(crate) static FLAGS: LazyLock<Flags> = LazyLock::new(|| {
    Flags::from_sources(config_path().as_deref(), None).unwrap_or_else(|err| {
        eprintln!("error: invalid symsmt configuration, using defaults - `{err}`");
        Flags::default()
    })
});
