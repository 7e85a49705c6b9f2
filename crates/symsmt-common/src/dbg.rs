//! Dumps of solver transcripts and models meant for developers.
use std::{
    fs,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
};

use serde::Serialize;
use symsmt_config as config;

static DUMP_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// A fresh base name for the dumps of one solve call, e.g. `solve-3`.
pub fn next_dump_name() -> String {
    format!("solve-{}", DUMP_COUNTER.fetch_add(1, Ordering::Relaxed))
}

pub fn writer_for(dir: &Path, name: &str, ext: impl AsRef<str>) -> io::Result<impl io::Write> {
    fs::create_dir_all(dir)?;
    let file = fs::File::create(dump_path(dir, name, ext))?;
    Ok(BufWriter::new(file))
}

fn dump_path(dir: &Path, name: &str, ext: impl AsRef<str>) -> PathBuf {
    dir.join(format!("{name}.{}", ext.as_ref()))
}

/// Saves an SMT-LIB transcript as `<log_dir>/<name>.smt2` when `dump_smt` is set.
pub fn dump_smt(name: &str, transcript: &str) -> io::Result<()> {
    if config::dump_smt() {
        write_smt(config::log_dir(), name, transcript)?;
    }
    Ok(())
}

/// Saves a model as `<log_dir>/<name>.model.json` when `dump_model` is set.
pub fn dump_model<T: Serialize>(name: &str, model: &T) -> io::Result<()> {
    if config::dump_model() {
        write_json(config::log_dir(), name, model)?;
    }
    Ok(())
}

fn write_smt(dir: &Path, name: &str, transcript: &str) -> io::Result<()> {
    let mut writer = writer_for(dir, name, "smt2")?;
    writer.write_all(transcript.as_bytes())?;
    writer.flush()
}

fn write_json<T: Serialize>(dir: &Path, name: &str, val: &T) -> io::Result<()> {
    let mut writer = writer_for(dir, name, "model.json")?;
    serde_json::to_writer_pretty(&mut writer, val)?;
    writer.flush()
}
