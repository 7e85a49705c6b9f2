use std::{fs, io, sync::Arc};

use symsmt_config as config;
use tracing::{Dispatch, Level};
use tracing_subscriber::{Registry, filter::Targets, fmt::writer::BoxMakeWriter, prelude::*};

const TRACE_FILE: &str = "trace";

/// Installs a global subscriber writing the library's events as JSON to `log_dir/trace`.
///
/// Does nothing unless tracing is switched on in the configuration. Fails if another global
/// subscriber was installed first.
pub fn install() -> io::Result<()> {
    if config::trace() {
        let log_dir = config::log_dir();
        fs::create_dir_all(log_dir)?;
        let file = fs::File::create(log_dir.join(TRACE_FILE))?;
        let writer = BoxMakeWriter::new(Arc::new(file));
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .json()
            .with_filter(
                Targets::new()
                    .with_target("symsmt::session", Level::DEBUG)
                    .with_target("symsmt::compile", Level::DEBUG)
                    .with_target("symsmt::smtlib", Level::TRACE),
            );
        let dispatch = Dispatch::new(Registry::default().with(fmt_layer));
        dispatch.try_init().map_err(io::Error::other)?;
    }
    Ok(())
}
