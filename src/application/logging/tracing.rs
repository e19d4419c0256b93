use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::application::config::configuration::Configuration;

static LOGGER_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

/// Installs a registry with a daily-rolling file layer plus an
/// `RUST_LOG`-driven env filter. Mirrors the teacher's layering, minus the
/// optional tokio-console layer (not part of this crate's dependency set).
pub fn tracing_subscribe(config: &Configuration) -> bool {
    let file_appender = tracing_appender::rolling::daily(config.log_dir(), "llmc.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    _ = LOGGER_GUARD.set(guard);

    let log_writer_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);
    let env_filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(log_writer_layer)
        .with(env_filter_layer)
        .try_init()
        .is_ok()
}
