//! Routes `tracing` events from the pgdebug crates into the server log.

use std::io;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter directives, `EnvFilter` syntax (e.g. `pgdebug_hooks=debug`).
pub const LOG_FILTER_ENV: &str = "PGDEBUG_LOG";

const DEFAULT_FILTER: &str = "warn";

/// Buffers one formatted event and emits it at LOG level when dropped.
#[derive(Debug, Default)]
pub struct ServerLogWriter {
    buf: Vec<u8>,
}

impl ServerLogWriter {
    fn take_line(&mut self) -> Option<String> {
        let line = String::from_utf8_lossy(&self.buf).trim_end().to_string();
        self.buf.clear();
        (!line.is_empty()).then_some(line)
    }
}

impl io::Write for ServerLogWriter {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for ServerLogWriter {
    fn drop(&mut self) {
        if let Some(line) = self.take_line() {
            pgrx::log!("{}", line);
        }
    }
}

pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber. Fails if one is already set.
pub fn init() -> Result<(), tracing_subscriber::util::TryInitError> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(ServerLogWriter::default)
        .with_ansi(false)
        .without_time();

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt_layer)
        .try_init()
}
