// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
pub mod diag;
pub mod fatal;

pub use diag::{DiagnosticSink, Severity, TracingSink};
pub use fatal::{AbortOnFatal, FatalHandler, OrFatal, PanicOnFatal};

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Compact formatter filtered by `RUST_LOG` (default `info`), writing to `writer`.
pub fn subscriber<W>(writer: W) -> impl tracing::Subscriber + Send + Sync + 'static
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(writer)
        .compact()
        .finish()
}

/// Installs the global subscriber. Logs, validation reports included, go to stderr.
pub fn init_tracing() {
    let _ = subscriber(std::io::stderr).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn validation_reports_reach_the_configured_writer() {
        let out = Captured::default();
        let writer = out.clone();
        let sub = subscriber(move || writer.clone());
        tracing::subscriber::with_default(sub, || {
            TracingSink.report(Severity::Error, "vkQueueSubmit: fence already in use");
        });
        let text = String::from_utf8_lossy(&out.0.lock().unwrap()).into_owned();
        assert!(text.contains("vkQueueSubmit: fence already in use"), "{text}");
    }
}
