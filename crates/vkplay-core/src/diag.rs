// SPDX-License-Identifier: CEPL-1.0
//! Driver diagnostics, reported through an injected sink instead of printing
//! from inside the driver callback.

use std::fmt;

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum Severity {
    Verbose,
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Verbose => "verbose",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        })
    }
}

/// Receives validation and driver messages. Called from driver threads, so
/// implementations must be `Send + Sync`.
pub trait DiagnosticSink: Send + Sync {
    fn report(&self, severity: Severity, message: &str);
}

/// Default sink: forwards every report to `tracing` under `vk-validation`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn report(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Verbose => tracing::trace!(target: "vk-validation", "{message}"),
            Severity::Info => tracing::info!(target: "vk-validation", "{message}"),
            Severity::Warning => tracing::warn!(target: "vk-validation", "{message}"),
            Severity::Error => tracing::error!(target: "vk-validation", "{message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording(Mutex<Vec<(Severity, String)>>);

    impl DiagnosticSink for Recording {
        fn report(&self, severity: Severity, message: &str) {
            self.0.lock().unwrap().push((severity, message.to_owned()));
        }
    }

    #[test]
    fn severities_order_from_verbose_to_error() {
        assert!(Severity::Verbose < Severity::Info);
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Error);
        assert_eq!(Severity::Warning.to_string(), "warning");
    }

    #[test]
    fn sink_is_usable_as_trait_object() {
        let sink = std::sync::Arc::new(Recording::default());
        let dyn_sink: std::sync::Arc<dyn DiagnosticSink> = sink.clone();
        dyn_sink.report(Severity::Warning, "layer says hi");
        dyn_sink.report(Severity::Error, "bad handle");

        let got = sink.0.lock().unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[1], (Severity::Error, "bad handle".to_owned()));
    }

    #[test]
    fn tracing_sink_accepts_every_severity() {
        for s in [Severity::Verbose, Severity::Info, Severity::Warning, Severity::Error] {
            TracingSink.report(s, "message");
        }
    }
}
