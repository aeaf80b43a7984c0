//! User-facing notification sink (the toast list of a UI host).

use std::fmt;

use parking_lot::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        })
    }
}

pub trait Reporter: Send + Sync {
    fn report(&self, message: &str, severity: Severity);
}

/// Default sink for headless use: every report becomes a log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, message: &str, severity: Severity) {
        match severity {
            Severity::Info => info!(target: "agora::report", %severity, "{message}"),
            Severity::Warning | Severity::Error => {
                warn!(target: "agora::report", %severity, "{message}")
            }
        }
    }
}

/// Keeps every report in memory; used by hosts that render their own list.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    entries: Mutex<Vec<(String, Severity)>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(String, Severity)> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Reporter for RecordingReporter {
    fn report(&self, message: &str, severity: Severity) {
        self.entries.lock().push((message.to_owned(), severity));
    }
}
