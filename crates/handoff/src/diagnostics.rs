use std::sync::Mutex;

use crate::error::{ErrorClass, HandoffError};

/// Receives errors that must not propagate to their caller.
///
/// Paint callbacks run on the browser engine's own threads, and an error
/// escaping there takes the engine down; the render loop likewise degrades
/// to "skip this frame". Both report here instead.
pub trait DiagnosticsSink: Send + Sync {
    fn report(&self, error: &HandoffError);
}

/// Default sink that logs through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn report(&self, error: &HandoffError) {
        match error.class() {
            ErrorClass::Transient => {
                tracing::debug!(error = %error, "transient handoff error; keeping last frame")
            }
            ErrorClass::DeviceLoss => {
                tracing::error!(error = %error, "GPU device lost; handoff stopped")
            }
            ErrorClass::Configuration => {
                tracing::warn!(error = %error, "handoff running in a reduced paint path")
            }
            ErrorClass::InvalidFrame | ErrorClass::Panic => {
                tracing::warn!(error = %error, class = ?error.class(), "dropped frame")
            }
        }
    }
}

/// Sink that keeps every report, for tests and post-mortem dumps.
#[derive(Debug, Default)]
pub struct RecordingSink {
    reports: Mutex<Vec<HandoffError>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<HandoffError> {
        self.reports
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn count(&self, class: ErrorClass) -> usize {
        self.reports()
            .iter()
            .filter(|error| error.class() == class)
            .count()
    }
}

impl DiagnosticsSink for RecordingSink {
    fn report(&self, error: &HandoffError) {
        self.reports
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(error.clone());
    }
}
