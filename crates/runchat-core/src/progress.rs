//! Execution progress milestones.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, IntoStaticStr};

/// Fraction reached once the schema is available.
pub const SCHEMA_LOADED: f32 = 0.3;
/// Fraction at which uploads begin.
pub const UPLOADS_START: f32 = 0.2;
/// Fraction reached once all uploads finished.
pub const UPLOADS_DONE: f32 = 0.6;
/// Fraction at which the execute call is sent.
pub const EXECUTION_START: f32 = 0.6;
/// Upper bound of server-reported progress.
pub const EXECUTION_END: f32 = 0.95;
/// Fraction reached once the outputs were routed.
pub const COMPLETE: f32 = 1.0;

/// Phase of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(AsRefStr, Display, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Phase {
    /// Fetching the workflow schema.
    Schema,
    /// Uploading image inputs.
    Upload,
    /// Waiting for the service to run the workflow.
    Execute,
    /// Handing outputs to their consumers.
    Route,
    /// Finished.
    Complete,
}

/// A progress update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    /// Current phase.
    pub phase: Phase,
    /// Overall fraction done, in `0.0..=1.0`.
    pub fraction: f32,
    /// Message suitable for a status line.
    pub message: String,
}

/// Produces progress updates whose fractions never decrease.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    current: f32,
}

impl ProgressTracker {
    /// Creates a tracker at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the last reported fraction.
    pub fn current(&self) -> f32 {
        self.current
    }

    /// Reports `fraction`, clamped so it never falls below the previous value.
    pub fn report(&mut self, phase: Phase, fraction: f32, message: impl Into<String>) -> Progress {
        let fraction = if fraction.is_nan() {
            self.current
        } else {
            fraction.clamp(0.0, COMPLETE).max(self.current)
        };
        self.current = fraction;

        Progress {
            phase,
            fraction,
            message: message.into(),
        }
    }

    /// Reports upload progress, mapping `done / total` into the upload span.
    pub fn uploads(&mut self, done: usize, total: usize) -> Progress {
        let ratio = if total == 0 {
            1.0
        } else {
            done as f32 / total as f32
        };
        let fraction = span(UPLOADS_START, UPLOADS_DONE, ratio);
        self.report(
            Phase::Upload,
            fraction,
            format!("Uploaded {done} of {total} images"),
        )
    }

    /// Reports server-side progress, mapping it into the execution span.
    pub fn server(&mut self, status: &str, ratio: f32) -> Progress {
        let fraction = span(EXECUTION_START, EXECUTION_END, ratio);
        self.report(Phase::Execute, fraction, format!("Workflow {status}"))
    }
}

fn span(start: f32, end: f32, ratio: f32) -> f32 {
    start + (end - start) * ratio.clamp(0.0, 1.0)
}
