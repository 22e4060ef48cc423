//! Tracking of the server-side execution instance.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

/// Instance id continued across executions of one workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceState {
    /// Opaque id assigned by the service or supplied by the caller.
    pub instance_id: String,
    /// When the id was last used by a successful execution.
    pub last_execution_at: Timestamp,
}

/// Single-owner holder of the current [`InstanceState`].
///
/// The id is treated as an opaque token and never validated.
#[derive(Debug, Clone, Default)]
pub struct InstanceTracker {
    state: Option<InstanceState>,
}

impl InstanceTracker {
    /// Creates a tracker without an instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id to forward with the next execution, if any.
    pub fn instance_id(&self) -> Option<&str> {
        self.state.as_ref().map(|state| state.instance_id.as_str())
    }

    /// Returns the full state.
    pub fn state(&self) -> Option<&InstanceState> {
        self.state.as_ref()
    }

    /// Discards the current id; the next execution starts a fresh instance.
    pub fn reset(&mut self) -> Option<InstanceState> {
        self.state.take()
    }

    /// Sets an id supplied from outside, such as one pasted by a user.
    ///
    /// An empty id is the same as [`reset`](Self::reset).
    pub fn adopt(&mut self, instance_id: impl Into<String>) {
        let instance_id = instance_id.into();
        if instance_id.is_empty() {
            self.state = None;
            return;
        }

        let last_execution_at = self
            .state
            .as_ref()
            .map_or_else(Timestamp::now, |state| state.last_execution_at);
        self.state = Some(InstanceState {
            instance_id,
            last_execution_at,
        });
    }

    /// Records a successful execution.
    ///
    /// The id returned by the service wins; without one, the forwarded id is kept.
    pub fn record(&mut self, instance_id: Option<String>) {
        let instance_id = instance_id
            .filter(|id| !id.is_empty())
            .or_else(|| self.state.take().map(|state| state.instance_id));

        self.state = instance_id.map(|instance_id| InstanceState {
            instance_id,
            last_execution_at: Timestamp::now(),
        });
    }
}
