//! Error types for Spate.

use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SpateError>;

#[derive(Error, Debug)]
pub enum SpateError {
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Backlog exhausted: a non-blocking wait strategy stalled past its
    /// bound, or a backpressure buffer hit its hard cap. Iteration-level
    /// failure, never silently dropped.
    #[error("backlog exhausted: {detail}")]
    TargetOverflow { detail: String },

    /// Submission attempted outside the `Running` lifecycle state.
    #[error("dispatch target is {state}")]
    TargetUnavailable { state: &'static str },

    /// Teardown wait exceeded its bound. Carries the last known signal
    /// counts so a stuck target can be diagnosed.
    #[error(
        "completion wait timed out after {waited:?}: {outstanding} of {expected} terminal signals outstanding"
    )]
    CompletionTimeout {
        waited: Duration,
        outstanding: u64,
        expected: u64,
    },

    /// A sink delivered a second terminal signal to the same gate. This is
    /// a harness bug, not a property of the target under test.
    #[error("terminal signal delivered twice to the same completion gate")]
    DoubleSignal,

    /// The target itself faulted while dispatching.
    #[error("upstream failure: {reason}")]
    Upstream { reason: String },

    #[error("system resource: {message}")]
    SystemResource { message: String },
}

impl SpateError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig { message: message.into() }
    }

    pub fn upstream(reason: impl Into<String>) -> Self {
        Self::Upstream { reason: reason.into() }
    }

    pub fn system_resource(message: impl Into<String>) -> Self {
        Self::SystemResource { message: message.into() }
    }

    /// Faults that indicate the harness itself is broken. These abort the
    /// whole run; everything else fails a single iteration.
    pub fn is_harness_fault(&self) -> bool {
        matches!(self, Self::DoubleSignal)
    }
}
