//! Error types shared across the crate.

use std::time::Duration;

use thiserror::Error;

use crate::naming::GlobalRef;

/// Errors reported by stencil cells, ports and the evaluator capability.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CellError {
    /// `connect_input_ports` received fewer references than the cell has inputs.
    #[error("insufficient number of input bindings: expected {expected}, got {supplied}")]
    InsufficientBindings {
        /// Number of input ports on the cell.
        expected: usize,
        /// Number of references actually supplied.
        supplied: usize,
    },

    /// The operation is not valid in the cell's current lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// The evaluator could not allocate a value buffer.
    #[error("evaluator could not allocate a value buffer")]
    ResourceExhausted,

    /// No component is registered under the given reference.
    #[error("no component registered for {0}")]
    Unresolved(GlobalRef),

    /// The scheduler no longer accepts tasks.
    #[error("scheduler has shut down")]
    SchedulerShutdown,

    /// The evaluator rejected its inputs.
    #[error("evaluation failed: {0}")]
    Evaluation(String),

    /// The driver panicked; carries the panic message.
    #[error("driver panicked: {0}")]
    Panicked(String),
}

/// Errors produced while loading or validating a [`SchedulerConfig`](crate::threads::SchedulerConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The JSON document could not be parsed.
    #[error("malformed scheduler configuration: {0}")]
    Json(#[from] serde_json::Error),

    /// A field holds a value outside its valid range.
    #[error("invalid scheduler configuration: {0}")]
    Invalid(String),

    /// An environment override could not be parsed.
    #[error("environment variable {var} has unparsable value {value:?}")]
    Env {
        /// Variable name.
        var: &'static str,
        /// Raw value found in the environment.
        value: String,
    },
}

/// Errors produced while starting a [`Scheduler`](crate::threads::Scheduler).
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A worker thread could not be started.
    #[error("failed to start worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// A timed wait ran out before the awaited event happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("timed out after {0:?}")]
pub struct Elapsed(pub Duration);
