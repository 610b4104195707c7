//! The one error type every fallible operation in this crate returns.

use thiserror::Error;

/// Main error type for execution-recovery operations.
#[derive(Debug, Error)]
pub enum SolveError {
    /// IO error reading a graph or failure-report input.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A graph, failure report, or overlay spec failed validation before
    /// any solver touched it (malformed JSON, dangling edge endpoints,
    /// missing crash node, duplicate ids).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A structural invariant the solvers depend on did not hold (e.g. a
    /// basic-block chain expected to be single-entry/single-exit wasn't,
    /// or a dominator computation did not converge).
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// An observation automaton rejected every path through the graph, so
    /// no node can be classified as reachable under it.
    #[error("unsatisfiable observation: {0}")]
    UnsatObservation(String),

    /// The external SVPA transport (subprocess or otherwise) failed to
    /// start, crashed, or returned a response the protocol can't parse.
    #[error("external solver failure: {0}")]
    ExternalFailure(String),

    /// Two solvers run in comparison mode disagreed on a node's
    /// classification.
    #[error("comparator mismatch: {0}")]
    ComparatorMismatch(String),

    /// Serialization/deserialization error for graph or report JSON.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Configuration error (bad preset name, conflicting options).
    #[error("configuration error: {0}")]
    Config(String),
}

impl SolveError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        SolveError::InvalidInput(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        SolveError::InvariantViolation(msg.into())
    }

    pub fn unsat(msg: impl Into<String>) -> Self {
        SolveError::UnsatObservation(msg.into())
    }

    pub fn external(msg: impl Into<String>) -> Self {
        SolveError::ExternalFailure(msg.into())
    }

    pub fn mismatch(msg: impl Into<String>) -> Self {
        SolveError::ComparatorMismatch(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        SolveError::Config(msg.into())
    }
}

/// Result type alias for cfgsolve operations.
pub type Result<T> = std::result::Result<T, SolveError>;
