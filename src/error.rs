//! Error types shared by the network model and the solver engines.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::basic::network::BusId;

/// Malformed input detected before any iteration runs.
///
/// These are precondition violations: they are returned as `Err` from the
/// entry points and never folded into [`ErrorKind`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NetworkError {
    #[error("bus {0} is defined more than once")]
    DuplicateBus(BusId),
    #[error("line {line} references unknown bus {bus}")]
    UnknownBus { line: i64, bus: BusId },
    #[error("line {line} connects bus {bus} to itself")]
    SelfLoop { line: i64, bus: BusId },
    #[error("line {line} is connected to isolated bus {bus}")]
    IsolatedBusConnected { line: i64, bus: BusId },
    #[error("line {line} has zero series impedance")]
    ZeroImpedance { line: i64 },
    #[error("network has no slack bus")]
    NoSlackBus,
    #[error("network has more than one slack bus: {0:?}")]
    MultipleSlackBuses(Vec<BusId>),
    #[error("bus {bus} is not connected to the slack bus")]
    Unreachable { bus: BusId },
    #[error("unknown bus type tag `{0}`")]
    UnknownBusType(String),
    #[error("invalid case data: {0}")]
    Parse(String),
    #[error("failed to read case file: {0}")]
    Io(String),
}

impl From<std::io::Error> for NetworkError {
    fn from(value: std::io::Error) -> Self {
        NetworkError::Io(value.to_string())
    }
}

impl From<serde_json::Error> for NetworkError {
    fn from(value: serde_json::Error) -> Self {
        NetworkError::Parse(value.to_string())
    }
}

impl From<csv::Error> for NetworkError {
    fn from(value: csv::Error) -> Self {
        NetworkError::Parse(value.to_string())
    }
}

/// Failure reported by a linear-system backend.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolveError {
    #[error("matrix is singular or ill-conditioned")]
    Singular,
    #[error("dimension mismatch: matrix is {rows}x{cols}, right-hand side has {rhs} rows")]
    DimensionMismatch { rows: usize, cols: usize, rhs: usize },
    #[error("linear solver backend failed: {0}")]
    Backend(&'static str),
}

/// Numerical outcome of a solve attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Converged within the threshold.
    #[default]
    None,
    /// Iteration budget exhausted.
    MaxIteration,
    /// Error grew relative to the stored reference.
    Divergence,
    /// Jacobian, diagonal admittance or linear solve was singular.
    NumericSingularity,
    /// Stopped by a cancel token or deadline.
    Cancelled,
}

impl ErrorKind {
    pub fn is_failure(&self) -> bool {
        *self != ErrorKind::None
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::None => "none",
            ErrorKind::MaxIteration => "max iteration",
            ErrorKind::Divergence => "divergence",
            ErrorKind::NumericSingularity => "numeric singularity",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A failed [`PowerFlowResult`](crate::basic::result::PowerFlowResult) turned into an error.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind} after {iterations} iterations: {message}")]
pub struct SolverFailure {
    pub kind: ErrorKind,
    pub iterations: usize,
    pub message: String,
}
