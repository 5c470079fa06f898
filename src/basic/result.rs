use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, SolverFailure};

/// Outcome of one solve attempt: the payload plus how the iteration stopped.
///
/// A failed attempt still carries a payload so the last bus state can be inspected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerFlowResult<T> {
    pub payload: T,
    /// Iteration count at stop.
    pub iterations: usize,
    pub error: ErrorKind,
    pub message: String,
}

impl<T> PowerFlowResult<T> {
    pub fn new(payload: T, iterations: usize, error: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            payload,
            iterations,
            error,
            message: message.into(),
        }
    }

    pub fn is_converged(&self) -> bool {
        self.error == ErrorKind::None
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> PowerFlowResult<U> {
        PowerFlowResult {
            payload: f(self.payload),
            iterations: self.iterations,
            error: self.error,
            message: self.message,
        }
    }

    /// Discards the diagnostic payload of a failed attempt.
    pub fn into_result(self) -> Result<T, SolverFailure> {
        match self.error {
            ErrorKind::None => Ok(self.payload),
            kind => Err(SolverFailure {
                kind,
                iterations: self.iterations,
                message: self.message,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_result() {
        let ok = PowerFlowResult::new(1, 3, ErrorKind::None, "converged");
        assert!(ok.is_converged());
        assert_eq!(ok.into_result().unwrap(), 1);

        let failed = PowerFlowResult::new(2, 100, ErrorKind::MaxIteration, "budget");
        let err = failed.into_result().unwrap_err();
        assert_eq!(err.kind, ErrorKind::MaxIteration);
        assert_eq!(err.iterations, 100);
        assert_eq!(err.to_string(), "max iteration after 100 iterations: budget");
    }
}
