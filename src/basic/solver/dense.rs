use nalgebra::{DMatrix, DVector};

use super::{Solve, check_dims, check_finite};
use crate::error::SolveError;

/// Partial-pivot LU from nalgebra.
#[derive(Debug, Default, Clone, Copy)]
pub struct DenseLuSolver;

impl Solve for DenseLuSolver {
    fn solve(&mut self, a: &DMatrix<f64>, b: &mut DVector<f64>) -> Result<(), SolveError> {
        check_dims(a, b)?;
        if b.is_empty() {
            return Ok(());
        }
        let lu = a.clone().lu();
        if !lu.solve_mut(b) {
            return Err(SolveError::Singular);
        }
        check_finite(b.as_slice())
    }
}
