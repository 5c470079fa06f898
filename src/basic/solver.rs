use nalgebra::{DMatrix, DVector};

use crate::error::SolveError;

mod dense;
pub use dense::*;

#[cfg(feature = "rsparse")]
mod rsparse;
#[cfg(feature = "rsparse")]
pub use rsparse::*;

#[cfg(feature = "rsparse")]
pub type DefaultSolver = RSparseSolver;

#[cfg(not(feature = "rsparse"))]
pub type DefaultSolver = DenseLuSolver;

/// A linear-system backend for the Newton corrections.
pub trait Solve {
    /// Solves `a · x = b`, overwriting `b` with `x`.
    fn solve(&mut self, a: &DMatrix<f64>, b: &mut DVector<f64>) -> Result<(), SolveError>;

    /// Drops any cached factorization. Called whenever the system dimension changes.
    fn reset(&mut self) {}
}

fn check_dims(a: &DMatrix<f64>, b: &DVector<f64>) -> Result<(), SolveError> {
    if a.nrows() != a.ncols() || a.nrows() != b.len() {
        return Err(SolveError::DimensionMismatch {
            rows: a.nrows(),
            cols: a.ncols(),
            rhs: b.len(),
        });
    }
    Ok(())
}

fn check_finite(x: &[f64]) -> Result<(), SolveError> {
    if x.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(SolveError::Singular)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_solver<S: Solve>(mut solver: S) {
        let a = DMatrix::from_row_slice(3, 3, &[4.0, -1.0, 0.0, -1.0, 4.0, -1.0, 0.0, -1.0, 4.0]);
        let x = DVector::from_vec(vec![1.0, 2.0, 3.0]);
        let mut b = &a * &x;
        solver.solve(&a, &mut b).unwrap();
        assert!((b - &x).norm() < 1e-10, "solution mismatch");

        // a second call with the same pattern reuses any cached analysis
        let mut b = &a * DVector::from_vec(vec![-1.0, 0.5, 2.0]);
        solver.solve(&a, &mut b).unwrap();
        assert!((b[1] - 0.5).abs() < 1e-10);

        let singular = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 4.0]);
        let mut rhs = DVector::from_vec(vec![1.0, 1.0]);
        solver.reset();
        assert_eq!(solver.solve(&singular, &mut rhs), Err(SolveError::Singular));

        let mut short = DVector::from_vec(vec![1.0]);
        assert!(matches!(
            solver.solve(&a, &mut short),
            Err(SolveError::DimensionMismatch { rhs: 1, .. })
        ));
    }

    #[test]
    fn test_dense_lu() {
        check_solver(DenseLuSolver::default());
    }

    #[test]
    fn test_default_solver() {
        check_solver(DefaultSolver::default());
        #[cfg(feature = "rsparse")]
        assert_eq!(
            std::any::type_name::<DefaultSolver>(),
            std::any::type_name::<RSparseSolver>()
        );
    }

    #[cfg(feature = "rsparse")]
    #[test]
    fn test_rsparse() {
        check_solver(RSparseSolver::default());
    }
}
