pub mod basic;
pub mod error;
pub mod io;
pub mod testcases;

pub mod prelude {
    use crate::basic;
    pub use basic::jacobian::{
        ComplexJacobian, FastDecoupledJacobian, JacobianStrategy, PowerBasedJacobian,
        StandardJacobian,
    };
    pub use basic::solver::{DefaultSolver, DenseLuSolver, Solve};
    #[cfg(feature = "rsparse")]
    pub use basic::solver::RSparseSolver;
    pub use basic::*;

    pub use crate::error::{ErrorKind, NetworkError, SolveError, SolverFailure};
    pub use crate::io::{Case, load_case, load_csv_folder};
}
