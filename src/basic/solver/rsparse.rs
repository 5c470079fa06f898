use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::CscMatrix;
use rsparse::{
    data::{Numeric, Sprs, Symb},
    lsolve, lu, sqr, usolve,
};

use super::{Solve, check_dims, check_finite};
use crate::error::SolveError;

/// Sparse LU from `rsparse`, reusing the symbolic analysis while the sparsity pattern is unchanged.
#[derive(Default)]
pub struct RSparseSolver {
    x: Vec<f64>,
    symbolic: Option<Symb>,
    pattern: Option<(Vec<usize>, Vec<usize>)>,
}

impl Solve for RSparseSolver {
    fn solve(&mut self, a: &DMatrix<f64>, b: &mut DVector<f64>) -> Result<(), SolveError> {
        check_dims(a, b)?;
        let n = b.len();
        if n == 0 {
            return Ok(());
        }
        let csc = CscMatrix::from(a);
        let (col_offsets, row_indices, values) = csc.disassemble();
        let same_pattern = self
            .pattern
            .as_ref()
            .is_some_and(|(ap, ai)| *ap == col_offsets && *ai == row_indices);

        let mat = Sprs {
            m: n,
            n,
            p: col_offsets.iter().map(|&v| v as isize).collect(),
            i: row_indices.clone(),
            nzmax: values.len(),
            x: values,
        };
        if !same_pattern {
            self.symbolic = None;
            self.pattern = Some((col_offsets, row_indices));
        }
        let symbolic = self.symbolic.get_or_insert_with(|| sqr(&mat, 1, false));
        self.x.resize(n, 0.0);

        let numeric = lu(&mat, symbolic, 1e-6).map_err(|_| SolveError::Singular)?;
        ipvec(&numeric.pinv, b.as_slice(), &mut self.x); // x = P*b
        lsolve(&numeric.l, &mut self.x); // x = L\x
        usolve(&numeric.u, &mut self.x); // x = U\x
        ipvec(&symbolic.q, &self.x, b.as_mut_slice()); // b = Q*x
        check_finite(b.as_slice())
    }

    fn reset(&mut self) {
        self.symbolic = None;
        self.pattern = None;
    }
}

fn ipvec<T: Numeric<T>>(p: &Option<Vec<isize>>, b: &[T], x: &mut [T]) {
    match p {
        Some(pvec) => {
            for k in 0..b.len() {
                x[pvec[k] as usize] = b[k];
            }
        }
        None => x.copy_from_slice(b),
    }
}
