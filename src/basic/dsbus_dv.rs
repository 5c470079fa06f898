use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;
use num_complex::Complex64;
use num_traits::Zero;

fn diag(values: &[Complex64]) -> CsrMatrix<Complex64> {
    let mut mat = CsrMatrix::identity(values.len());
    mat.values_mut().copy_from_slice(values);
    mat
}

fn conjugate(mut mat: CsrMatrix<Complex64>) -> CsrMatrix<Complex64> {
    mat.values_mut().iter_mut().for_each(|v| *v = v.conj());
    mat
}

/// Partial derivatives of the bus power injections with respect to voltage magnitudes and
/// angles, in complex matrix form.
///
/// Returns `(dS_dVm, dS_dVa)` with
///
/// * `dS_dVm = diag(V) · conj(Y · diag(V/|V|)) + conj(diag(I)) · diag(V/|V|)`
/// * `dS_dVa = j · diag(V) · conj(diag(I) − Y · diag(V))`
///
/// where `I = Y · V`. Buses with zero voltage get a zero normalized voltage.
///
/// R. D. Zimmerman, "AC Power Flows, Generalized OPF Costs and their Derivatives using Complex
/// Matrix Notation", MATPOWER Technical Note 2, February 2010.
#[allow(non_snake_case)]
pub fn dSbus_dV(
    Ybus: &CsrMatrix<Complex64>,
    v: &DVector<Complex64>,
) -> (CsrMatrix<Complex64>, CsrMatrix<Complex64>) {
    let ibus: DVector<Complex64> = Ybus * v;
    let vnorm: Vec<Complex64> = v
        .iter()
        .map(|x| if x.is_zero() { Complex64::zero() } else { *x / x.norm() })
        .collect();
    let diagV = diag(v.as_slice());
    let diagVnorm = diag(&vnorm);
    let diagIbus = diag(ibus.as_slice());

    let dS_dVm =
        &(&diagV * &conjugate(Ybus * &diagVnorm)) + &(&conjugate(diagIbus.clone()) * &diagVnorm);
    let dS_dVa = &(&diagV * &conjugate(&diagIbus - &(Ybus * &diagV))) * Complex64::i();
    (dS_dVm, dS_dVa)
}
