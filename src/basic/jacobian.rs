use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::CsrMatrix;
use num_complex::Complex64;

use super::bus_state::{BusResult, calc_bus_power};
use super::dsbus_dv::dSbus_dV;
use super::indexing::NRBuses;
use super::network::y_entry;

/// Builds the four Jacobian blocks of the polar power-flow equations.
///
/// `J1 = ∂P/∂θ` is `N×N`, `J2 = ∂P/∂|V|` is `N×Npq`, `J3 = ∂Q/∂θ` is `Npq×N` and
/// `J4 = ∂Q/∂|V|` is `Npq×Npq`, laid out by the indices assigned in [`reindex_bus_pq`].
///
/// [`reindex_bus_pq`]: super::indexing::reindex_bus_pq
pub trait JacobianStrategy {
    fn name(&self) -> &'static str;

    fn create_j1(&self, y_bus: &CsrMatrix<Complex64>, buses: &[BusResult], idx: &NRBuses) -> DMatrix<f64>;
    fn create_j2(&self, y_bus: &CsrMatrix<Complex64>, buses: &[BusResult], idx: &NRBuses) -> DMatrix<f64>;
    fn create_j3(&self, y_bus: &CsrMatrix<Complex64>, buses: &[BusResult], idx: &NRBuses) -> DMatrix<f64>;
    fn create_j4(&self, y_bus: &CsrMatrix<Complex64>, buses: &[BusResult], idx: &NRBuses) -> DMatrix<f64>;

    /// `[[J1, J2], [J3, J4]]`
    fn create_j_matrix(
        &self,
        y_bus: &CsrMatrix<Complex64>,
        buses: &[BusResult],
        idx: &NRBuses,
    ) -> DMatrix<f64> {
        assemble_blocks(
            idx,
            &self.create_j1(y_bus, buses, idx),
            &self.create_j2(y_bus, buses, idx),
            &self.create_j3(y_bus, buses, idx),
            &self.create_j4(y_bus, buses, idx),
        )
    }
}

pub fn assemble_blocks(
    idx: &NRBuses,
    j1: &DMatrix<f64>,
    j2: &DMatrix<f64>,
    j3: &DMatrix<f64>,
    j4: &DMatrix<f64>,
) -> DMatrix<f64> {
    let (n, npq) = (idx.n(), idx.npq());
    let mut j = DMatrix::zeros(n + npq, n + npq);
    j.view_mut((0, 0), (n, n)).copy_from(j1);
    j.view_mut((0, n), (n, npq)).copy_from(j2);
    j.view_mut((n, 0), (npq, n)).copy_from(j3);
    j.view_mut((n, n), (npq, npq)).copy_from(j4);
    j
}

/// Polar terms of one admittance entry: `|Y_kn|` and `δk − δn − θkn`.
struct Coupling {
    n: usize,
    y: f64,
    vn: f64,
    angle: f64,
}

fn couplings<'a>(
    y_bus: &'a CsrMatrix<Complex64>,
    buses: &'a [BusResult],
    k: usize,
) -> impl Iterator<Item = Coupling> + 'a {
    let (start, end) = (y_bus.row_offsets()[k], y_bus.row_offsets()[k + 1]);
    let dk = buses[k].v.arg();
    y_bus.col_indices()[start..end]
        .iter()
        .zip(&y_bus.values()[start..end])
        .map(move |(&n, y)| {
            let (ym, yt) = y.to_polar();
            Coupling {
                n,
                y: ym,
                vn: buses[n].v.norm(),
                angle: dk - buses[n].v.arg() - yt,
            }
        })
}

/// Textbook polar derivatives evaluated entry by entry from the sparse admittance.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardJacobian;

impl JacobianStrategy for StandardJacobian {
    fn name(&self) -> &'static str {
        "standard"
    }

    fn create_j1(&self, y_bus: &CsrMatrix<Complex64>, buses: &[BusResult], idx: &NRBuses) -> DMatrix<f64> {
        let (rows, cols) = idx.j1_dim();
        let mut j1 = DMatrix::zeros(rows, cols);
        for (r, &k) in idx.non_slack.iter().enumerate() {
            let vk = buses[k].v.norm();
            let mut diag = 0.0;
            for c in couplings(y_bus, buses, k).filter(|c| c.n != k) {
                let term = vk * c.y * c.vn * c.angle.sin();
                diag -= term;
                if let Some(col) = buses[c.n].angle_index {
                    j1[(r, col)] = term;
                }
            }
            j1[(r, r)] = diag;
        }
        j1
    }

    fn create_j2(&self, y_bus: &CsrMatrix<Complex64>, buses: &[BusResult], idx: &NRBuses) -> DMatrix<f64> {
        let (rows, cols) = idx.j2_dim();
        let mut j2 = DMatrix::zeros(rows, cols);
        for (r, &k) in idx.non_slack.iter().enumerate() {
            let vk = buses[k].v.norm();
            let mut diag = 0.0;
            for c in couplings(y_bus, buses, k) {
                diag += c.y * c.vn * c.angle.cos();
                if c.n == k {
                    diag += vk * c.y * c.angle.cos();
                } else if let Some(col) = buses[c.n].vm_index {
                    j2[(r, col)] = vk * c.y * c.angle.cos();
                }
            }
            if let Some(col) = buses[k].vm_index {
                j2[(r, col)] = diag;
            }
        }
        j2
    }

    fn create_j3(&self, y_bus: &CsrMatrix<Complex64>, buses: &[BusResult], idx: &NRBuses) -> DMatrix<f64> {
        let (rows, cols) = idx.j3_dim();
        let mut j3 = DMatrix::zeros(rows, cols);
        for (r, &k) in idx.pq.iter().enumerate() {
            let vk = buses[k].v.norm();
            let mut diag = 0.0;
            for c in couplings(y_bus, buses, k).filter(|c| c.n != k) {
                let term = vk * c.y * c.vn * c.angle.cos();
                diag += term;
                if let Some(col) = buses[c.n].angle_index {
                    j3[(r, col)] = -term;
                }
            }
            if let Some(col) = buses[k].angle_index {
                j3[(r, col)] = diag;
            }
        }
        j3
    }

    fn create_j4(&self, y_bus: &CsrMatrix<Complex64>, buses: &[BusResult], idx: &NRBuses) -> DMatrix<f64> {
        let (rows, cols) = idx.j4_dim();
        let mut j4 = DMatrix::zeros(rows, cols);
        for (r, &k) in idx.pq.iter().enumerate() {
            let vk = buses[k].v.norm();
            let mut diag = 0.0;
            for c in couplings(y_bus, buses, k) {
                diag += c.y * c.vn * c.angle.sin();
                if c.n == k {
                    diag += vk * c.y * c.angle.sin();
                } else if let Some(col) = buses[c.n].vm_index {
                    j4[(r, col)] = vk * c.y * c.angle.sin();
                }
            }
            j4[(r, r)] = diag;
        }
        j4
    }
}

/// Same off-diagonal terms as [`StandardJacobian`], diagonals written through the computed bus
/// power `P_k + jQ_k`:
/// `J1kk = −Qk − Bkk·Vk²`, `J2kk = Pk/Vk + Gkk·Vk`, `J3kk = Pk − Gkk·Vk²`, `J4kk = Qk/Vk − Bkk·Vk`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PowerBasedJacobian;

impl PowerBasedJacobian {
    fn diagonal_terms(
        y_bus: &CsrMatrix<Complex64>,
        buses: &[BusResult],
        k: usize,
    ) -> (Complex64, Complex64, f64) {
        (
            calc_bus_power(k, y_bus, buses),
            y_entry(y_bus, k, k),
            buses[k].v.norm(),
        )
    }
}

impl JacobianStrategy for PowerBasedJacobian {
    fn name(&self) -> &'static str {
        "power-based"
    }

    fn create_j1(&self, y_bus: &CsrMatrix<Complex64>, buses: &[BusResult], idx: &NRBuses) -> DMatrix<f64> {
        let mut j1 = StandardJacobian.create_j1(y_bus, buses, idx);
        for (r, &k) in idx.non_slack.iter().enumerate() {
            let (s, ykk, vk) = Self::diagonal_terms(y_bus, buses, k);
            j1[(r, r)] = -s.im - ykk.im * vk * vk;
        }
        j1
    }

    fn create_j2(&self, y_bus: &CsrMatrix<Complex64>, buses: &[BusResult], idx: &NRBuses) -> DMatrix<f64> {
        let mut j2 = StandardJacobian.create_j2(y_bus, buses, idx);
        for (r, &k) in idx.non_slack.iter().enumerate() {
            if let Some(col) = buses[k].vm_index {
                let (s, ykk, vk) = Self::diagonal_terms(y_bus, buses, k);
                j2[(r, col)] = s.re / vk + ykk.re * vk;
            }
        }
        j2
    }

    fn create_j3(&self, y_bus: &CsrMatrix<Complex64>, buses: &[BusResult], idx: &NRBuses) -> DMatrix<f64> {
        let mut j3 = StandardJacobian.create_j3(y_bus, buses, idx);
        for (r, &k) in idx.pq.iter().enumerate() {
            if let Some(col) = buses[k].angle_index {
                let (s, ykk, vk) = Self::diagonal_terms(y_bus, buses, k);
                j3[(r, col)] = s.re - ykk.re * vk * vk;
            }
        }
        j3
    }

    fn create_j4(&self, y_bus: &CsrMatrix<Complex64>, buses: &[BusResult], idx: &NRBuses) -> DMatrix<f64> {
        let mut j4 = StandardJacobian.create_j4(y_bus, buses, idx);
        for (r, &k) in idx.pq.iter().enumerate() {
            let (s, ykk, vk) = Self::diagonal_terms(y_bus, buses, k);
            j4[(r, r)] = s.im / vk - ykk.im * vk;
        }
        j4
    }
}

/// Flat-voltage approximation: `J1kn = −|Vk|·Bkn`, `J4kn = −|Vk|·Bkn`, `J2 = J3 = 0`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FastDecoupledJacobian;

fn susceptance_block(
    y_bus: &CsrMatrix<Complex64>,
    buses: &[BusResult],
    rows: &[usize],
    column_of: impl Fn(&BusResult) -> Option<usize>,
) -> DMatrix<f64> {
    let mut block = DMatrix::zeros(rows.len(), rows.len());
    for (r, &k) in rows.iter().enumerate() {
        let vk = buses[k].v.norm();
        let row = y_bus.row(k);
        for (&n, y) in row.col_indices().iter().zip(row.values()) {
            if let Some(col) = column_of(&buses[n]) {
                block[(r, col)] = -vk * y.im;
            }
        }
    }
    block
}

impl JacobianStrategy for FastDecoupledJacobian {
    fn name(&self) -> &'static str {
        "fast-decoupled"
    }

    fn create_j1(&self, y_bus: &CsrMatrix<Complex64>, buses: &[BusResult], idx: &NRBuses) -> DMatrix<f64> {
        susceptance_block(y_bus, buses, &idx.non_slack, |b| b.angle_index)
    }

    fn create_j2(&self, _y_bus: &CsrMatrix<Complex64>, _buses: &[BusResult], idx: &NRBuses) -> DMatrix<f64> {
        let (rows, cols) = idx.j2_dim();
        DMatrix::zeros(rows, cols)
    }

    fn create_j3(&self, _y_bus: &CsrMatrix<Complex64>, _buses: &[BusResult], idx: &NRBuses) -> DMatrix<f64> {
        let (rows, cols) = idx.j3_dim();
        DMatrix::zeros(rows, cols)
    }

    fn create_j4(&self, y_bus: &CsrMatrix<Complex64>, buses: &[BusResult], idx: &NRBuses) -> DMatrix<f64> {
        susceptance_block(y_bus, buses, &idx.pq, |b| b.vm_index)
    }
}

/// Blocks sliced out of the complex matrix derivatives `dS/dVa` and `dS/dVm`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComplexJacobian;

#[derive(Clone, Copy)]
enum Part {
    Re,
    Im,
}

impl ComplexJacobian {
    fn derivatives(
        y_bus: &CsrMatrix<Complex64>,
        buses: &[BusResult],
    ) -> (CsrMatrix<Complex64>, CsrMatrix<Complex64>) {
        let v = DVector::from_iterator(buses.len(), buses.iter().map(|b| b.v));
        dSbus_dV(y_bus, &v)
    }

    fn slice(
        mat: &CsrMatrix<Complex64>,
        buses: &[BusResult],
        dim: (usize, usize),
        part: Part,
        row_of: impl Fn(&BusResult) -> Option<usize>,
        col_of: impl Fn(&BusResult) -> Option<usize>,
    ) -> DMatrix<f64> {
        let mut block = DMatrix::zeros(dim.0, dim.1);
        for (i, j, v) in mat.triplet_iter() {
            if let (Some(r), Some(c)) = (row_of(&buses[i]), col_of(&buses[j])) {
                block[(r, c)] = match part {
                    Part::Re => v.re,
                    Part::Im => v.im,
                };
            }
        }
        block
    }
}

impl JacobianStrategy for ComplexJacobian {
    fn name(&self) -> &'static str {
        "complex-matrix"
    }

    fn create_j1(&self, y_bus: &CsrMatrix<Complex64>, buses: &[BusResult], idx: &NRBuses) -> DMatrix<f64> {
        let (_, dva) = Self::derivatives(y_bus, buses);
        Self::slice(&dva, buses, idx.j1_dim(), Part::Re, |b| b.p_index, |b| b.angle_index)
    }

    fn create_j2(&self, y_bus: &CsrMatrix<Complex64>, buses: &[BusResult], idx: &NRBuses) -> DMatrix<f64> {
        let (dvm, _) = Self::derivatives(y_bus, buses);
        Self::slice(&dvm, buses, idx.j2_dim(), Part::Re, |b| b.p_index, |b| b.vm_index)
    }

    fn create_j3(&self, y_bus: &CsrMatrix<Complex64>, buses: &[BusResult], idx: &NRBuses) -> DMatrix<f64> {
        let (_, dva) = Self::derivatives(y_bus, buses);
        Self::slice(&dva, buses, idx.j3_dim(), Part::Im, |b| b.q_index, |b| b.angle_index)
    }

    fn create_j4(&self, y_bus: &CsrMatrix<Complex64>, buses: &[BusResult], idx: &NRBuses) -> DMatrix<f64> {
        let (dvm, _) = Self::derivatives(y_bus, buses);
        Self::slice(&dvm, buses, idx.j4_dim(), Part::Im, |b| b.q_index, |b| b.vm_index)
    }

    fn create_j_matrix(
        &self,
        y_bus: &CsrMatrix<Complex64>,
        buses: &[BusResult],
        idx: &NRBuses,
    ) -> DMatrix<f64> {
        let (dvm, dva) = Self::derivatives(y_bus, buses);
        let n = idx.n();
        let mut j = DMatrix::zeros(idx.dim(), idx.dim());
        let mut fill = |mat: &CsrMatrix<Complex64>, col_of: fn(&BusResult) -> Option<usize>, offset: usize| {
            for (i, k, v) in mat.triplet_iter() {
                let Some(col) = col_of(&buses[k]).map(|c| c + offset) else {
                    continue;
                };
                if let Some(r) = buses[i].p_index {
                    j[(r, col)] = v.re;
                }
                if let Some(r) = buses[i].q_index {
                    j[(r + n, col)] = v.im;
                }
            }
        };
        fill(&dva, |b| b.angle_index, 0);
        fill(&dvm, |b| b.vm_index, n);
        j
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic::bus_state::initialize;
    use crate::basic::indexing::reindex_bus_pq;
    use crate::basic::network::BusId;
    use crate::testcases::glover_5bus;

    fn assert_close(a: &DMatrix<f64>, b: &DMatrix<f64>, what: &str) {
        assert_eq!(a.shape(), b.shape(), "{what}: shape mismatch");
        let diff = (a - b).abs().max();
        assert!(diff < 1e-9, "{what}: max deviation {diff}\n{a}\n{b}");
    }

    /// Voltages roughly at the solved operating point so off-flat terms are exercised.
    fn perturb(state: &mut [BusResult], net: &crate::basic::network::Network) {
        for (id, vm, deg) in [(2, 0.834, -22.4), (4, 1.019, -2.83), (5, 0.974, -4.55), (3, 1.05, -0.6)] {
            let k = net.index_of(BusId(id)).unwrap();
            state[k].v = Complex64::from_polar(vm, f64::to_radians(deg));
        }
    }

    #[test]
    fn test_j1_reference_entry() {
        let net = glover_5bus();
        let y = net.admittance().unwrap();
        let mut state = initialize(net.buses());
        let idx = reindex_bus_pq(&mut state);
        let j1 = StandardJacobian.create_j1(&y, &state, &idx);
        let r = state[net.index_of(BusId(2)).unwrap()].angle_index.unwrap();
        let c = state[net.index_of(BusId(4)).unwrap()].angle_index.unwrap();
        assert!(
            (j1[(r, c)] - (-9.92)).abs() < 1e-3,
            "J1(2,4) = {}, expected -9.92",
            j1[(r, c)]
        );
    }

    #[test]
    fn test_couplings_walk_one_row() {
        let net = glover_5bus();
        let y = net.admittance().unwrap();
        let mut state = initialize(net.buses());
        perturb(&mut state, &net);
        let k = net.index_of(BusId(2)).unwrap();
        let row: Vec<Coupling> = couplings(&y, &state, k).collect();
        assert_eq!(row.len(), y.row(k).nnz());
        for c in &row {
            let entry = y_entry(&y, k, c.n);
            assert!((c.y - entry.norm()).abs() < 1e-12);
            assert!((c.vn - state[c.n].v.norm()).abs() < 1e-12);
            let expected = state[k].v.arg() - state[c.n].v.arg() - entry.arg();
            assert!((c.angle - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn test_block_layout() {
        let net = glover_5bus();
        let y = net.admittance().unwrap();
        let mut state = initialize(net.buses());
        let idx = reindex_bus_pq(&mut state);
        let j = StandardJacobian.create_j_matrix(&y, &state, &idx);
        assert_eq!(j.shape(), (7, 7));
        let j4 = StandardJacobian.create_j4(&y, &state, &idx);
        assert_close(&j.view((4, 4), (3, 3)).into_owned(), &j4, "J4 block");
        let j2 = StandardJacobian.create_j2(&y, &state, &idx);
        assert_close(&j.view((0, 4), (4, 3)).into_owned(), &j2, "J2 block");
    }

    #[test]
    fn test_strategies_agree() {
        let net = glover_5bus();
        let y = net.admittance().unwrap();
        let mut state = initialize(net.buses());
        let idx = reindex_bus_pq(&mut state);
        perturb(&mut state, &net);

        let standard = StandardJacobian.create_j_matrix(&y, &state, &idx);
        let power = PowerBasedJacobian.create_j_matrix(&y, &state, &idx);
        let complex = ComplexJacobian.create_j_matrix(&y, &state, &idx);
        assert_close(&standard, &power, "power-based");
        assert_close(&standard, &complex, "complex-matrix");

        let blocks = assemble_blocks(
            &idx,
            &ComplexJacobian.create_j1(&y, &state, &idx),
            &ComplexJacobian.create_j2(&y, &state, &idx),
            &ComplexJacobian.create_j3(&y, &state, &idx),
            &ComplexJacobian.create_j4(&y, &state, &idx),
        );
        assert_close(&complex, &blocks, "complex-matrix blocks");
    }

    #[test]
    fn test_fast_decoupled_blocks() {
        let net = glover_5bus();
        let y = net.admittance().unwrap();
        let mut state = initialize(net.buses());
        let idx = reindex_bus_pq(&mut state);
        let j = FastDecoupledJacobian.create_j_matrix(&y, &state, &idx);
        assert_eq!(j.view((0, 4), (4, 3)).abs().max(), 0.0);
        assert_eq!(j.view((4, 0), (3, 4)).abs().max(), 0.0);

        let i3 = net.index_of(BusId(3)).unwrap();
        let i4 = net.index_of(BusId(4)).unwrap();
        let (r, c) = (state[i3].angle_index.unwrap(), state[i4].angle_index.unwrap());
        let b34 = y_entry(&y, i3, i4).im;
        assert!((j[(r, c)] + 1.05 * b34).abs() < 1e-12);
    }
}
