use nalgebra_sparse::CsrMatrix;
use num_complex::Complex64;
use num_traits::Zero;

use super::network::{Bus, BusType, y_entry};
use crate::error::SolveError;

/// Which reactive limit a demoted PV bus is held at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QLimitSide {
    Min,
    Max,
}

/// Per-bus iteration state, owned by one solve and mutated in place by the engine.
#[derive(Debug, Clone)]
pub struct BusResult<'a> {
    pub bus: &'a Bus,
    pub v: Complex64,
    /// Net injected power `(Pgen - Pload) + j(Qgen - Qload)`. The imaginary part of a PV bus
    /// tracks the computed value, the imaginary part of a demoted bus holds its clamp.
    pub s_bus: Complex64,
    pub bus_type: BusType,
    pub q_limit: Option<QLimitSide>,
    pub err_vm: f64,
    pub err_angle: f64,
    pub err_q: f64,
    /// Magnitude of the last Gauss-Seidel voltage update `|V_new - V_old|`.
    pub v_step: f64,
    /// Newton power mismatch `ΔP + jΔQ`, scheduled minus computed.
    pub mismatch: Complex64,
    /// Gauss-Seidel voltage step captured at the last divergence check.
    pub reference_error: Option<f64>,
    pub p_index: Option<usize>,
    pub q_index: Option<usize>,
    pub angle_index: Option<usize>,
    pub vm_index: Option<usize>,
}

impl<'a> BusResult<'a> {
    pub fn new(bus: &'a Bus) -> Self {
        let v = match bus.bus_type {
            BusType::Slack => Complex64::from_polar(bus.v_sched, bus.v_angle_deg.to_radians()),
            BusType::Isolated => Complex64::zero(),
            BusType::PV | BusType::PQ => Complex64::new(bus.v_sched, 0.0),
        };
        Self {
            bus,
            v,
            s_bus: bus.scheduled_injection(),
            bus_type: bus.bus_type,
            q_limit: None,
            err_vm: 0.0,
            err_angle: 0.0,
            err_q: 0.0,
            v_step: 0.0,
            mismatch: Complex64::zero(),
            reference_error: None,
            p_index: None,
            q_index: None,
            angle_index: None,
            vm_index: None,
        }
    }

    /// Type the bus was given in the case data.
    pub fn initial_type(&self) -> BusType {
        self.bus.bus_type
    }

    pub fn error(&self) -> f64 {
        self.err_vm
            .max(self.err_angle)
            .max(self.err_q)
            .max(self.mismatch.re.abs())
            .max(self.mismatch.im.abs())
    }

    /// Whether the bus takes part in the iteration at all.
    pub fn is_active(&self) -> bool {
        !matches!(self.bus_type, BusType::Slack | BusType::Isolated)
    }

    /// Limit violated by a reactive generation of `q_gen`, if any.
    pub fn violated_limit(&self, q_gen: f64) -> Option<QLimitSide> {
        let (q_min, q_max) = self.bus.q_limits();
        if q_gen > q_max {
            Some(QLimitSide::Max)
        } else if q_gen < q_min {
            Some(QLimitSide::Min)
        } else {
            None
        }
    }

    /// Switches a PV bus to PQ with its net reactive injection held at `s.im`.
    pub fn demote_to_pq(&mut self, s: Complex64, side: QLimitSide) {
        self.s_bus = s;
        self.bus_type = BusType::PQ;
        self.q_limit = Some(side);
    }

    /// Applies [`calc_max_qk`] to the computed injection `s` and demotes the bus when a limit
    /// is hit.
    pub fn enforce_q_limit(&mut self, s: Complex64) -> Option<QLimitSide> {
        let (clamped, bus_type) = calc_max_qk(self, s);
        if bus_type != BusType::PQ {
            return None;
        }
        let side = if clamped.im < s.im {
            QLimitSide::Max
        } else {
            QLimitSide::Min
        };
        self.demote_to_pq(clamped, side);
        Some(side)
    }

    /// A demoted bus may return to PV once its voltage is back on the controllable side of
    /// the setpoint: above it while held at Qmax, below it while held at Qmin.
    pub fn can_restore_pv(&self) -> bool {
        let vm = self.v.norm();
        match self.q_limit {
            Some(QLimitSide::Max) => vm > self.bus.v_sched,
            Some(QLimitSide::Min) => vm < self.bus.v_sched,
            None => false,
        }
    }

    pub fn restore_pv(&mut self) {
        self.bus_type = BusType::PV;
        self.q_limit = None;
        self.v = Complex64::from_polar(self.bus.v_sched, self.v.arg());
    }
}

/// Seeds the per-bus state: slack at its setpoint, PV at `|Vsched|∠0`, PQ at its scheduled
/// magnitude (1.0 unless given), isolated buses at zero.
pub fn initialize(buses: &[Bus]) -> Vec<BusResult<'_>> {
    buses.iter().map(BusResult::new).collect()
}

/// `Σ_n Y[k,n]·V_n` over the non-zeros of row `k`.
pub fn calc_bus_current(k: usize, y_bus: &CsrMatrix<Complex64>, buses: &[BusResult]) -> Complex64 {
    let row = y_bus.row(k);
    row.col_indices()
        .iter()
        .zip(row.values())
        .map(|(&n, y)| y * buses[n].v)
        .sum()
}

/// Computed injection `S_k = V_k · conj(Σ_n Y[k,n]·V_n)`.
pub fn calc_bus_power(k: usize, y_bus: &CsrMatrix<Complex64>, buses: &[BusResult]) -> Complex64 {
    buses[k].v * calc_bus_current(k, y_bus, buses).conj()
}

/// Doubled Gauss-Seidel voltage update for bus `k`:
/// `V_k ← (conj(S_k)/conj(V_k) − Σ_{n≠k} Y[k,n]·V_n) / Y[k,k]`, applied twice with the
/// intermediate value fed back into the second evaluation.
pub fn calc_bus_voltage(
    k: usize,
    y_bus: &CsrMatrix<Complex64>,
    buses: &[BusResult],
) -> Result<Complex64, SolveError> {
    let y_kk = y_entry(y_bus, k, k);
    if y_kk.is_zero() {
        return Err(SolveError::Singular);
    }
    let row = y_bus.row(k);
    let coupling: Complex64 = row
        .col_indices()
        .iter()
        .zip(row.values())
        .filter(|(n, _)| **n != k)
        .map(|(&n, y)| y * buses[n].v)
        .sum();
    let s_conj = buses[k].s_bus.conj();
    let update = |v: Complex64| -> Result<Complex64, SolveError> {
        if v.is_zero() {
            return Err(SolveError::Singular);
        }
        Ok((s_conj / v.conj() - coupling) / y_kk)
    };
    let first = update(buses[k].v)?;
    update(first)
}

/// Reactive-limit check of a PV bus given its computed injection `s`.
///
/// Returns the injection the bus should carry next (scheduled P, computed or clamped net Q)
/// and the type it should have: PQ when the generator output `s.im + Qload` is outside
/// `[Qmin, Qmax]`, PV otherwise.
pub fn calc_max_qk(bus: &BusResult, s: Complex64) -> (Complex64, BusType) {
    let q_load = bus.bus.q_load;
    let q_gen = s.im + q_load;
    let (q_min, q_max) = bus.bus.q_limits();
    match bus.violated_limit(q_gen) {
        Some(QLimitSide::Max) => (Complex64::new(bus.s_bus.re, q_max - q_load), BusType::PQ),
        Some(QLimitSide::Min) => (Complex64::new(bus.s_bus.re, q_min - q_load), BusType::PQ),
        None => (Complex64::new(bus.s_bus.re, s.im), BusType::PV),
    }
}

/// `|(new - old) / new|`, or the absolute change when `new` is zero.
pub(crate) fn relative_change(new: f64, old: f64) -> f64 {
    if new == 0.0 {
        (new - old).abs()
    } else {
        ((new - old) / new).abs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic::network::BusId;
    use crate::testcases::glover_5bus;
    use approx::assert_relative_eq;

    #[test]
    fn test_initialize() {
        let net = glover_5bus();
        let state = initialize(net.buses());
        let i2 = net.index_of(BusId(2)).unwrap();
        let i3 = net.index_of(BusId(3)).unwrap();
        assert_eq!(state[i2].v, Complex64::new(1.0, 0.0));
        assert_eq!(state[i3].v, Complex64::new(1.05, 0.0));
        assert_relative_eq!(state[i2].s_bus.re, -8.0);
        assert_relative_eq!(state[i2].s_bus.im, -2.8);
        assert_relative_eq!(state[i3].s_bus.re, 4.4, epsilon = 1e-12);
        assert!(state.iter().all(|b| b.reference_error.is_none() && b.p_index.is_none()));
    }

    #[test]
    fn test_flat_start_bus_power() {
        let net = glover_5bus();
        let y = net.admittance().unwrap();
        let state = initialize(net.buses());
        // at flat start with unit voltages only the line charging remains at bus 2
        let i2 = net.index_of(BusId(2)).unwrap();
        let s2 = calc_bus_power(i2, &y, &state);
        assert_relative_eq!(s2.re, 0.0, epsilon = 1e-9);
        assert_relative_eq!(s2.im, -1.3, epsilon = 1e-9);
        // bus 1 only reaches bus 5, which also sits at 1.0
        let s1 = calc_bus_power(net.slack_index(), &y, &state);
        assert_relative_eq!(s1.norm(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_voltage_update_moves_towards_load() {
        let net = glover_5bus();
        let y = net.admittance().unwrap();
        let state = initialize(net.buses());
        let i2 = net.index_of(BusId(2)).unwrap();
        let v2 = calc_bus_voltage(i2, &y, &state).unwrap();
        assert!(v2.norm() < 1.0, "loaded bus should sag, got {}", v2);
        assert!(v2.arg() < 0.0, "loaded bus should lag, got {}", v2);
    }

    #[test]
    fn test_calc_max_qk_clamps() {
        let bus = Bus::pv(3, 1.0, 1.02).with_q_limits(-0.5, 0.5);
        let state = BusResult::new(&bus);

        let (s, t) = calc_max_qk(&state, Complex64::new(0.9, 0.8));
        assert_eq!(t, BusType::PQ);
        assert_eq!(s.im, 0.5);
        assert_eq!(s.re, 1.0);

        let (s, t) = calc_max_qk(&state, Complex64::new(0.9, -0.7));
        assert_eq!(t, BusType::PQ);
        assert_eq!(s.im, -0.5);

        let (s, t) = calc_max_qk(&state, Complex64::new(0.9, 0.2));
        assert_eq!(t, BusType::PV);
        assert_eq!(s.im, 0.2);
    }

    #[test]
    fn test_enforce_q_limit() {
        let bus = Bus::pv(3, 1.0, 1.02).with_q_limits(-0.5, 0.5);
        let mut state = BusResult::new(&bus);
        assert_eq!(state.enforce_q_limit(Complex64::new(0.9, 0.1)), None);
        assert_eq!(state.bus_type, BusType::PV);
        assert_eq!(
            state.enforce_q_limit(Complex64::new(0.9, -0.6)),
            Some(QLimitSide::Min)
        );
        assert_eq!(state.bus_type, BusType::PQ);
        assert_eq!(state.s_bus, Complex64::new(1.0, -0.5));
    }

    #[test]
    fn test_calc_max_qk_accounts_for_load() {
        // generator limit applies to Qgen = Qnet + Qload
        let bus = Bus::pv(3, 5.2, 1.05)
            .with_load(0.8, 0.4)
            .with_q_limits(-2.8, 4.0);
        let state = BusResult::new(&bus);
        let (s, t) = calc_max_qk(&state, Complex64::new(4.4, 3.7));
        assert_eq!(t, BusType::PQ);
        assert_relative_eq!(s.im, 3.6, epsilon = 1e-12);
        let (_, t) = calc_max_qk(&state, Complex64::new(4.4, 3.5));
        assert_eq!(t, BusType::PV);
    }

    #[test]
    fn test_restore_rule() {
        let bus = Bus::pv(3, 1.0, 1.02).with_q_limits(-0.5, 0.5);
        let mut state = BusResult::new(&bus);
        state.demote_to_pq(Complex64::new(1.0, 0.5), QLimitSide::Max);
        state.v = Complex64::from_polar(0.99, -0.1);
        assert!(!state.can_restore_pv());
        state.v = Complex64::from_polar(1.03, -0.1);
        assert!(state.can_restore_pv());
        state.restore_pv();
        assert_eq!(state.bus_type, BusType::PV);
        assert_relative_eq!(state.v.norm(), 1.02, epsilon = 1e-12);
        assert_relative_eq!(state.v.arg(), -0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_relative_change() {
        assert_relative_eq!(relative_change(2.0, 1.0), 0.5);
        assert_relative_eq!(relative_change(0.0, 0.25), 0.25);
    }
}
