use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::CsrMatrix;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use super::bus_state::{BusResult, calc_bus_power, initialize};
use super::config::{QLimitMode, SolverConfig, VoltageStep};
use super::convergence::{DivergenceMonitor, StopCondition};
use super::indexing::{NRBuses, reindex_bus_pq};
use super::jacobian::{FastDecoupledJacobian, JacobianStrategy, StandardJacobian};
use super::network::{BusType, Network};
use super::post_processing::{LoadFlowSolution, post_process};
use super::result::PowerFlowResult;
use super::solver::{DefaultSolver, Solve};
use super::LoadFlowSolver;
use crate::error::{ErrorKind, NetworkError, SolveError};

/// Which linear system each Newton iteration solves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NewtonMethod {
    /// The full `[[J1, J2], [J3, J4]]` system.
    #[default]
    Full,
    /// `J1·Δθ = ΔP` and `J4·Δ|V| = ΔQ` solved separately.
    Decoupled,
    /// Decoupled with the flat-voltage susceptance blocks.
    FastDecoupled,
}

impl NewtonMethod {
    pub fn default_strategy(&self) -> Box<dyn JacobianStrategy> {
        match self {
            NewtonMethod::Full | NewtonMethod::Decoupled => Box::new(StandardJacobian),
            NewtonMethod::FastDecoupled => Box::new(FastDecoupledJacobian),
        }
    }
}

/// Newton-Raphson power flow in polar coordinates.
///
/// The unknowns are the angles of all non-slack buses followed by the magnitudes of the PQ buses.
/// Generic over the linear backend; the Jacobian formulation is a swappable strategy.
pub struct NewtonRaphson<S: Solve = DefaultSolver> {
    config: SolverConfig,
    method: NewtonMethod,
    strategy: Box<dyn JacobianStrategy>,
    p_solver: S,
    q_solver: S,
}

impl NewtonRaphson<DefaultSolver> {
    pub fn new(config: SolverConfig, method: NewtonMethod) -> Self {
        Self::with_solver(config, method, method.default_strategy(), DefaultSolver::default())
    }

    pub fn full(config: SolverConfig) -> Self {
        Self::new(config, NewtonMethod::Full)
    }

    pub fn decoupled(config: SolverConfig) -> Self {
        Self::new(config, NewtonMethod::Decoupled)
    }

    pub fn fast_decoupled(config: SolverConfig) -> Self {
        Self::new(config, NewtonMethod::FastDecoupled)
    }
}

impl<S: Solve + Default> NewtonRaphson<S> {
    pub fn with_solver(
        config: SolverConfig,
        method: NewtonMethod,
        strategy: Box<dyn JacobianStrategy>,
        solver: S,
    ) -> Self {
        Self {
            config,
            method,
            strategy,
            p_solver: solver,
            q_solver: S::default(),
        }
    }
}

impl<S: Solve> NewtonRaphson<S> {
    pub fn with_strategy(mut self, strategy: Box<dyn JacobianStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    pub fn method(&self) -> NewtonMethod {
        self.method
    }

    fn reset_solvers(&mut self) {
        self.p_solver.reset();
        self.q_solver.reset();
    }

    /// Solves for the correction `[Δθ; Δ|V|]`, overwriting the mismatch vector `f`.
    fn solve_correction(
        &mut self,
        y_bus: &CsrMatrix<Complex64>,
        buses: &[BusResult],
        idx: &NRBuses,
        f: &mut DVector<f64>,
        cached: &mut Option<(DMatrix<f64>, DMatrix<f64>)>,
    ) -> Result<(), SolveError> {
        if self.method == NewtonMethod::Full {
            let jacobian = self.strategy.create_j_matrix(y_bus, buses, idx);
            trace!(%jacobian, "jacobian");
            return self.p_solver.solve(&jacobian, f);
        }

        let blocks = match cached.take() {
            Some(blocks) if self.config.calc_jmatrix_once => blocks,
            _ => (
                self.strategy.create_j1(y_bus, buses, idx),
                self.strategy.create_j4(y_bus, buses, idx),
            ),
        };
        let (n, npq) = (idx.n(), idx.npq());
        let mut dp = f.rows(0, n).into_owned();
        let mut dq = f.rows(n, npq).into_owned();
        let solved = self.p_solver.solve(&blocks.0, &mut dp).and_then(|_| {
            if npq > 0 {
                self.q_solver.solve(&blocks.1, &mut dq)
            } else {
                Ok(())
            }
        });
        *cached = Some(blocks);
        solved?;
        f.rows_mut(0, n).copy_from(&dp);
        f.rows_mut(n, npq).copy_from(&dq);
        Ok(())
    }

    /// Iterates on prepared bus state until convergence or failure.
    ///
    /// Each iteration evaluates the power mismatch, applies the reactive limits once they are
    /// due, solves for the correction with the configured [`NewtonMethod`] and updates the
    /// angles and magnitudes.
    ///
    /// # Arguments
    ///
    /// * `y_bus` - The nodal admittance matrix. It is only read.
    /// * `buses` - Bus state from [`initialize`], parallel to the rows of `y_bus`. Holds the
    ///   final voltages, types and injections when the call returns.
    ///
    /// # Returns
    ///
    /// A [`PowerFlowResult`] with no payload carrying the iteration count and the outcome:
    /// `None` once the largest mismatch is below the threshold, otherwise `MaxIteration`,
    /// `Divergence`, `NumericSingularity` or `Cancelled` with a message.
    pub fn run(&mut self, y_bus: &CsrMatrix<Complex64>, buses: &mut [BusResult]) -> PowerFlowResult<()> {
        let config = self.config.clone();
        let stop = StopCondition::start(&config);
        let monitor = DivergenceMonitor::new(config.divergence);
        let mut reference = None;
        let mut cached = None;
        self.reset_solvers();

        for iteration in 1..=config.max_iteration {
            if let Some((kind, reason)) = stop.poll() {
                return PowerFlowResult::new((), iteration - 1, kind, reason);
            }

            let mut idx = reindex_bus_pq(buses);
            let (mut f, mut computed) = assemble_f(y_bus, buses, &idx);
            let max_mismatch = f.iter().fold(0.0_f64, |m, x| m.max(x.abs()));
            debug!(iteration, max_mismatch, "newton iteration");

            if f.iter().any(|x| !x.is_finite()) {
                warn!(iteration, "non-finite power mismatch");
                return PowerFlowResult::new((), iteration, ErrorKind::Divergence, "non-finite power mismatch");
            }
            if max_mismatch < config.threshold && iteration > config.min_iteration {
                return PowerFlowResult::new((), iteration, ErrorKind::None, "converged");
            }

            if config.checks_q_limits(iteration) && apply_q_limits(buses, &computed, config.q_limits) {
                idx = reindex_bus_pq(buses);
                (f, computed) = assemble_f(y_bus, buses, &idx);
                cached = None;
                self.reset_solvers();
            }
            trace!(?computed, "bus power");

            if let Err(err) = self.solve_correction(y_bus, buses, &idx, &mut f, &mut cached) {
                warn!(iteration, %err, "linear solve failed");
                return PowerFlowResult::new(
                    (),
                    iteration,
                    ErrorKind::NumericSingularity,
                    format!("jacobian solve failed: {err}"),
                );
            }
            update_v(buses, &idx, &f, config.voltage_step);

            if iteration > config.min_iteration
                && monitor.is_check_iteration(iteration)
                && monitor.check(max_mismatch, &mut reference)
            {
                warn!(iteration, max_mismatch, "mismatch is growing");
                return PowerFlowResult::new(
                    (),
                    iteration,
                    ErrorKind::Divergence,
                    format!("mismatch grew to {max_mismatch:.3e}"),
                );
            }
        }
        PowerFlowResult::new(
            (),
            config.max_iteration,
            ErrorKind::MaxIteration,
            "iteration limit reached",
        )
    }
}

impl<S: Solve> LoadFlowSolver for NewtonRaphson<S> {
    fn solve(&mut self, network: &Network) -> Result<PowerFlowResult<LoadFlowSolution>, NetworkError> {
        let y_bus = network.admittance()?;
        let mut buses = initialize(network.buses());
        info!(
            method = ?self.method,
            jacobian = self.strategy.name(),
            buses = buses.len(),
            threshold = self.config.threshold,
            "newton start"
        );
        let res = self.run(&y_bus, &mut buses);
        info!(iterations = res.iterations, outcome = %res.error, "newton finished");
        let converged = res.is_converged();
        Ok(res.map(|_| post_process(network, &y_bus, &buses, converged)))
    }
}

/// Mismatch vector `[ΔP over non-slack buses; ΔQ over PQ buses]`, scheduled minus computed,
/// and the computed power of every bus.
fn assemble_f(
    y_bus: &CsrMatrix<Complex64>,
    buses: &mut [BusResult],
    idx: &NRBuses,
) -> (DVector<f64>, Vec<Complex64>) {
    let computed: Vec<Complex64> = (0..buses.len())
        .map(|k| calc_bus_power(k, y_bus, buses))
        .collect();
    let n = idx.n();
    let mut f = DVector::zeros(idx.dim());
    for (bus, s) in buses.iter_mut().zip(&computed) {
        let delta = bus.s_bus - s;
        bus.mismatch = Complex64::new(0.0, 0.0);
        if let Some(p) = bus.p_index {
            f[p] = delta.re;
            bus.mismatch.re = delta.re;
        }
        if let Some(q) = bus.q_index {
            f[n + q] = delta.im;
            bus.mismatch.im = delta.im;
        }
    }
    (f, computed)
}

/// Reactive-limit pass over all buses. Returns `true` when any bus changed type.
fn apply_q_limits(buses: &mut [BusResult], computed: &[Complex64], mode: QLimitMode) -> bool {
    let mut changed = false;
    for (bus, &s) in buses.iter_mut().zip(computed) {
        match bus.bus_type {
            BusType::PV => {
                if let Some(side) = bus.enforce_q_limit(s) {
                    warn!(
                        bus = %bus.bus.id,
                        q_gen = s.im + bus.bus.q_load,
                        ?side,
                        "reactive limit hit, switching PV -> PQ"
                    );
                    changed = true;
                }
            }
            BusType::PQ if mode == QLimitMode::Reversible && bus.can_restore_pv() => {
                bus.restore_pv();
                info!(bus = %bus.bus.id, "voltage back within control range, switching PQ -> PV");
                changed = true;
            }
            _ => {}
        }
    }
    changed
}

/// Applies `[Δθ; Δ|V|]`. PV buses keep their scheduled magnitude.
fn update_v(buses: &mut [BusResult], idx: &NRBuses, dx: &DVector<f64>, step: VoltageStep) {
    let n = idx.n();
    for &k in &idx.non_slack {
        let bus = &mut buses[k];
        let (vm, va) = bus.v.to_polar();
        let va = va + bus.angle_index.map_or(0.0, |a| dx[a]);
        let vm = match bus.vm_index {
            Some(i) => match step {
                VoltageStep::Absolute => vm + dx[n + i],
                VoltageStep::Relative => vm + dx[n + i] * vm,
            },
            None => bus.bus.v_sched,
        };
        bus.v = Complex64::from_polar(vm, va);
    }
}
