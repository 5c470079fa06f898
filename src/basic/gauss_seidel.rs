use nalgebra_sparse::CsrMatrix;
use num_complex::Complex64;
use tracing::{debug, info, warn};

use super::bus_state::{
    BusResult, calc_bus_power, calc_bus_voltage, initialize, relative_change,
};
use super::config::{QLimitMode, SolverConfig};
use super::convergence::{DivergenceMonitor, StopCondition};
use super::network::{BusType, Network};
use super::post_processing::{LoadFlowSolution, post_process};
use super::result::PowerFlowResult;
use super::LoadFlowSolver;
use crate::error::{ErrorKind, NetworkError, SolveError};

/// Fixed-point Gauss-Seidel iteration on the bus voltages.
///
/// Buses are swept in network order with each new voltage used immediately. The error of a bus
/// is the relative change of its voltage magnitude and angle (PQ) or of its angle and computed
/// reactive injection (PV). Divergence is judged on the size of each bus's complex voltage step.
#[derive(Debug, Clone, Default)]
pub struct GaussSeidel {
    config: SolverConfig,
}

impl GaussSeidel {
    pub fn new(config: SolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    fn update_pq(
        &self,
        k: usize,
        y_bus: &CsrMatrix<Complex64>,
        buses: &mut [BusResult],
    ) -> Result<(), SolveError> {
        let old = buses[k].v;
        let new = calc_bus_voltage(k, y_bus, buses)?;
        let bus = &mut buses[k];
        bus.err_vm = relative_change(new.norm(), old.norm());
        bus.err_angle = relative_change(new.arg(), old.arg());
        bus.err_q = 0.0;
        bus.v_step = (new - old).norm();
        bus.v = new;
        Ok(())
    }

    fn update_pv(
        &self,
        k: usize,
        y_bus: &CsrMatrix<Complex64>,
        buses: &mut [BusResult],
        check_q: bool,
    ) -> Result<(), SolveError> {
        let s = calc_bus_power(k, y_bus, buses);
        if check_q {
            if let Some(side) = buses[k].enforce_q_limit(s) {
                warn!(
                    bus = %buses[k].bus.id,
                    q_gen = s.im + buses[k].bus.q_load,
                    ?side,
                    "reactive limit hit, switching PV -> PQ"
                );
                return self.update_pq(k, y_bus, buses);
            }
        }
        let old = buses[k].v;
        let old_q = buses[k].s_bus.im;
        buses[k].s_bus.im = s.im;
        let new = calc_bus_voltage(k, y_bus, buses)?;
        let bus = &mut buses[k];
        bus.v = Complex64::from_polar(bus.bus.v_sched, new.arg());
        bus.v_step = (bus.v - old).norm();
        bus.err_vm = 0.0;
        bus.err_angle = relative_change(new.arg(), old.arg());
        bus.err_q = relative_change(s.im, old_q);
        Ok(())
    }

    fn update_bus(
        &self,
        k: usize,
        y_bus: &CsrMatrix<Complex64>,
        buses: &mut [BusResult],
        check_q: bool,
    ) -> Result<(), SolveError> {
        match buses[k].bus_type {
            BusType::Slack | BusType::Isolated => Ok(()),
            BusType::PV => self.update_pv(k, y_bus, buses, check_q),
            BusType::PQ => {
                if check_q
                    && self.config.q_limits == QLimitMode::Reversible
                    && buses[k].can_restore_pv()
                {
                    buses[k].restore_pv();
                    info!(bus = %buses[k].bus.id, "voltage back within control range, switching PQ -> PV");
                    return self.update_pv(k, y_bus, buses, false);
                }
                self.update_pq(k, y_bus, buses)
            }
        }
    }

    /// Iterates on prepared bus state until convergence or failure.
    ///
    /// # Arguments
    ///
    /// * `y_bus` - The nodal admittance matrix. It is only read.
    /// * `buses` - Bus state from [`initialize`], parallel to the rows of `y_bus`. Updated in
    ///   place sweep by sweep.
    ///
    /// # Returns
    ///
    /// A [`PowerFlowResult`] with no payload. Its error is `None` when every active bus error is
    /// below the threshold, `NumericSingularity` when a bus has a zero diagonal admittance or
    /// voltage, `Divergence` when a voltage step grows past the configured factor, and
    /// `MaxIteration` or `Cancelled` otherwise.
    pub fn run(&self, y_bus: &CsrMatrix<Complex64>, buses: &mut [BusResult]) -> PowerFlowResult<()> {
        let cfg = &self.config;
        let stop = StopCondition::start(cfg);
        let monitor = DivergenceMonitor::new(cfg.divergence);

        for iteration in 1..=cfg.max_iteration {
            if let Some((kind, reason)) = stop.poll() {
                return PowerFlowResult::new((), iteration - 1, kind, reason);
            }
            let check_q = cfg.checks_q_limits(iteration);
            for k in 0..buses.len() {
                if let Err(err) = self.update_bus(k, y_bus, buses, check_q) {
                    warn!(bus = %buses[k].bus.id, %err, "voltage update failed");
                    return PowerFlowResult::new(
                        (),
                        iteration,
                        ErrorKind::NumericSingularity,
                        format!("bus {}: {err}", buses[k].bus.id),
                    );
                }
            }

            if buses.iter().any(|b| !b.v.is_finite()) {
                warn!(iteration, "non-finite voltage");
                return PowerFlowResult::new((), iteration, ErrorKind::Divergence, "non-finite voltage");
            }
            let max_error = buses
                .iter()
                .filter(|b| b.is_active())
                .map(|b| b.error())
                .fold(0.0, f64::max);
            debug!(iteration, max_error, "gauss-seidel iteration");

            if max_error < cfg.threshold && iteration > cfg.min_iteration {
                return PowerFlowResult::new((), iteration, ErrorKind::None, "converged");
            }

            if iteration > cfg.min_iteration && monitor.is_check_iteration(iteration) {
                for bus in buses.iter_mut().filter(|b| b.is_active()) {
                    let step = bus.v_step;
                    if monitor.check(step, &mut bus.reference_error) {
                        warn!(iteration, bus = %bus.bus.id, step, "voltage step is growing");
                        return PowerFlowResult::new(
                            (),
                            iteration,
                            ErrorKind::Divergence,
                            format!("voltage step at bus {} grew to {step:.3e}", bus.bus.id),
                        );
                    }
                }
            }
        }
        PowerFlowResult::new(
            (),
            cfg.max_iteration,
            ErrorKind::MaxIteration,
            "iteration limit reached",
        )
    }
}

impl LoadFlowSolver for GaussSeidel {
    fn solve(&mut self, network: &Network) -> Result<PowerFlowResult<LoadFlowSolution>, NetworkError> {
        let y_bus = network.admittance()?;
        let mut buses = initialize(network.buses());
        info!(buses = buses.len(), threshold = self.config.threshold, "gauss-seidel start");
        let res = self.run(&y_bus, &mut buses);
        info!(iterations = res.iterations, outcome = %res.error, "gauss-seidel finished");
        let converged = res.is_converged();
        Ok(res.map(|_| post_process(network, &y_bus, &buses, converged)))
    }
}
