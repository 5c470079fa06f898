use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How generator reactive limits are enforced on PV buses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QLimitMode {
    /// Limits are ignored; PV buses stay PV.
    Disabled,
    /// A PV bus that violates a limit becomes PQ for the rest of the solve.
    #[default]
    Latching,
    /// A demoted bus returns to PV once its voltage is back on the controllable
    /// side of the setpoint.
    Reversible,
}

/// How the voltage-magnitude correction from a Newton step is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoltageStep {
    /// `|V| += dV`
    #[default]
    Absolute,
    /// `|V| += dV * |V|`, i.e. the solve yields `dV/|V|`.
    Relative,
}

/// Periodic growth check used to tell divergence from slow convergence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DivergenceConfig {
    /// Iterations between two checks (and reference refreshes). Zero disables the check.
    pub check_interval: usize,
    /// Divergence is declared when the error exceeds `growth_factor` times the reference.
    pub growth_factor: f64,
}

impl Default for DivergenceConfig {
    fn default() -> Self {
        Self {
            check_interval: 5,
            growth_factor: 3.0,
        }
    }
}

/// Cooperative cancellation flag, cheap to clone and share with another thread.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Options shared by every solver engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Gauss-Seidel: relative voltage/angle/Q change. Newton family: max absolute mismatch (p.u.).
    pub threshold: f64,
    pub max_iteration: usize,
    /// Convergence is not declared (and divergence not checked) until past this iteration.
    pub min_iteration: usize,
    pub q_limits: QLimitMode,
    /// First iteration on which reactive limits are checked.
    pub q_limit_start_iteration: usize,
    pub divergence: DivergenceConfig,
    pub voltage_step: VoltageStep,
    /// Decoupled engines reuse the first Jacobian until the bus classification changes.
    pub calc_jmatrix_once: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<Duration>,
    #[serde(skip)]
    pub cancel: Option<CancelToken>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            threshold: 1e-4,
            max_iteration: 100,
            min_iteration: 0,
            q_limits: QLimitMode::default(),
            q_limit_start_iteration: 2,
            divergence: DivergenceConfig::default(),
            voltage_step: VoltageStep::default(),
            calc_jmatrix_once: false,
            deadline: None,
            cancel: None,
        }
    }
}

impl SolverConfig {
    pub fn new(threshold: f64, max_iteration: usize) -> Self {
        Self {
            threshold,
            max_iteration,
            ..Default::default()
        }
    }

    pub fn with_min_iteration(mut self, min_iteration: usize) -> Self {
        self.min_iteration = min_iteration;
        self
    }

    pub fn with_q_limits(mut self, mode: QLimitMode) -> Self {
        self.q_limits = mode;
        self
    }

    pub fn with_q_limit_start_iteration(mut self, iteration: usize) -> Self {
        self.q_limit_start_iteration = iteration;
        self
    }

    pub fn with_divergence(mut self, check_interval: usize, growth_factor: f64) -> Self {
        self.divergence = DivergenceConfig {
            check_interval,
            growth_factor,
        };
        self
    }

    pub fn with_voltage_step(mut self, step: VoltageStep) -> Self {
        self.voltage_step = step;
        self
    }

    pub fn with_calc_jmatrix_once(mut self, once: bool) -> Self {
        self.calc_jmatrix_once = once;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// True when reactive limits should be checked on `iteration`.
    pub(crate) fn checks_q_limits(&self, iteration: usize) -> bool {
        self.q_limits != QLimitMode::Disabled && iteration >= self.q_limit_start_iteration
    }
}
