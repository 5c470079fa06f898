pub mod bus_state;
pub mod config;
pub mod convergence;
pub(crate) mod dsbus_dv;
pub mod gauss_seidel;
pub mod indexing;
pub mod jacobian;
pub mod network;
pub mod newtonpf;
pub mod post_processing;
pub mod result;
pub mod solver;

use serde::{Deserialize, Serialize};

pub use config::{CancelToken, DivergenceConfig, QLimitMode, SolverConfig, VoltageStep};
pub use gauss_seidel::GaussSeidel;
pub use network::{Bus, BusId, BusType, Line, Network, build_admittance};
pub use newtonpf::{NewtonMethod, NewtonRaphson};
pub use post_processing::{BusSolution, LineSolution, LoadFlowSolution};
pub use result::PowerFlowResult;

use crate::error::NetworkError;

/// A load-flow engine that runs a complete solve on a network.
///
/// Precondition violations are returned as `Err`; numerical outcomes (non-convergence,
/// divergence, singularity, cancellation) are carried inside the [`PowerFlowResult`].
pub trait LoadFlowSolver {
    fn solve(&mut self, network: &Network) -> Result<PowerFlowResult<LoadFlowSolution>, NetworkError>;
}

/// Engine selector for [`solve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    GaussSeidel,
    NewtonRaphson,
    Decoupled,
    FastDecoupled,
}

impl Method {
    pub fn solver(&self, config: SolverConfig) -> Box<dyn LoadFlowSolver> {
        match self {
            Method::GaussSeidel => Box::new(GaussSeidel::new(config)),
            Method::NewtonRaphson => Box::new(NewtonRaphson::full(config)),
            Method::Decoupled => Box::new(NewtonRaphson::decoupled(config)),
            Method::FastDecoupled => Box::new(NewtonRaphson::fast_decoupled(config)),
        }
    }
}

/// Solves `network` with default settings apart from the iteration bounds.
pub fn solve(
    network: &Network,
    method: Method,
    threshold: f64,
    max_iteration: usize,
    min_iteration: Option<usize>,
) -> Result<PowerFlowResult<LoadFlowSolution>, NetworkError> {
    let config = SolverConfig::new(threshold, max_iteration)
        .with_min_iteration(min_iteration.unwrap_or_default());
    method.solver(config).solve(network)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testcases::glover_5bus;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_all_methods_reach_the_same_state() {
        let net = glover_5bus();
        let reference = solve(&net, Method::NewtonRaphson, 1e-6, 20, None).unwrap();
        assert!(reference.is_converged());

        for (method, threshold) in [
            (Method::GaussSeidel, 1e-6),
            (Method::Decoupled, 1e-6),
            (Method::FastDecoupled, 1e-6),
        ] {
            let res = solve(&net, method, threshold, 200, None).unwrap();
            assert!(res.is_converged(), "{method:?}: {}", res.message);
            for (a, b) in res.payload.buses.iter().zip(&reference.payload.buses) {
                assert_eq!(a.id, b.id);
                assert_abs_diff_eq!(a.vm_pu, b.vm_pu, epsilon = 1e-3);
                assert_abs_diff_eq!(a.va_degree, b.va_degree, epsilon = 0.05);
            }
        }
    }

    #[test]
    fn test_invalid_network_is_an_error() {
        let net = Network::new(vec![Bus::slack(1, 1.0)], vec![]).unwrap();
        let res = solve(&net, Method::GaussSeidel, 1e-4, 10, Some(0)).unwrap();
        assert_eq!(res.error, ErrorKind::None);

        let missing_slack = Network::new(vec![Bus::pq(1, 0.1, 0.0)], vec![]);
        assert_eq!(missing_slack.unwrap_err(), NetworkError::NoSlackBus);
    }

    #[test]
    fn test_min_iteration_forwarded() {
        let net = glover_5bus();
        let res = solve(&net, Method::NewtonRaphson, 1e-4, 50, Some(9)).unwrap();
        assert!(res.is_converged());
        assert_eq!(res.iterations, 10);
    }
}
