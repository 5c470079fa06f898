use std::time::Instant;

use super::config::{DivergenceConfig, SolverConfig};
use crate::error::ErrorKind;

/// Periodic error-growth test.
///
/// Every `check_interval` iterations the current error is compared against the reference
/// captured at the previous check; growth beyond `growth_factor` times the reference is
/// divergence. The reference is refreshed on every check that passes.
#[derive(Debug, Clone, Copy)]
pub struct DivergenceMonitor {
    config: DivergenceConfig,
}

impl DivergenceMonitor {
    pub fn new(config: DivergenceConfig) -> Self {
        Self { config }
    }

    pub fn is_check_iteration(&self, iteration: usize) -> bool {
        self.config.check_interval > 0 && iteration % self.config.check_interval == 0
    }

    /// Returns `true` when `error` diverged from `reference`; otherwise stores it as the new
    /// reference. A non-finite error always counts as divergence.
    pub fn check(&self, error: f64, reference: &mut Option<f64>) -> bool {
        if !error.is_finite() {
            return true;
        }
        let diverged = reference.is_some_and(|r| r > 0.0 && error > self.config.growth_factor * r);
        if !diverged {
            *reference = Some(error);
        }
        diverged
    }
}

/// Cancellation and wall-clock budget for one solve.
#[derive(Debug, Clone)]
pub struct StopCondition<'a> {
    config: &'a SolverConfig,
    deadline: Option<Instant>,
}

impl<'a> StopCondition<'a> {
    pub fn start(config: &'a SolverConfig) -> Self {
        Self {
            config,
            deadline: config.deadline.map(|d| Instant::now() + d),
        }
    }

    /// `Some(Cancelled)` with a reason once the token fired or the deadline passed.
    pub fn poll(&self) -> Option<(ErrorKind, &'static str)> {
        if self.config.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
            return Some((ErrorKind::Cancelled, "cancelled by token"));
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Some((ErrorKind::Cancelled, "deadline exceeded"));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic::config::CancelToken;
    use std::time::Duration;

    #[test]
    fn test_growth_detection() {
        let monitor = DivergenceMonitor::new(DivergenceConfig::default());
        let mut reference = None;
        assert!(!monitor.check(0.5, &mut reference));
        assert_eq!(reference, Some(0.5));
        assert!(!monitor.check(1.4, &mut reference));
        assert_eq!(reference, Some(1.4));
        assert!(monitor.check(4.3, &mut reference));
        assert_eq!(reference, Some(1.4), "a diverged check keeps the old reference");
        assert!(monitor.check(f64::NAN, &mut reference));
    }

    #[test]
    fn test_check_iterations() {
        let monitor = DivergenceMonitor::new(DivergenceConfig::default());
        assert!(!monitor.is_check_iteration(4));
        assert!(monitor.is_check_iteration(5));
        assert!(monitor.is_check_iteration(10));
        let off = DivergenceMonitor::new(DivergenceConfig {
            check_interval: 0,
            growth_factor: 3.0,
        });
        assert!(!off.is_check_iteration(5));
    }

    #[test]
    fn test_stop_condition() {
        let token = CancelToken::new();
        let cfg = SolverConfig::default().with_cancel_token(token.clone());
        let stop = StopCondition::start(&cfg);
        assert!(stop.poll().is_none());
        token.cancel();
        assert_eq!(stop.poll().map(|(k, _)| k), Some(ErrorKind::Cancelled));

        let cfg = SolverConfig::default().with_deadline(Duration::ZERO);
        let stop = StopCondition::start(&cfg);
        assert_eq!(stop.poll(), Some((ErrorKind::Cancelled, "deadline exceeded")));
    }
}
