use super::bus_state::BusResult;
use super::network::BusType;

/// Newton-family indexing context.
///
/// Non-slack buses are ordered PV first, then PQ, each group in network order. A bus's angle
/// column and P row are its position in that order; a PQ bus's magnitude column and Q row are its
/// position among the PQ buses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NRBuses {
    /// Dense bus indices in angle/P order.
    pub non_slack: Vec<usize>,
    pub pv: Vec<usize>,
    /// Dense bus indices in magnitude/Q order.
    pub pq: Vec<usize>,
    pub slack: Option<usize>,
}

impl NRBuses {
    /// Number of angle unknowns (`N`).
    pub fn n(&self) -> usize {
        self.non_slack.len()
    }

    /// Number of magnitude unknowns (`Npq`).
    pub fn npq(&self) -> usize {
        self.pq.len()
    }

    /// Size of the full Newton system.
    pub fn dim(&self) -> usize {
        self.n() + self.npq()
    }

    pub fn j1_dim(&self) -> (usize, usize) {
        (self.n(), self.n())
    }

    pub fn j2_dim(&self) -> (usize, usize) {
        (self.n(), self.npq())
    }

    pub fn j3_dim(&self) -> (usize, usize) {
        (self.npq(), self.n())
    }

    pub fn j4_dim(&self) -> (usize, usize) {
        (self.npq(), self.npq())
    }
}

/// Assigns P/Q/angle/magnitude indices from the current bus types.
///
/// Called at the start of every Newton iteration and again after any type switch. Isolated buses
/// and the slack get no index.
pub fn reindex_bus_pq(buses: &mut [BusResult]) -> NRBuses {
    let mut idx = NRBuses::default();
    for (k, bus) in buses.iter().enumerate() {
        match bus.bus_type {
            BusType::PV => idx.pv.push(k),
            BusType::PQ => idx.pq.push(k),
            BusType::Slack => idx.slack = Some(k),
            BusType::Isolated => {}
        }
    }
    idx.non_slack = idx.pv.iter().chain(idx.pq.iter()).copied().collect();

    for bus in buses.iter_mut() {
        bus.p_index = None;
        bus.q_index = None;
        bus.angle_index = None;
        bus.vm_index = None;
    }
    for (i, &k) in idx.non_slack.iter().enumerate() {
        buses[k].p_index = Some(i);
        buses[k].angle_index = Some(i);
    }
    for (i, &k) in idx.pq.iter().enumerate() {
        buses[k].q_index = Some(i);
        buses[k].vm_index = Some(i);
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic::bus_state::initialize;
    use crate::basic::network::BusId;
    use crate::testcases::{glover_5bus, islanded_bus};
    use num_complex::Complex64;

    #[test]
    fn test_pv_first_ordering() {
        let net = glover_5bus();
        let mut state = initialize(net.buses());
        let idx = reindex_bus_pq(&mut state);
        let i3 = net.index_of(BusId(3)).unwrap();
        let i2 = net.index_of(BusId(2)).unwrap();

        assert_eq!(idx.n(), 4);
        assert_eq!(idx.npq(), 3);
        assert_eq!(idx.j2_dim(), (4, 3));
        assert_eq!(idx.slack, Some(net.slack_index()));
        assert_eq!(state[i3].angle_index, Some(0));
        assert_eq!(state[i3].vm_index, None);
        assert_eq!(state[i2].angle_index, Some(1));
        assert_eq!(state[i2].q_index, Some(0));
        assert!(state[net.slack_index()].p_index.is_none());
    }

    #[test]
    fn test_reindex_is_idempotent() {
        let net = glover_5bus();
        let mut state = initialize(net.buses());
        let first = reindex_bus_pq(&mut state);
        let slots: Vec<_> = state.iter().map(|b| (b.p_index, b.vm_index)).collect();
        let second = reindex_bus_pq(&mut state);
        assert_eq!(first, second);
        let again: Vec<_> = state.iter().map(|b| (b.p_index, b.vm_index)).collect();
        assert_eq!(slots, again);
    }

    #[test]
    fn test_reindex_after_switch() {
        let net = glover_5bus();
        let mut state = initialize(net.buses());
        let i3 = net.index_of(BusId(3)).unwrap();
        reindex_bus_pq(&mut state);
        let s = state[i3].s_bus;
        state[i3].demote_to_pq(Complex64::new(s.re, 3.6), crate::basic::bus_state::QLimitSide::Max);
        let idx = reindex_bus_pq(&mut state);
        assert_eq!(idx.j1_dim(), (4, 4));
        assert_eq!(idx.j4_dim(), (4, 4));
        assert!(idx.pv.is_empty());
        assert_eq!(state[i3].vm_index, Some(1));
    }

    #[test]
    fn test_isolated_bus_has_no_index() {
        let net = islanded_bus();
        let mut state = initialize(net.buses());
        let idx = reindex_bus_pq(&mut state);
        let iso = state
            .iter()
            .position(|b| b.bus_type == BusType::Isolated)
            .unwrap();
        assert!(!idx.non_slack.contains(&iso));
        assert!(state[iso].angle_index.is_none());
    }
}
