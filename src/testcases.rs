//! Small reference networks used by the tests and demos. All values are per-unit.

use crate::basic::network::{Bus, BusType, Line, Network};

/// The 5-bus system from Glover, Sarma & Overbye, example 6.9.
///
/// Bus 1 is the slack at 1.0∠0, bus 3 a 5.2 p.u. generator held at 1.05 with
/// `-2.8 <= Qgen <= 4.0`, bus 2 carries the 8.0 + j2.8 load.
pub fn glover_5bus() -> Network {
    let buses = vec![
        Bus::slack(1, 1.0),
        Bus::pq(2, 8.0, 2.8),
        Bus::pv(3, 5.2, 1.05)
            .with_load(0.8, 0.4)
            .with_q_limits(-2.8, 4.0),
        Bus::pq(4, 0.0, 0.0),
        Bus::pq(5, 0.0, 0.0),
    ];
    let lines = vec![
        Line::new(1, 1, 5, 0.0015, 0.02),
        Line::new(2, 2, 4, 0.009, 0.1).with_shunt(0.0, 1.72),
        Line::new(3, 2, 5, 0.0045, 0.05).with_shunt(0.0, 0.88),
        Line::new(4, 3, 4, 0.00075, 0.01),
        Line::new(5, 4, 5, 0.00225, 0.025).with_shunt(0.0, 0.44),
    ];
    network(buses, lines)
}

/// A slack bus feeding a 1.0 + j0.5 load through `z = 0.02 + j0.2`.
pub fn two_bus_radial() -> Network {
    radial(1.0, 0.5)
}

/// The radial feeder loaded past its transfer limit; no power-flow solution exists.
pub fn overloaded_two_bus() -> Network {
    radial(2.0, 1.0)
}

/// [`two_bus_radial`] plus an out-of-service bus 3 with no connections.
pub fn islanded_bus() -> Network {
    let base = two_bus_radial();
    let mut buses = base.buses().to_vec();
    buses.push(Bus::new(3, BusType::Isolated));
    network(buses, base.lines().to_vec())
}

fn radial(p_load: f64, q_load: f64) -> Network {
    network(
        vec![Bus::slack(1, 1.0), Bus::pq(2, p_load, q_load)],
        vec![Line::new(1, 1, 2, 0.02, 0.2)],
    )
}

fn network(buses: Vec<Bus>, lines: Vec<Line>) -> Network {
    Network::new(buses, lines).expect("built-in case is valid")
}
