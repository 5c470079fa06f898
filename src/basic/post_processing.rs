use std::fmt;
use std::io;

use csv::Writer;
use nalgebra_sparse::CsrMatrix;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use tabled::{Table, settings::Style};

mod res_display;
use res_display::*;

use super::bus_state::{BusResult, calc_bus_power};
use super::network::{BusId, BusType, Network};

/// Final state of one bus, per-unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusSolution {
    pub id: BusId,
    /// Type at the end of the solve; a PV bus pinned at a reactive limit reports PQ.
    pub bus_type: BusType,
    pub initial_type: BusType,
    pub vm_pu: f64,
    pub va_degree: f64,
    pub p_gen: f64,
    pub q_gen: f64,
    pub p_load: f64,
    pub q_load: f64,
    pub p_inj: f64,
    pub q_inj: f64,
    pub error: f64,
}

/// Branch flows at both terminals, per-unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineSolution {
    pub id: i64,
    pub from: BusId,
    pub to: BusId,
    pub p_from: f64,
    pub q_from: f64,
    pub p_to: f64,
    pub q_to: f64,
    pub p_loss: f64,
    pub q_loss: f64,
    pub i_from: f64,
    pub i_to: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadFlowSolution {
    pub buses: Vec<BusSolution>,
    /// Empty unless the solve converged.
    pub lines: Vec<LineSolution>,
    /// Net injection at the slack bus.
    pub slack_power: Complex64,
}

impl LoadFlowSolution {
    pub fn bus(&self, id: BusId) -> Option<&BusSolution> {
        self.buses.iter().find(|b| b.id == id)
    }

    pub fn line(&self, id: i64) -> Option<&LineSolution> {
        self.lines.iter().find(|l| l.id == id)
    }

    pub fn total_generation(&self) -> Complex64 {
        self.buses
            .iter()
            .map(|b| Complex64::new(b.p_gen, b.q_gen))
            .sum()
    }

    pub fn total_load(&self) -> Complex64 {
        self.buses
            .iter()
            .filter(|b| b.bus_type != BusType::Isolated)
            .map(|b| Complex64::new(b.p_load, b.q_load))
            .sum()
    }

    /// Sum of series and shunt losses over all lines.
    pub fn total_losses(&self) -> Complex64 {
        self.lines
            .iter()
            .map(|l| Complex64::new(l.p_loss, l.q_loss))
            .sum()
    }

    pub fn bus_table(&self) -> String {
        let rows = self.buses.iter().map(|b| BusResTable {
            Bus: b.id.0,
            Type: b.bus_type.to_string(),
            Vm_pu: FloatWrapper::new(b.vm_pu, 4),
            Va_deg: FloatWrapper::new(b.va_degree, 3),
            P_gen: FloatWrapper::new(b.p_gen, 4),
            Q_gen: FloatWrapper::new(b.q_gen, 4),
            P_load: FloatWrapper::new(b.p_load, 4),
            Q_load: FloatWrapper::new(b.q_load, 4),
        });
        Table::new(rows).with(Style::markdown()).to_string()
    }

    pub fn line_table(&self) -> String {
        let rows = self.lines.iter().map(|l| LineResTable {
            line: l.id,
            from: l.from.0,
            to: l.to.0,
            p_from: FloatWrapper::new(l.p_from, 4),
            q_from: FloatWrapper::new(l.q_from, 4),
            p_to: FloatWrapper::new(l.p_to, 4),
            q_to: FloatWrapper::new(l.q_to, 4),
            p_loss: FloatWrapper::new(l.p_loss, 5),
            q_loss: FloatWrapper::new(l.q_loss, 5),
            i_from: FloatWrapper::new(l.i_from, 4),
            i_to: FloatWrapper::new(l.i_to, 4),
        });
        Table::new(rows).with(Style::markdown()).to_string()
    }

    pub fn write_bus_csv<W: io::Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut wtr = Writer::from_writer(writer);
        for bus in &self.buses {
            wtr.serialize(bus)?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn write_line_csv<W: io::Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut wtr = Writer::from_writer(writer);
        for line in &self.lines {
            wtr.serialize(line)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

impl fmt::Display for LoadFlowSolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.bus_table())?;
        if !self.lines.is_empty() {
            writeln!(f)?;
            writeln!(f, "{}", self.line_table())?;
        }
        let losses = self.total_losses();
        write!(
            f,
            "slack injection: {:.5} + j{:.5}, losses: {:.5} + j{:.5}",
            self.slack_power.re, self.slack_power.im, losses.re, losses.im
        )
    }
}

fn extract_res_bus(k: usize, y_bus: &CsrMatrix<Complex64>, buses: &[BusResult]) -> BusSolution {
    let state = &buses[k];
    let bus = state.bus;
    let (p_gen, q_gen) = match state.bus_type {
        BusType::Slack => {
            let s = calc_bus_power(k, y_bus, buses);
            (s.re + bus.p_load, s.im + bus.q_load)
        }
        BusType::PV => {
            let s = calc_bus_power(k, y_bus, buses);
            (bus.p_gen, s.im + bus.q_load)
        }
        BusType::PQ => (state.s_bus.re + bus.p_load, state.s_bus.im + bus.q_load),
        BusType::Isolated => (0.0, 0.0),
    };
    BusSolution {
        id: bus.id,
        bus_type: state.bus_type,
        initial_type: state.initial_type(),
        vm_pu: state.v.norm(),
        va_degree: state.v.arg().to_degrees(),
        p_gen,
        q_gen,
        p_load: bus.p_load,
        q_load: bus.q_load,
        p_inj: p_gen - bus.p_load,
        q_inj: q_gen - bus.q_load,
        error: state.error(),
    }
}

fn extract_res_line(network: &Network, buses: &[BusResult]) -> Vec<LineSolution> {
    network
        .lines()
        .iter()
        .filter_map(|line| {
            let v_from = buses[network.index_of(line.from)?].v;
            let v_to = buses[network.index_of(line.to)?].v;
            let y = line.series_admittance().ok()?;
            let y_sh = line.half_shunt();
            let i_from = y * (v_from - v_to) + y_sh * v_from;
            let i_to = y * (v_to - v_from) + y_sh * v_to;
            let s_from = v_from * i_from.conj();
            let s_to = v_to * i_to.conj();
            let loss = s_from + s_to;
            Some(LineSolution {
                id: line.id,
                from: line.from,
                to: line.to,
                p_from: s_from.re,
                q_from: s_from.im,
                p_to: s_to.re,
                q_to: s_to.im,
                p_loss: loss.re,
                q_loss: loss.im,
                i_from: i_from.norm(),
                i_to: i_to.norm(),
            })
        })
        .collect()
}

/// Freezes the final bus state into a solution. Line flows are only computed for a converged
/// state.
pub(crate) fn post_process(
    network: &Network,
    y_bus: &CsrMatrix<Complex64>,
    buses: &[BusResult],
    converged: bool,
) -> LoadFlowSolution {
    let slack = network.slack_index();
    LoadFlowSolution {
        buses: (0..buses.len())
            .map(|k| extract_res_bus(k, y_bus, buses))
            .collect(),
        lines: if converged {
            extract_res_line(network, buses)
        } else {
            Vec::new()
        },
        slack_power: calc_bus_power(slack, y_bus, buses),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic::config::SolverConfig;
    use crate::basic::newtonpf::NewtonRaphson;
    use crate::basic::LoadFlowSolver;
    use crate::testcases::{glover_5bus, two_bus_radial};
    use approx::assert_relative_eq;

    fn solved_glover() -> LoadFlowSolution {
        let net = glover_5bus();
        let mut solver = NewtonRaphson::full(SolverConfig::new(1e-6, 20));
        let res = solver.solve(&net).unwrap();
        assert!(res.is_converged(), "{}", res.message);
        res.payload
    }

    #[test]
    fn test_line_losses_match_series_impedance() {
        let net = two_bus_radial();
        let mut solver = NewtonRaphson::full(SolverConfig::new(1e-8, 20));
        let res = solver.solve(&net).unwrap();
        assert!(res.is_converged());
        let sol = res.payload;
        let line = &sol.lines[0];
        let z = Complex64::new(net.lines()[0].r, net.lines()[0].x);
        let expected = z * line.i_from * line.i_from;
        assert_relative_eq!(line.p_loss, expected.re, epsilon = 1e-9);
        assert_relative_eq!(line.q_loss, expected.im, epsilon = 1e-9);
        // power out of the slack equals power into the load plus the loss
        assert_relative_eq!(line.p_from, -line.p_to + line.p_loss, epsilon = 1e-12);
        assert_relative_eq!(sol.slack_power.re, line.p_from, epsilon = 1e-6);
        assert_relative_eq!(sol.slack_power.im, line.q_from, epsilon = 1e-6);
    }

    #[test]
    fn test_power_balance() {
        let sol = solved_glover();
        let balance = sol.total_generation() - sol.total_load() - sol.total_losses();
        assert!(balance.norm() < 1e-5, "unbalanced by {}", balance);

        let bus3 = sol.bus(BusId(3)).unwrap();
        assert_eq!(bus3.bus_type, BusType::PV);
        assert_relative_eq!(bus3.p_gen, 5.2);
        assert!((bus3.q_gen - 3.375).abs() < 0.01, "Q3 = {}", bus3.q_gen);
    }

    #[test]
    fn test_tables_and_csv() {
        let sol = solved_glover();
        let table = sol.bus_table();
        assert!(table.contains("Vm_pu"));
        assert_eq!(table.lines().count(), 2 + sol.buses.len());
        assert_eq!(sol.line_table().lines().count(), 2 + sol.lines.len());
        assert!(sol.to_string().contains("slack injection"));

        let mut out = Vec::new();
        sol.write_bus_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut rows = text.lines();
        assert!(rows.next().unwrap().starts_with("id,bus_type,initial_type,vm_pu"));
        assert!(rows.next().unwrap().starts_with("1,slack,slack,1.0"));

        let mut out = Vec::new();
        sol.write_line_csv(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap().lines().count(), 1 + sol.lines.len());
    }
}
