use std::collections::{HashMap, VecDeque};
use std::str::FromStr;

use derive_more::{Display, From, Into};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use num_complex::Complex64;
use num_derive::FromPrimitive;
use num_traits::{FromPrimitive, One, Zero};
use serde::{Deserialize, Serialize};

use crate::error::NetworkError;

/// External bus identifier as supplied by the case data.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, From, Into, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct BusId(pub i64);

/// Bus classification.
///
/// The numeric discriminants follow the IEEE common data format codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, Serialize, Deserialize)]
#[serde(try_from = "BusTypeTag", into = "String")]
pub enum BusType {
    PQ = 1,
    PV = 2,
    Slack = 3,
    Isolated = 4,
}

impl BusType {
    /// Parses an IEEE numeric bus code.
    pub fn from_code(code: i64) -> Result<Self, NetworkError> {
        BusType::from_i64(code).ok_or_else(|| NetworkError::UnknownBusType(code.to_string()))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BusType::PQ => "pq",
            BusType::PV => "pv",
            BusType::Slack => "slack",
            BusType::Isolated => "isolated",
        }
    }
}

impl std::fmt::Display for BusType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BusType {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pq" | "load" => Ok(BusType::PQ),
            "pv" | "gen" | "generator" => Ok(BusType::PV),
            "slack" | "ref" | "swing" => Ok(BusType::Slack),
            "isolated" | "oos" => Ok(BusType::Isolated),
            other => match other.parse::<i64>() {
                Ok(code) => BusType::from_code(code),
                Err(_) => Err(NetworkError::UnknownBusType(s.to_string())),
            },
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BusTypeTag {
    Code(i64),
    Name(String),
}

impl TryFrom<BusTypeTag> for BusType {
    type Error = NetworkError;

    fn try_from(value: BusTypeTag) -> Result<Self, Self::Error> {
        match value {
            BusTypeTag::Code(code) => BusType::from_code(code),
            BusTypeTag::Name(name) => name.parse(),
        }
    }
}

impl From<BusType> for String {
    fn from(value: BusType) -> Self {
        value.as_str().to_string()
    }
}

fn default_vm() -> f64 {
    1.0
}

/// A network node with its scheduled quantities, all in per-unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bus {
    pub id: BusId,
    #[serde(rename = "type")]
    pub bus_type: BusType,
    /// Scheduled voltage magnitude, used by PV and slack buses.
    #[serde(default = "default_vm")]
    pub v_sched: f64,
    /// Slack bus reference angle in degrees.
    #[serde(default)]
    pub v_angle_deg: f64,
    #[serde(default)]
    pub p_load: f64,
    #[serde(default)]
    pub q_load: f64,
    #[serde(default)]
    pub p_gen: f64,
    /// Scheduled reactive generation (PQ buses only).
    #[serde(default)]
    pub q_gen: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q_max: Option<f64>,
    #[serde(default)]
    pub g_shunt: f64,
    #[serde(default)]
    pub b_shunt: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Bus {
    pub fn new(id: i64, bus_type: BusType) -> Self {
        Self {
            id: BusId(id),
            bus_type,
            v_sched: 1.0,
            v_angle_deg: 0.0,
            p_load: 0.0,
            q_load: 0.0,
            p_gen: 0.0,
            q_gen: 0.0,
            q_min: None,
            q_max: None,
            g_shunt: 0.0,
            b_shunt: 0.0,
            name: None,
        }
    }

    pub fn slack(id: i64, v_sched: f64) -> Self {
        Self::new(id, BusType::Slack).with_voltage(v_sched)
    }

    pub fn pq(id: i64, p_load: f64, q_load: f64) -> Self {
        Self::new(id, BusType::PQ).with_load(p_load, q_load)
    }

    pub fn pv(id: i64, p_gen: f64, v_sched: f64) -> Self {
        Self::new(id, BusType::PV)
            .with_generation(p_gen, 0.0)
            .with_voltage(v_sched)
    }

    pub fn with_load(mut self, p: f64, q: f64) -> Self {
        self.p_load = p;
        self.q_load = q;
        self
    }

    pub fn with_generation(mut self, p: f64, q: f64) -> Self {
        self.p_gen = p;
        self.q_gen = q;
        self
    }

    pub fn with_voltage(mut self, v_sched: f64) -> Self {
        self.v_sched = v_sched;
        self
    }

    pub fn with_angle(mut self, degree: f64) -> Self {
        self.v_angle_deg = degree;
        self
    }

    pub fn with_q_limits(mut self, q_min: f64, q_max: f64) -> Self {
        self.q_min = Some(q_min);
        self.q_max = Some(q_max);
        self
    }

    pub fn with_shunt(mut self, g: f64, b: f64) -> Self {
        self.g_shunt = g;
        self.b_shunt = b;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Scheduled net injection `(Pgen - Pload) + j(Qgen - Qload)`.
    pub fn scheduled_injection(&self) -> Complex64 {
        Complex64::new(self.p_gen - self.p_load, self.q_gen - self.q_load)
    }

    /// Reactive generation limits, unbounded where not given.
    pub fn q_limits(&self) -> (f64, f64) {
        (
            self.q_min.unwrap_or(f64::NEG_INFINITY),
            self.q_max.unwrap_or(f64::INFINITY),
        )
    }
}

/// A pi-model branch. `g` and `b` are the total shunt values, split evenly between both ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub id: i64,
    pub from: BusId,
    pub to: BusId,
    pub r: f64,
    pub x: f64,
    #[serde(default)]
    pub g: f64,
    #[serde(default)]
    pub b: f64,
}

impl Line {
    pub fn new(id: i64, from: i64, to: i64, r: f64, x: f64) -> Self {
        Self {
            id,
            from: BusId(from),
            to: BusId(to),
            r,
            x,
            g: 0.0,
            b: 0.0,
        }
    }

    pub fn with_shunt(mut self, g: f64, b: f64) -> Self {
        self.g = g;
        self.b = b;
        self
    }

    pub fn series_admittance(&self) -> Result<Complex64, NetworkError> {
        let z = Complex64::new(self.r, self.x);
        if z.is_zero() {
            return Err(NetworkError::ZeroImpedance { line: self.id });
        }
        Ok(z.inv())
    }

    /// Shunt admittance placed at each terminal.
    pub fn half_shunt(&self) -> Complex64 {
        Complex64::new(self.g, self.b) * 0.5
    }
}

/// Validated buses and lines. Bus positions in [`Network::buses`] are the dense indices used
/// for the admittance matrix rows and columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "NetworkData", into = "NetworkData")]
pub struct Network {
    buses: Vec<Bus>,
    lines: Vec<Line>,
    lookup: HashMap<BusId, usize>,
    slack: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct NetworkData {
    buses: Vec<Bus>,
    #[serde(default)]
    lines: Vec<Line>,
}

impl TryFrom<NetworkData> for Network {
    type Error = NetworkError;

    fn try_from(value: NetworkData) -> Result<Self, Self::Error> {
        Network::new(value.buses, value.lines)
    }
}

impl From<Network> for NetworkData {
    fn from(value: Network) -> Self {
        NetworkData {
            buses: value.buses,
            lines: value.lines,
        }
    }
}

impl Network {
    pub fn new(buses: Vec<Bus>, lines: Vec<Line>) -> Result<Self, NetworkError> {
        let lookup = create_bus_lookup(&buses)?;
        validate_lines(&buses, &lines, &lookup)?;
        let slack = find_slack(&buses)?;
        check_connectivity(&buses, &lines, &lookup, slack)?;
        Ok(Self {
            buses,
            lines,
            lookup,
            slack,
        })
    }

    pub fn buses(&self) -> &[Bus] {
        &self.buses
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    /// Dense index of a bus id.
    pub fn index_of(&self, id: BusId) -> Option<usize> {
        self.lookup.get(&id).copied()
    }

    pub fn bus(&self, id: BusId) -> Option<&Bus> {
        self.index_of(id).map(|idx| &self.buses[idx])
    }

    pub fn slack_index(&self) -> usize {
        self.slack
    }

    pub fn admittance(&self) -> Result<CsrMatrix<Complex64>, NetworkError> {
        build_admittance(&self.buses, &self.lines)
    }
}

fn create_bus_lookup(buses: &[Bus]) -> Result<HashMap<BusId, usize>, NetworkError> {
    let mut lookup = HashMap::with_capacity(buses.len());
    for (idx, bus) in buses.iter().enumerate() {
        if lookup.insert(bus.id, idx).is_some() {
            return Err(NetworkError::DuplicateBus(bus.id));
        }
    }
    Ok(lookup)
}

fn validate_lines(
    buses: &[Bus],
    lines: &[Line],
    lookup: &HashMap<BusId, usize>,
) -> Result<(), NetworkError> {
    for line in lines {
        let (from, to) = line_terminals(line, lookup)?;
        if from == to {
            return Err(NetworkError::SelfLoop {
                line: line.id,
                bus: line.from,
            });
        }
        for idx in [from, to] {
            if buses[idx].bus_type == BusType::Isolated {
                return Err(NetworkError::IsolatedBusConnected {
                    line: line.id,
                    bus: buses[idx].id,
                });
            }
        }
        line.series_admittance()?;
    }
    Ok(())
}

fn find_slack(buses: &[Bus]) -> Result<usize, NetworkError> {
    let slack: Vec<usize> = buses
        .iter()
        .enumerate()
        .filter(|(_, b)| b.bus_type == BusType::Slack)
        .map(|(idx, _)| idx)
        .collect();
    match slack.as_slice() {
        [] => Err(NetworkError::NoSlackBus),
        [idx] => Ok(*idx),
        many => Err(NetworkError::MultipleSlackBuses(
            many.iter().map(|&idx| buses[idx].id).collect(),
        )),
    }
}

/// Walks the line graph from the slack bus. Every bus other than an isolated one must be reached.
fn check_connectivity(
    buses: &[Bus],
    lines: &[Line],
    lookup: &HashMap<BusId, usize>,
    slack: usize,
) -> Result<(), NetworkError> {
    let mut neighbors = vec![Vec::new(); buses.len()];
    for line in lines {
        let (from, to) = line_terminals(line, lookup)?;
        neighbors[from].push(to);
        neighbors[to].push(from);
    }

    let mut visited = vec![false; buses.len()];
    let mut queue = VecDeque::from([slack]);
    visited[slack] = true;
    while let Some(node) = queue.pop_front() {
        for &next in &neighbors[node] {
            if !visited[next] {
                visited[next] = true;
                queue.push_back(next);
            }
        }
    }

    match buses
        .iter()
        .zip(&visited)
        .find(|(bus, reached)| !**reached && bus.bus_type != BusType::Isolated)
    {
        Some((bus, _)) => Err(NetworkError::Unreachable { bus: bus.id }),
        None => Ok(()),
    }
}

fn line_terminals(
    line: &Line,
    lookup: &HashMap<BusId, usize>,
) -> Result<(usize, usize), NetworkError> {
    let resolve = |bus: BusId| {
        lookup
            .get(&bus)
            .copied()
            .ok_or(NetworkError::UnknownBus { line: line.id, bus })
    };
    Ok((resolve(line.from)?, resolve(line.to)?))
}

/// Creates the bus-by-line incidence matrix (+1 at the from bus, -1 at the to bus).
fn create_incidence_mat(
    nodes: usize,
    lines: &[Line],
    lookup: &HashMap<BusId, usize>,
) -> Result<CooMatrix<Complex64>, NetworkError> {
    let mut incidence_matrix = CooMatrix::new(nodes, lines.len());
    for (idx, line) in lines.iter().enumerate() {
        let (from, to) = line_terminals(line, lookup)?;
        incidence_matrix.push(from, idx, Complex64::one());
        incidence_matrix.push(to, idx, -Complex64::one());
    }
    Ok(incidence_matrix)
}

/// Builds the nodal admittance matrix.
///
/// The series part is `A * diag(y) * A^T` with `A` the incidence matrix; line half-shunts and
/// bus shunts are added to the diagonal. Connectivity to the slack bus is not required here,
/// only by [`Network::new`].
///
/// # Arguments
///
/// * `buses` - The buses in matrix order. Isolated buses get an empty row and column.
/// * `lines` - The lines, referencing buses by id.
///
/// # Returns
///
/// The symmetric admittance matrix in per-unit as a CSR matrix, row `i` corresponding to
/// `buses[i]`, or the first [`NetworkError`] found among duplicate bus ids, unknown or
/// self-looped line terminals, lines touching isolated buses and zero-impedance lines.
pub fn build_admittance(
    buses: &[Bus],
    lines: &[Line],
) -> Result<CsrMatrix<Complex64>, NetworkError> {
    let nodes = buses.len();
    let lookup = create_bus_lookup(buses)?;
    validate_lines(buses, lines, &lookup)?;

    let incidence_matrix = CsrMatrix::from(&create_incidence_mat(nodes, lines, &lookup)?);
    let mut diag_admit = CsrMatrix::identity(lines.len());
    for (value, line) in diag_admit.values_mut().iter_mut().zip(lines) {
        *value = line.series_admittance()?;
    }
    let series = &incidence_matrix * &(&diag_admit * &incidence_matrix.transpose());

    let mut shunt = CooMatrix::new(nodes, nodes);
    for (idx, bus) in buses.iter().enumerate() {
        if bus.bus_type != BusType::Isolated {
            shunt.push(idx, idx, Complex64::new(bus.g_shunt, bus.b_shunt));
        }
    }
    for line in lines {
        let (from, to) = line_terminals(line, &lookup)?;
        shunt.push(from, from, line.half_shunt());
        shunt.push(to, to, line.half_shunt());
    }
    let shunt = CsrMatrix::from(&shunt);

    Ok(&series + &shunt)
}

/// Reads one entry of a sparse admittance matrix, zero when structurally absent.
pub(crate) fn y_entry(y_bus: &CsrMatrix<Complex64>, row: usize, col: usize) -> Complex64 {
    y_bus
        .get_entry(row, col)
        .map(|e| e.into_value())
        .unwrap_or_else(Complex64::zero)
}
