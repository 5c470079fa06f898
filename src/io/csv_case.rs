use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::ReaderBuilder;
use serde::de::DeserializeOwned;

use crate::basic::network::{Bus, Line, Network};
use crate::error::NetworkError;

/// Reads every record of a CSV table with a header row.
fn read_records<T: DeserializeOwned, R: Read>(reader: R) -> Result<Vec<T>, NetworkError> {
    let mut rdr = ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut records = Vec::new();
    for record in rdr.deserialize() {
        records.push(record?);
    }
    Ok(records)
}

fn load_table<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, NetworkError> {
    read_records(File::open(path)?)
}

/// Builds a network from in-memory `bus` and `line` tables.
pub fn network_from_csv<B: Read, L: Read>(bus: B, line: L) -> Result<Network, NetworkError> {
    let buses: Vec<Bus> = read_records(bus)?;
    let lines: Vec<Line> = read_records(line)?;
    Network::new(buses, lines)
}

/// Loads `bus.csv` and, when present, `line.csv` from a case folder.
///
/// Column names match the JSON field names; the bus type column accepts names or IEEE codes.
pub fn load_csv_folder(folder: impl AsRef<Path>) -> Result<Network, NetworkError> {
    let folder = folder.as_ref();
    let buses: Vec<Bus> = load_table(&folder.join("bus.csv"))?;
    let line_path = folder.join("line.csv");
    let lines: Vec<Line> = if line_path.exists() {
        load_table(&line_path)?
    } else {
        Vec::new()
    };
    Network::new(buses, lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic::network::{BusId, BusType};
    use crate::testcases::glover_5bus;
    use std::env;

    #[test]
    fn test_load_csv_folder() {
        let dir = env::var("CARGO_MANIFEST_DIR").unwrap();
        let net = load_csv_folder(format!("{dir}/cases/glover5")).unwrap();
        let reference = glover_5bus();
        assert_eq!(net.lines(), reference.lines());
        for (bus, expected) in net.buses().iter().zip(reference.buses()) {
            assert_eq!(bus.id, expected.id);
            assert_eq!(bus.bus_type, expected.bus_type, "bus {}", bus.id);
            assert_eq!(bus.scheduled_injection(), expected.scheduled_injection());
            assert_eq!(bus.q_limits(), expected.q_limits());
            assert_eq!(bus.v_sched, expected.v_sched);
        }
        assert_eq!(net.bus(BusId(3)).unwrap().name.as_deref(), Some("gen"));
        assert_eq!(net.bus(BusId(5)).unwrap().name, None);
    }

    #[test]
    fn test_csv_tables_in_memory() {
        let bus = "id,type,v_sched,p_load,q_load\n1,3,1.0,0,0\n2,load,1.0,1.0,0.5\n";
        let line = "id,from,to,r,x\n1,1,2,0.02,0.2\n";
        let net = network_from_csv(bus.as_bytes(), line.as_bytes()).unwrap();
        assert_eq!(net.buses()[0].bus_type, BusType::Slack);
        assert_eq!(net.buses()[1].bus_type, BusType::PQ);
        assert_eq!(net.lines()[0].b, 0.0);
    }

    #[test]
    fn test_bad_csv_rows() {
        let bus = "id,type\n1,slack\n2,generator-ish\n";
        let err = network_from_csv(bus.as_bytes(), "id,from,to,r,x\n".as_bytes()).unwrap_err();
        assert!(matches!(err, NetworkError::Parse(_)), "{err:?}");

        let bus = "id,type\n1,slack\n2,pq\n";
        let line = "id,from,to,r,x\n1,1,9,0.02,0.2\n";
        let err = network_from_csv(bus.as_bytes(), line.as_bytes()).unwrap_err();
        assert_eq!(
            err,
            NetworkError::UnknownBus {
                line: 1,
                bus: BusId(9)
            }
        );
    }
}
