use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::basic::config::SolverConfig;
use crate::basic::network::{Bus, Line, Network};
use crate::error::NetworkError;

/// A network together with the solver settings it should be run with.
///
/// On disk this is the network object (`buses`, `lines`) with an optional `config` key.
#[derive(Debug, Clone, Serialize)]
pub struct Case {
    #[serde(flatten)]
    pub network: Network,
    pub config: SolverConfig,
}

/// File contents before [`Network::new`] validation.
#[derive(Deserialize)]
struct RawCase {
    buses: Vec<Bus>,
    #[serde(default)]
    lines: Vec<Line>,
    #[serde(default)]
    config: SolverConfig,
}

impl Network {
    /// Parses and validates a network from its JSON form.
    pub fn from_json(text: &str) -> Result<Self, NetworkError> {
        Ok(Case::from_json(text)?.network)
    }

    pub fn to_json(&self) -> Result<String, NetworkError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl SolverConfig {
    /// Missing keys take their default values.
    pub fn from_json(text: &str) -> Result<Self, NetworkError> {
        Ok(serde_json::from_str(text)?)
    }
}

impl Case {
    pub fn from_json(text: &str) -> Result<Self, NetworkError> {
        let raw: RawCase = serde_json::from_str(text)?;
        Ok(Self {
            network: Network::new(raw.buses, raw.lines)?,
            config: raw.config,
        })
    }

    pub fn to_json(&self) -> Result<String, NetworkError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Reads a case file. A file without a `config` key yields the default settings.
pub fn load_case(path: impl AsRef<Path>) -> Result<Case, NetworkError> {
    let text = fs::read_to_string(path)?;
    Case::from_json(&text)
}
