use std::collections::HashMap;
use std::convert::Infallible;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::models::Station;
use crate::source::StationSource;
use crate::trend::Scenario;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Failed to read station registry {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Invalid station registry {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
    #[error("Station registry {0} lists no stations")]
    Empty(String),
}

/// Station registry held in memory
///
/// Either the built-in demonstration station or the contents of a JSON file.
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    stations: Vec<Station>,
    global_scenario: Option<Scenario>,
    overrides: HashMap<String, Scenario>,
}

/// Accepted registry file layouts: a bare list of stations, or a document
/// with optional run-wide scenario and per-station overrides
#[derive(Deserialize)]
#[serde(untagged)]
enum RegistryFile {
    Document {
        stations: Vec<Station>,
        #[serde(default)]
        global_scenario: Option<Scenario>,
        #[serde(default)]
        overrides: HashMap<String, Scenario>,
    },
    List(Vec<Station>),
}

impl StaticRegistry {
    pub fn new(stations: Vec<Station>) -> Self {
        Self {
            stations,
            ..Self::default()
        }
    }

    /// Single built-in station W06744
    pub fn builtin() -> Self {
        Self::new(vec![Station::default_station()])
    }

    pub fn from_json_str(contents: &str, origin: &str) -> Result<Self, RegistryError> {
        let parsed: RegistryFile =
            serde_json::from_str(contents).map_err(|source| RegistryError::Parse {
                path: origin.to_string(),
                source,
            })?;

        let registry = match parsed {
            RegistryFile::Document {
                stations,
                global_scenario,
                overrides,
            } => Self {
                stations,
                global_scenario,
                overrides,
            },
            RegistryFile::List(stations) => Self::new(stations),
        };

        if registry.stations.is_empty() {
            return Err(RegistryError::Empty(origin.to_string()));
        }
        Ok(registry)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, RegistryError> {
        let origin = path.display().to_string();
        let contents = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: origin.clone(),
            source,
        })?;
        let registry = Self::from_json_str(&contents, &origin)?;
        info!("Loaded {} stations from {}", registry.stations.len(), origin);
        Ok(registry)
    }

    pub fn with_global_scenario(mut self, scenario: Scenario) -> Self {
        self.global_scenario = Some(scenario);
        self
    }

    pub fn with_override(mut self, station_id: &str, scenario: Scenario) -> Self {
        self.overrides.insert(station_id.to_string(), scenario);
        self
    }

    pub fn stations(&self) -> &[Station] {
        &self.stations
    }
}

impl StationSource for StaticRegistry {
    type Error = Infallible;

    async fn list_stations(&self) -> Result<Vec<Station>, Infallible> {
        Ok(self.stations.clone())
    }

    async fn scenario_override(&self, station_id: &str) -> Result<Option<Scenario>, Infallible> {
        Ok(self.overrides.get(station_id).cloned())
    }

    async fn global_default_scenario(&self) -> Result<Option<Scenario>, Infallible> {
        Ok(self.global_scenario.clone())
    }
}
