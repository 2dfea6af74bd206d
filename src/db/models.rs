use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::FromRow;

use crate::models::{Cursor, Station};
use crate::trend::Scenario;

// Row shapes shared by the Postgres repositories and the Supabase REST client

/// Row of the station registry table
#[derive(Debug, Clone, FromRow, Deserialize)]
pub struct StationScenarioRow {
    pub wlcode: String,
    #[serde(default)]
    pub scenario: Option<String>,
    #[serde(default)]
    pub start_level: Option<f64>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    #[serde(default)]
    pub district: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

impl From<StationScenarioRow> for Station {
    fn from(row: StationScenarioRow) -> Self {
        Station {
            wlcode: row.wlcode,
            lat: row.lat.unwrap_or_default(),
            lon: row.lon.unwrap_or_default(),
            district: row.district.unwrap_or_default(),
            state: row.state.unwrap_or_default(),
            scenario: row
                .scenario
                .filter(|tag| !tag.trim().is_empty())
                .map(|tag| Scenario::from_tag(&tag)),
            start_level: row.start_level,
        }
    }
}

/// Most recent stored reading for one station
#[derive(Debug, Clone, FromRow)]
pub struct LastReadingRow {
    pub timestamp: DateTime<Utc>,
    pub water_level: Option<f64>,
}

impl From<LastReadingRow> for Cursor {
    fn from(row: LastReadingRow) -> Self {
        Cursor {
            timestamp: row.timestamp,
            water_level: row.water_level,
        }
    }
}
