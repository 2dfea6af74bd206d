use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::trend::Scenario;

/// Site type written with every simulated reading
pub const DEFAULT_SITE_TYPE: &str = "DWLR Station";

/// Level used when neither the station nor the store provides one, in metres
pub const DEFAULT_START_LEVEL: f64 = 3.0;

/// Monitoring station being simulated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub wlcode: String,
    #[serde(default)]
    pub lat: f64,
    #[serde(default)]
    pub lon: f64,
    #[serde(default)]
    pub district: String,
    #[serde(default)]
    pub state: String,
    /// Assigned trend; the run-wide default applies when absent
    #[serde(default)]
    pub scenario: Option<Scenario>,
    /// Level used only when the station has no stored readings
    #[serde(default)]
    pub start_level: Option<f64>,
}

impl Station {
    /// Built-in demonstration station (Varanasi, Uttar Pradesh)
    pub fn default_station() -> Self {
        Self {
            wlcode: "W06744".to_string(),
            lat: 25.3176,
            lon: 82.9739,
            district: "Varanasi".to_string(),
            state: "Uttar Pradesh".to_string(),
            scenario: Some(Scenario::Normal),
            start_level: Some(DEFAULT_START_LEVEL),
        }
    }

    /// Station known only by its code, carrying the default station's metadata
    pub fn with_code(wlcode: &str) -> Self {
        Self {
            wlcode: wlcode.to_string(),
            ..Self::default_station()
        }
    }
}

/// Resume point for a station: its most recent stored reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cursor {
    pub timestamp: DateTime<Utc>,
    /// `None` when the stored row has no level
    pub water_level: Option<f64>,
}

/// One simulated reading, as handed to the sinks
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub sequence_no: i64,
    pub wlcode: String,
    pub timestamp: DateTime<Utc>,
    pub water_level: f64,
    pub scenario: Scenario,
    pub lat: f64,
    pub lon: f64,
    pub district: String,
    pub state: String,
    pub site_type: String,
}

impl Reading {
    pub fn new(
        station: &Station,
        scenario: &Scenario,
        site_type: &str,
        sequence_no: i64,
        timestamp: DateTime<Utc>,
        water_level: f64,
    ) -> Self {
        Self {
            sequence_no,
            wlcode: station.wlcode.clone(),
            timestamp,
            water_level,
            scenario: scenario.clone(),
            lat: station.lat,
            lon: station.lon,
            district: station.district.clone(),
            state: station.state.clone(),
            site_type: site_type.to_string(),
        }
    }
}
