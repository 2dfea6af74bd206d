//! Boundaries between the backfill loop and the outside world
//!
//! Each collaborator reports "absent" as `Ok(None)` and "failed" as `Err`, so
//! the backfill service can decide per case whether to degrade or abort.

use crate::models::{Cursor, Reading, Station};
use crate::trend::Scenario;

/// Result of handing one reading to a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Inserted,
    /// The store already holds a reading for this station and timestamp
    Duplicate,
}

/// Registry of stations to simulate
#[allow(async_fn_in_trait)]
pub trait StationSource {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn list_stations(&self) -> Result<Vec<Station>, Self::Error>;

    /// Scenario forced for one station, taking precedence over its assignment
    async fn scenario_override(&self, _station_id: &str) -> Result<Option<Scenario>, Self::Error> {
        Ok(None)
    }

    /// Run-wide scenario for stations without an assignment
    async fn global_default_scenario(&self) -> Result<Option<Scenario>, Self::Error>;
}

/// Lookup of where each station left off
#[allow(async_fn_in_trait)]
pub trait CursorSource {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn last_reading(&self, station_id: &str) -> Result<Option<Cursor>, Self::Error>;

    /// Highest sequence number across every stored reading
    async fn max_sequence_no(&self) -> Result<Option<i64>, Self::Error>;
}

/// Destination for simulated readings
#[allow(async_fn_in_trait)]
pub trait ReadingSink {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn append(&self, reading: &Reading) -> Result<AppendOutcome, Self::Error>;
}
