use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, instrument};

use crate::config::{SupabaseCredentials, TableNames};
use crate::db::StationScenarioRow;
use crate::models::{Cursor, Reading, Station};
use crate::source::{AppendOutcome, CursorSource, ReadingSink, StationSource};
use crate::trend::Scenario;

#[derive(Error, Debug)]
pub enum SupabaseError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Supabase returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unparseable timestamp '{0}'")]
    Timestamp(String),
}

/// Supabase PostgREST client covering the station registry, the settings row
/// and the readings table
#[derive(Clone)]
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    api_key: String,
    tables: TableNames,
}

#[derive(Deserialize)]
struct ScenarioRow {
    scenario: Option<String>,
}

#[derive(Deserialize)]
struct LevelRow {
    timestamp: String,
    #[serde(rename = "Water_Level")]
    water_level: Option<f64>,
}

#[derive(Deserialize)]
struct SequenceRow {
    #[serde(rename = "P_no")]
    p_no: Option<i64>,
}

/// Insert payload in the readings table's column naming
#[derive(Serialize)]
struct DistrictDataRecord<'a> {
    #[serde(rename = "P_no")]
    p_no: i64,
    #[serde(rename = "WLCODE")]
    wlcode: &'a str,
    timestamp: String,
    #[serde(rename = "Water_Level")]
    water_level: f64,
    #[serde(rename = "LAT")]
    lat: f64,
    #[serde(rename = "LON")]
    lon: f64,
    scenario: &'a str,
    #[serde(rename = "SITE_TYPE")]
    site_type: &'a str,
    #[serde(rename = "District")]
    district: &'a str,
    #[serde(rename = "State")]
    state: &'a str,
}

impl<'a> From<&'a Reading> for DistrictDataRecord<'a> {
    fn from(reading: &'a Reading) -> Self {
        Self {
            p_no: reading.sequence_no,
            wlcode: &reading.wlcode,
            timestamp: reading.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            water_level: reading.water_level,
            lat: reading.lat,
            lon: reading.lon,
            scenario: reading.scenario.as_str(),
            site_type: &reading.site_type,
            district: &reading.district,
            state: &reading.state,
        }
    }
}

impl SupabaseClient {
    pub fn new(credentials: &SupabaseCredentials, tables: &TableNames) -> Result<Self, SupabaseError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            base_url: credentials.url.trim_end_matches('/').to_string(),
            api_key: credentials.api_key.clone(),
            tables: tables.clone(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, SupabaseError> {
        let url = self.table_url(table);
        debug!("GET {}", url);

        let response = self
            .authorized(self.client.get(&url))
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(table = %table, status = status.as_u16(), "Supabase select failed");
            return Err(SupabaseError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json::<Vec<T>>().await?)
    }

    #[instrument(skip(self))]
    pub async fn fetch_stations(&self) -> Result<Vec<StationScenarioRow>, SupabaseError> {
        self.select(
            &self.tables.stations,
            &[
                ("select", "*".to_string()),
                ("order", "wlcode.asc".to_string()),
            ],
        )
        .await
    }

    #[instrument(skip(self))]
    pub async fn fetch_global_scenario(&self) -> Result<Option<String>, SupabaseError> {
        let rows: Vec<ScenarioRow> = self
            .select(
                &self.tables.config,
                &[
                    ("select", "scenario".to_string()),
                    ("id", "eq.1".to_string()),
                ],
            )
            .await?;
        Ok(rows.into_iter().next().and_then(|row| row.scenario))
    }

    #[instrument(skip(self), fields(station_id = %station_id))]
    pub async fn fetch_latest_reading(&self, station_id: &str) -> Result<Option<Cursor>, SupabaseError> {
        let rows: Vec<LevelRow> = self
            .select(
                &self.tables.readings,
                &[
                    ("select", "timestamp,Water_Level".to_string()),
                    ("WLCODE", format!("eq.{station_id}")),
                    ("order", "timestamp.desc".to_string()),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;

        match rows.into_iter().next() {
            Some(row) => {
                let timestamp = parse_timestamp(&row.timestamp)
                    .ok_or_else(|| SupabaseError::Timestamp(row.timestamp.clone()))?;
                Ok(Some(Cursor {
                    timestamp,
                    water_level: row.water_level,
                }))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    pub async fn fetch_max_sequence_no(&self) -> Result<Option<i64>, SupabaseError> {
        let rows: Vec<SequenceRow> = self
            .select(
                &self.tables.readings,
                &[
                    ("select", "P_no".to_string()),
                    ("order", "P_no.desc.nullslast".to_string()),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        Ok(rows.into_iter().next().and_then(|row| row.p_no))
    }

    /// Insert one reading; a 409 conflict means the slot is already stored
    #[instrument(skip(self, reading), fields(station_id = %reading.wlcode, timestamp = %reading.timestamp))]
    pub async fn insert_reading(&self, reading: &Reading) -> Result<AppendOutcome, SupabaseError> {
        let url = self.table_url(&self.tables.readings);
        let response = self
            .authorized(self.client.post(&url))
            .header("Prefer", "return=minimal")
            .json(&DistrictDataRecord::from(reading))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(AppendOutcome::Inserted)
        } else if status == StatusCode::CONFLICT {
            debug!("Reading already stored, skipped");
            Ok(AppendOutcome::Duplicate)
        } else {
            let body = response.text().await.unwrap_or_default();
            error!(
                station_id = %reading.wlcode,
                status = status.as_u16(),
                "Failed to insert reading"
            );
            Err(SupabaseError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }
}

/// Parse a PostgREST timestamp, with or without a UTC offset
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
}

impl StationSource for SupabaseClient {
    type Error = SupabaseError;

    async fn list_stations(&self) -> Result<Vec<Station>, SupabaseError> {
        let rows = self.fetch_stations().await?;
        Ok(rows.into_iter().map(Station::from).collect())
    }

    async fn global_default_scenario(&self) -> Result<Option<Scenario>, SupabaseError> {
        let tag = self.fetch_global_scenario().await?;
        Ok(tag
            .filter(|tag| !tag.trim().is_empty())
            .map(|tag| Scenario::from_tag(&tag)))
    }
}

impl CursorSource for SupabaseClient {
    type Error = SupabaseError;

    async fn last_reading(&self, station_id: &str) -> Result<Option<Cursor>, SupabaseError> {
        self.fetch_latest_reading(station_id).await
    }

    async fn max_sequence_no(&self) -> Result<Option<i64>, SupabaseError> {
        self.fetch_max_sequence_no().await
    }
}

impl ReadingSink for SupabaseClient {
    type Error = SupabaseError;

    async fn append(&self, reading: &Reading) -> Result<AppendOutcome, SupabaseError> {
        self.insert_reading(reading).await
    }
}
