use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::backup::CsvBackup;
use crate::config::Config;
use crate::models::{Reading, Station, DEFAULT_SITE_TYPE, DEFAULT_START_LEVEL};
use crate::slots::{missing_slots, synthetic_start, SlotInterval};
use crate::source::{AppendOutcome, CursorSource, ReadingSink, StationSource};
use crate::trend::{DeltaSampler, Scenario, TrendGenerator, UniformSampler};

/// Errors that stop a run before any reading is generated
#[derive(Debug, thiserror::Error)]
pub enum BackfillError {
    #[error("Station source unavailable: {0}")]
    StationSource(String),
}

/// Shared stop request, checked before every slot
///
/// Readings emitted before the stop stay valid; the next run resumes from the
/// stored cursor.
#[derive(Clone)]
pub struct AbortFlag {
    tx: Arc<watch::Sender<bool>>,
}

impl AbortFlag {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once `abort` has been called
    pub async fn aborted(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as self, so this only returns on abort
        let _ = rx.wait_for(|aborted| *aborted).await;
    }
}

impl Default for AbortFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Run parameters taken from configuration and command-line flags
#[derive(Debug, Clone)]
pub struct BackfillSettings {
    pub interval: SlotInterval,
    pub lookback: Duration,
    /// Used when the station source has no run-wide scenario
    pub default_scenario: Scenario,
    /// Forces one scenario onto every station in the run
    pub forced_scenario: Option<Scenario>,
    /// Restricts the run to a single station code
    pub only_station: Option<String>,
    pub site_type: String,
}

impl BackfillSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: config.interval,
            lookback: config.lookback(),
            default_scenario: config.default_scenario.clone(),
            forced_scenario: None,
            only_station: None,
            site_type: config.site_type.clone(),
        }
    }
}

impl Default for BackfillSettings {
    fn default() -> Self {
        Self {
            interval: SlotInterval::default(),
            lookback: Duration::hours(1),
            default_scenario: Scenario::Normal,
            forced_scenario: None,
            only_station: None,
            site_type: DEFAULT_SITE_TYPE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StationStatus {
    UpToDate,
    Backfilled,
    Aborted,
}

/// Outcome of backfilling one station
#[derive(Debug, Clone, Serialize)]
pub struct StationSummary {
    pub wlcode: String,
    pub scenario: Scenario,
    pub status: StationStatus,
    /// True when no stored reading was found and the synthetic start was used
    pub initialized: bool,
    pub resumed_from: DateTime<Utc>,
    pub start_level: f64,
    pub final_level: f64,
    pub attempted: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub failed: usize,
}

impl StationSummary {
    pub fn change(&self) -> f64 {
        self.final_level - self.start_level
    }
}

/// Outcome of one pass over every station
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Current time rounded down to the interval
    pub now: DateTime<Utc>,
    pub global_scenario: Scenario,
    pub stations: Vec<StationSummary>,
    pub aborted: bool,
}

impl RunSummary {
    pub fn attempted(&self) -> usize {
        self.stations.iter().map(|s| s.attempted).sum()
    }

    pub fn inserted(&self) -> usize {
        self.stations.iter().map(|s| s.inserted).sum()
    }

    pub fn duplicates(&self) -> usize {
        self.stations.iter().map(|s| s.duplicates).sum()
    }

    pub fn failed(&self) -> usize {
        self.stations.iter().map(|s| s.failed).sum()
    }

    pub fn stations_updated(&self) -> usize {
        self.stations
            .iter()
            .filter(|s| s.status != StationStatus::UpToDate)
            .count()
    }
}

/// Fills every missing slot for every station with a simulated reading
///
/// Stations are processed one after another; within a station each value is
/// derived from the one before it, so slots are strictly sequential.
pub struct BackfillService<St, Cu, Si, S = UniformSampler> {
    stations: St,
    cursors: Cu,
    sink: Si,
    trend: TrendGenerator<S>,
    backup: Option<CsvBackup>,
    settings: BackfillSettings,
    abort: AbortFlag,
}

impl<St, Cu, Si, S> BackfillService<St, Cu, Si, S>
where
    St: StationSource,
    Cu: CursorSource,
    Si: ReadingSink,
    S: DeltaSampler,
{
    pub fn new(
        stations: St,
        cursors: Cu,
        sink: Si,
        trend: TrendGenerator<S>,
        settings: BackfillSettings,
    ) -> Self {
        Self {
            stations,
            cursors,
            sink,
            trend,
            backup: None,
            settings,
            abort: AbortFlag::new(),
        }
    }

    pub fn with_backup(mut self, backup: CsvBackup) -> Self {
        self.backup = Some(backup);
        self
    }

    pub fn with_abort_flag(mut self, abort: AbortFlag) -> Self {
        self.abort = abort;
        self
    }

    pub fn sink(&self) -> &Si {
        &self.sink
    }

    /// Backfill every station up to `now`
    ///
    /// Only an unreachable station source is fatal; per-station lookup and
    /// per-reading write failures are logged and counted in the summary.
    #[instrument(skip(self), fields(now = %now))]
    pub async fn run(&mut self, now: DateTime<Utc>) -> Result<RunSummary, BackfillError> {
        let now_slot = self.settings.interval.floor(now);

        let mut stations = self
            .stations
            .list_stations()
            .await
            .map_err(|e| BackfillError::StationSource(e.to_string()))?;

        let global_scenario = match self.stations.global_default_scenario().await {
            Ok(Some(scenario)) => scenario,
            Ok(None) => self.settings.default_scenario.clone(),
            Err(e) => {
                warn!(
                    error = %e,
                    fallback = %self.settings.default_scenario,
                    "Could not fetch global scenario, using default"
                );
                self.settings.default_scenario.clone()
            }
        };

        if let Some(code) = &self.settings.only_station {
            stations.retain(|station| &station.wlcode == code);
            if stations.is_empty() {
                warn!(
                    station_id = %code,
                    "Station not in registry, simulating with default metadata"
                );
                stations.push(Station::with_code(code));
            }
        }

        info!(
            stations = stations.len(),
            global_scenario = %global_scenario,
            now = %now_slot,
            "Starting backfill"
        );

        let mut summary = RunSummary {
            now: now_slot,
            global_scenario: global_scenario.clone(),
            stations: Vec::with_capacity(stations.len()),
            aborted: false,
        };

        if stations.is_empty() {
            warn!("No stations configured, nothing to simulate");
            return Ok(summary);
        }

        let mut next_sequence_no = match self.cursors.max_sequence_no().await {
            Ok(Some(max)) => max + 1,
            Ok(None) => 1,
            Err(e) => {
                warn!(error = %e, "Could not fetch highest sequence number, starting at 1");
                1
            }
        };

        for station in &stations {
            if self.abort.is_aborted() {
                summary.aborted = true;
                break;
            }

            let station_summary = self
                .backfill_station(station, &global_scenario, now_slot, &mut next_sequence_no)
                .await;
            if station_summary.status == StationStatus::Aborted {
                summary.aborted = true;
            }
            summary.stations.push(station_summary);
            if summary.aborted {
                break;
            }
        }

        info!(
            inserted = summary.inserted(),
            attempted = summary.attempted(),
            failed = summary.failed(),
            stations_updated = summary.stations_updated(),
            aborted = summary.aborted,
            "Backfill complete"
        );

        Ok(summary)
    }

    #[instrument(skip(self, station, global_scenario, next_sequence_no), fields(station_id = %station.wlcode))]
    async fn backfill_station(
        &mut self,
        station: &Station,
        global_scenario: &Scenario,
        now: DateTime<Utc>,
        next_sequence_no: &mut i64,
    ) -> StationSummary {
        let scenario = self.resolve_scenario(station, global_scenario).await;
        if !scenario.is_recognized() {
            warn!(scenario = %scenario, "Unrecognized scenario, level will stay flat");
        }

        let cursor = match self.cursors.last_reading(&station.wlcode).await {
            Ok(cursor) => cursor,
            Err(e) => {
                warn!(error = %e, "Last reading lookup failed, treating as first run");
                None
            }
        };

        let interval = self.settings.interval;
        let (resumed_from, start_level, initialized) = match cursor {
            Some(cursor) => {
                let level = cursor
                    .water_level
                    .or(station.start_level)
                    .unwrap_or(DEFAULT_START_LEVEL);
                debug!(timestamp = %cursor.timestamp, level, "Resuming from last reading");
                (cursor.timestamp, level, false)
            }
            None => {
                let start = synthetic_start(now, self.settings.lookback, interval);
                let level = match station.start_level {
                    Some(level) => level,
                    None => self.trend.initial_level(),
                };
                info!(start = %start, level, "No stored readings, initializing");
                (start, level, true)
            }
        };

        let slots = missing_slots(resumed_from, now, interval);

        let mut summary = StationSummary {
            wlcode: station.wlcode.clone(),
            scenario: scenario.clone(),
            status: StationStatus::UpToDate,
            initialized,
            resumed_from,
            start_level,
            final_level: start_level,
            attempted: 0,
            inserted: 0,
            duplicates: 0,
            failed: 0,
        };

        if slots.is_empty() {
            info!("Up to date");
            return summary;
        }

        info!("Backfilling {} intervals", slots.len());
        summary.status = StationStatus::Backfilled;

        let mut level = start_level;
        for slot in slots {
            if self.abort.is_aborted() {
                warn!(pending_from = %slot, "Abort requested, stopping station");
                summary.status = StationStatus::Aborted;
                break;
            }

            level = self.trend.next_value(level, &scenario);
            let reading = Reading::new(
                station,
                &scenario,
                &self.settings.site_type,
                *next_sequence_no,
                slot,
                level,
            );
            *next_sequence_no += 1;
            summary.attempted += 1;
            summary.final_level = level;

            if let Some(backup) = &self.backup {
                if let Err(e) = backup.append(&reading) {
                    warn!(error = %e, "Failed to write local backup");
                }
            }

            // The walk continues from `level` whether or not the write lands
            match self.sink.append(&reading).await {
                Ok(AppendOutcome::Inserted) => summary.inserted += 1,
                Ok(AppendOutcome::Duplicate) => summary.duplicates += 1,
                Err(e) => {
                    warn!(timestamp = %slot, error = %e, "Failed to store reading");
                    summary.failed += 1;
                }
            }
        }

        info!(
            inserted = summary.inserted,
            attempted = summary.attempted,
            failed = summary.failed,
            start_level = summary.start_level,
            final_level = summary.final_level,
            "Station backfilled"
        );

        summary
    }

    /// Forced run scenario, then the source's override, then the station's
    /// own assignment, then the run-wide scenario
    async fn resolve_scenario(&self, station: &Station, global_scenario: &Scenario) -> Scenario {
        if let Some(forced) = &self.settings.forced_scenario {
            return forced.clone();
        }

        match self.stations.scenario_override(&station.wlcode).await {
            Ok(Some(scenario)) => return scenario,
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Scenario override lookup failed"),
        }

        station
            .scenario
            .clone()
            .unwrap_or_else(|| global_scenario.clone())
    }
}
