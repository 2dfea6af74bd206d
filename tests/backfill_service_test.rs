// Backfill orchestration against in-memory stores
// Covers resume, first run, failure handling and scenario precedence

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, TimeZone, Utc};
use dwlr_simulator::backup::CsvBackup;
use dwlr_simulator::models::{Cursor, Reading, Station};
use dwlr_simulator::registry::StaticRegistry;
use dwlr_simulator::services::{
    AbortFlag, BackfillError, BackfillService, BackfillSettings, StationStatus,
};
use dwlr_simulator::source::{AppendOutcome, CursorSource, ReadingSink, StationSource};
use dwlr_simulator::trend::{DeltaSampler, Scenario, TrendGenerator};

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct FakeError(String);

/// Always draws the middle of the requested interval
struct Midpoint;

impl DeltaSampler for Midpoint {
    fn sample(&mut self, min: f64, max: f64) -> f64 {
        (min + max) / 2.0
    }
}

#[derive(Default)]
struct StoreState {
    readings: Vec<Reading>,
    attempts: usize,
    failing_attempts: HashSet<usize>,
    fail_cursor: bool,
    fail_max_sequence: bool,
    abort_after: Option<(usize, AbortFlag)>,
}

/// Readings table shared between the cursor and sink sides
#[derive(Clone, Default)]
struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    fn with_reading(self, wlcode: &str, timestamp: DateTime<Utc>, level: f64, seq: i64) -> Self {
        let station = Station::with_code(wlcode);
        let reading = Reading::new(&station, &Scenario::Normal, "DWLR Station", seq, timestamp, level);
        self.state.lock().unwrap().readings.push(reading);
        self
    }

    fn readings(&self) -> Vec<Reading> {
        self.state.lock().unwrap().readings.clone()
    }

    fn readings_for(&self, wlcode: &str) -> Vec<Reading> {
        let mut readings: Vec<_> = self
            .readings()
            .into_iter()
            .filter(|r| r.wlcode == wlcode)
            .collect();
        readings.sort_by_key(|r| r.timestamp);
        readings
    }
}

impl CursorSource for MemoryStore {
    type Error = FakeError;

    async fn last_reading(&self, station_id: &str) -> Result<Option<Cursor>, FakeError> {
        let state = self.state.lock().unwrap();
        if state.fail_cursor {
            return Err(FakeError("cursor lookup unavailable".to_string()));
        }
        Ok(state
            .readings
            .iter()
            .filter(|r| r.wlcode == station_id)
            .max_by_key(|r| r.timestamp)
            .map(|r| Cursor {
                timestamp: r.timestamp,
                water_level: Some(r.water_level),
            }))
    }

    async fn max_sequence_no(&self) -> Result<Option<i64>, FakeError> {
        let state = self.state.lock().unwrap();
        if state.fail_max_sequence {
            return Err(FakeError("sequence lookup unavailable".to_string()));
        }
        Ok(state.readings.iter().map(|r| r.sequence_no).max())
    }
}

impl ReadingSink for MemoryStore {
    type Error = FakeError;

    async fn append(&self, reading: &Reading) -> Result<AppendOutcome, FakeError> {
        let mut state = self.state.lock().unwrap();
        let attempt = state.attempts;
        state.attempts += 1;

        if let Some((after, abort)) = &state.abort_after {
            if state.attempts >= *after {
                abort.abort();
            }
        }

        if state.failing_attempts.contains(&attempt) {
            return Err(FakeError("insert rejected".to_string()));
        }
        let exists = state
            .readings
            .iter()
            .any(|r| r.wlcode == reading.wlcode && r.timestamp == reading.timestamp);
        if exists {
            return Ok(AppendOutcome::Duplicate);
        }
        state.readings.push(reading.clone());
        Ok(AppendOutcome::Inserted)
    }
}

struct UnreachableStations;

impl StationSource for UnreachableStations {
    type Error = FakeError;

    async fn list_stations(&self) -> Result<Vec<Station>, FakeError> {
        Err(FakeError("registry offline".to_string()))
    }

    async fn global_default_scenario(&self) -> Result<Option<Scenario>, FakeError> {
        Err(FakeError("registry offline".to_string()))
    }
}

/// Stations listed fine, but the settings row cannot be read
struct NoGlobalRow(Vec<Station>);

impl StationSource for NoGlobalRow {
    type Error = FakeError;

    async fn list_stations(&self) -> Result<Vec<Station>, FakeError> {
        Ok(self.0.clone())
    }

    async fn global_default_scenario(&self) -> Result<Option<Scenario>, FakeError> {
        Err(FakeError("settings table missing".to_string()))
    }
}

fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, h, m, s).unwrap()
}

fn station(wlcode: &str, scenario: Option<Scenario>, start_level: Option<f64>) -> Station {
    Station {
        scenario,
        start_level,
        ..Station::with_code(wlcode)
    }
}

fn service<St: StationSource>(
    stations: St,
    store: &MemoryStore,
    settings: BackfillSettings,
) -> BackfillService<St, MemoryStore, MemoryStore, Midpoint> {
    BackfillService::new(
        stations,
        store.clone(),
        store.clone(),
        TrendGenerator::new(Midpoint),
        settings,
    )
}

fn assert_level(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected level {expected}, got {actual}"
    );
}

#[tokio::test]
async fn test_resumes_three_slots_after_last_reading() {
    let store = MemoryStore::default().with_reading("W00001", at(0, 0, 0), 3.0, 7);
    let registry = StaticRegistry::new(vec![station("W00001", Some(Scenario::Drought), None)]);
    let mut svc = service(registry, &store, BackfillSettings::default());

    let summary = svc.run(at(0, 30, 0)).await.unwrap();

    let readings = store.readings_for("W00001");
    assert_eq!(readings.len(), 4);
    let added = &readings[1..];
    assert_eq!(
        added.iter().map(|r| r.timestamp).collect::<Vec<_>>(),
        vec![at(0, 10, 0), at(0, 20, 0), at(0, 30, 0)]
    );
    assert_eq!(
        added.iter().map(|r| r.sequence_no).collect::<Vec<_>>(),
        vec![8, 9, 10]
    );
    assert_level(added[0].water_level, 2.955);
    assert_level(added[1].water_level, 2.91);
    assert_level(added[2].water_level, 2.865);
    assert!(added.iter().all(|r| r.scenario == Scenario::Drought));

    let station_summary = &summary.stations[0];
    assert_eq!(station_summary.status, StationStatus::Backfilled);
    assert!(!station_summary.initialized);
    assert_eq!(station_summary.inserted, 3);
    assert_level(station_summary.change(), -0.135);
}

#[tokio::test]
async fn test_first_run_backfills_lookback_window() {
    let store = MemoryStore::default();
    let registry = StaticRegistry::new(vec![station("W00002", None, Some(4.0))]);
    let mut svc = service(registry, &store, BackfillSettings::default());

    let summary = svc.run(at(5, 3, 12)).await.unwrap();

    let readings = store.readings_for("W00002");
    assert_eq!(readings.len(), 6);
    assert_eq!(readings.first().unwrap().timestamp, at(4, 10, 0));
    assert_eq!(readings.last().unwrap().timestamp, at(5, 0, 0));
    assert_eq!(
        readings.iter().map(|r| r.sequence_no).collect::<Vec<_>>(),
        vec![1, 2, 3, 4, 5, 6]
    );
    assert!(readings.iter().all(|r| r.water_level == 4.0));
    assert!(summary.stations[0].initialized);
    assert_eq!(summary.stations[0].resumed_from, at(4, 0, 0));
}

#[tokio::test]
async fn test_first_run_without_start_level_draws_initial_level() {
    let store = MemoryStore::default();
    let registry = StaticRegistry::new(vec![station("W00003", Some(Scenario::Normal), None)]);
    let mut svc = service(registry, &store, BackfillSettings::default());

    svc.run(at(1, 0, 0)).await.unwrap();

    let readings = store.readings_for("W00003");
    assert_eq!(readings.len(), 6);
    assert_level(readings[0].water_level, 3.5);
}

#[tokio::test]
async fn test_up_to_date_station_writes_nothing() {
    let store = MemoryStore::default().with_reading("W00001", at(5, 0, 0), 3.2, 1);
    let registry = StaticRegistry::new(vec![station("W00001", None, None)]);
    let mut svc = service(registry, &store, BackfillSettings::default());

    let summary = svc.run(at(5, 9, 59)).await.unwrap();

    assert_eq!(store.readings().len(), 1);
    assert_eq!(summary.stations[0].status, StationStatus::UpToDate);
    assert_eq!(summary.attempted(), 0);
    assert_eq!(summary.stations_updated(), 0);
}

#[tokio::test]
async fn test_second_run_at_same_time_is_a_no_op() {
    let store = MemoryStore::default();
    let registry = StaticRegistry::new(vec![station("W00001", Some(Scenario::Recharge), Some(2.0))]);
    let mut svc = service(registry, &store, BackfillSettings::default());

    let first = svc.run(at(2, 15, 0)).await.unwrap();
    let second = svc.run(at(2, 15, 0)).await.unwrap();

    assert_eq!(first.inserted(), 6);
    assert_eq!(second.attempted(), 0);
    assert_eq!(store.readings().len(), 6);
}

#[tokio::test]
async fn test_later_run_continues_from_previous_level() {
    let store = MemoryStore::default();
    let registry = StaticRegistry::new(vec![station("W00001", Some(Scenario::Recharge), Some(2.0))]);
    let mut svc = service(registry, &store, BackfillSettings::default());

    svc.run(at(1, 0, 0)).await.unwrap();
    svc.run(at(1, 20, 0)).await.unwrap();

    let readings = store.readings_for("W00001");
    assert_eq!(readings.len(), 8);
    for pair in readings.windows(2) {
        assert_eq!(pair[1].timestamp - pair[0].timestamp, Duration::minutes(10));
        assert_level(pair[1].water_level - pair[0].water_level, 0.075);
    }
}

#[tokio::test]
async fn test_failed_writes_are_counted_and_cursor_advances() {
    let store = MemoryStore::default();
    store.state.lock().unwrap().failing_attempts.insert(1);
    let registry = StaticRegistry::new(vec![station("W00001", Some(Scenario::Drought), Some(3.0))]);
    let mut svc = service(registry, &store, BackfillSettings::default());

    let summary = svc.run(at(0, 30, 0)).await.unwrap();

    let station_summary = &summary.stations[0];
    assert_eq!(station_summary.attempted, 6);
    assert_eq!(station_summary.inserted, 5);
    assert_eq!(station_summary.failed, 1);

    let readings = store.readings_for("W00001");
    // Slot two is lost but the walk and the numbering still move past it
    assert_eq!(readings[1].timestamp, at(0, 0, 0));
    assert_eq!(readings[1].sequence_no, 3);
    assert_level(readings[1].water_level, 2.865);
    assert_level(station_summary.final_level, 2.73);

    let rerun = svc.run(at(0, 30, 0)).await.unwrap();
    assert_eq!(rerun.attempted(), 0);
}

#[tokio::test]
async fn test_cursor_failure_degrades_to_synthetic_start() {
    let store = MemoryStore::default().with_reading("W00001", at(4, 30, 0), 3.0, 40);
    store.state.lock().unwrap().fail_cursor = true;
    let registry = StaticRegistry::new(vec![station("W00001", None, Some(3.0))]);
    let mut svc = service(registry, &store, BackfillSettings::default());

    let summary = svc.run(at(5, 0, 0)).await.unwrap();

    let station_summary = &summary.stations[0];
    assert!(station_summary.initialized);
    assert_eq!(station_summary.attempted, 6);
    assert_eq!(station_summary.duplicates, 1);
    assert_eq!(station_summary.inserted, 5);
    assert_eq!(station_summary.failed, 0);
}

#[tokio::test]
async fn test_sequence_lookup_failure_starts_at_one() {
    let store = MemoryStore::default().with_reading("W00009", at(0, 0, 0), 3.0, 500);
    store.state.lock().unwrap().fail_max_sequence = true;
    let registry = StaticRegistry::new(vec![station("W00001", None, Some(3.0))]);
    let mut svc = service(registry, &store, BackfillSettings::default());

    svc.run(at(1, 0, 0)).await.unwrap();

    assert_eq!(store.readings_for("W00001")[0].sequence_no, 1);
}

#[tokio::test]
async fn test_sequence_numbers_continue_across_stations() {
    let store = MemoryStore::default();
    let registry = StaticRegistry::new(vec![
        station("W00001", None, Some(3.0)),
        station("W00002", None, Some(3.0)),
    ]);
    let mut svc = service(registry, &store, BackfillSettings::default());

    svc.run(at(1, 0, 0)).await.unwrap();

    let mut seqs: Vec<_> = store.readings().iter().map(|r| r.sequence_no).collect();
    seqs.sort();
    assert_eq!(seqs, (1..=12).collect::<Vec<_>>());
    assert_eq!(store.readings_for("W00002")[0].sequence_no, 7);
}

#[tokio::test]
async fn test_unreachable_station_source_is_fatal() {
    let store = MemoryStore::default();
    let mut svc = service(UnreachableStations, &store, BackfillSettings::default());

    let result = svc.run(at(1, 0, 0)).await;

    assert!(matches!(result, Err(BackfillError::StationSource(_))));
    assert!(store.readings().is_empty());
}

#[tokio::test]
async fn test_empty_registry_completes_without_writes() {
    let store = MemoryStore::default();
    let mut svc = service(StaticRegistry::new(vec![]), &store, BackfillSettings::default());

    let summary = svc.run(at(1, 0, 0)).await.unwrap();

    assert!(summary.stations.is_empty());
    assert!(store.readings().is_empty());
}

#[tokio::test]
async fn test_global_lookup_failure_uses_configured_default() {
    let store = MemoryStore::default();
    let settings = BackfillSettings {
        default_scenario: Scenario::OverExtraction,
        ..BackfillSettings::default()
    };
    let mut svc = service(
        NoGlobalRow(vec![station("W00001", None, Some(3.0))]),
        &store,
        settings,
    );

    let summary = svc.run(at(1, 0, 0)).await.unwrap();

    assert_eq!(summary.global_scenario, Scenario::OverExtraction);
    assert_eq!(summary.stations[0].scenario, Scenario::OverExtraction);
}

#[tokio::test]
async fn test_scenario_precedence() {
    let store = MemoryStore::default();
    let registry = StaticRegistry::new(vec![
        station("W00001", Some(Scenario::Drought), Some(3.0)),
        station("W00002", Some(Scenario::Drought), Some(3.0)),
        station("W00003", None, Some(3.0)),
    ])
    .with_global_scenario(Scenario::Recharge)
    .with_override("W00002", Scenario::OverExtraction);
    let mut svc = service(registry, &store, BackfillSettings::default());

    let summary = svc.run(at(1, 0, 0)).await.unwrap();

    let scenarios: Vec<_> = summary.stations.iter().map(|s| s.scenario.clone()).collect();
    assert_eq!(
        scenarios,
        vec![Scenario::Drought, Scenario::OverExtraction, Scenario::Recharge]
    );
}

#[tokio::test]
async fn test_forced_scenario_applies_to_every_station() {
    let store = MemoryStore::default();
    let registry = StaticRegistry::new(vec![
        station("W00001", Some(Scenario::Drought), Some(3.0)),
        station("W00002", None, Some(3.0)),
    ])
    .with_override("W00002", Scenario::OverExtraction);
    let settings = BackfillSettings {
        forced_scenario: Some(Scenario::Recharge),
        ..BackfillSettings::default()
    };
    let mut svc = service(registry, &store, settings);

    svc.run(at(1, 0, 0)).await.unwrap();

    assert!(store
        .readings()
        .iter()
        .all(|r| r.scenario == Scenario::Recharge));
}

#[tokio::test]
async fn test_unrecognized_scenario_walks_flat_and_keeps_tag() {
    let store = MemoryStore::default();
    let registry = StaticRegistry::new(vec![station(
        "W00001",
        Some(Scenario::from_tag("monsoon")),
        Some(3.25),
    )]);
    let mut svc = service(registry, &store, BackfillSettings::default());

    svc.run(at(1, 0, 0)).await.unwrap();

    let readings = store.readings_for("W00001");
    assert_eq!(readings.len(), 6);
    assert!(readings.iter().all(|r| r.water_level == 3.25));
    assert!(readings.iter().all(|r| r.scenario.as_str() == "monsoon"));
}

#[tokio::test]
async fn test_missing_stored_level_falls_back_to_start_level() {
    let store = MemoryStore::default().with_reading("W00001", at(0, 0, 0), 0.0, 1);

    /// Reports every stored level as NULL
    struct NullLevel(MemoryStore);

    impl CursorSource for NullLevel {
        type Error = FakeError;

        async fn last_reading(&self, station_id: &str) -> Result<Option<Cursor>, FakeError> {
            let cursor = self.0.last_reading(station_id).await?;
            Ok(cursor.map(|c| Cursor {
                water_level: None,
                ..c
            }))
        }

        async fn max_sequence_no(&self) -> Result<Option<i64>, FakeError> {
            self.0.max_sequence_no().await
        }
    }

    let registry = StaticRegistry::new(vec![station("W00001", Some(Scenario::Normal), Some(4.4))]);
    let mut svc = BackfillService::new(
        registry,
        NullLevel(store.clone()),
        store.clone(),
        TrendGenerator::new(Midpoint),
        BackfillSettings::default(),
    );

    let summary = svc.run(at(0, 20, 0)).await.unwrap();

    assert_level(summary.stations[0].start_level, 4.4);
    assert_level(store.readings_for("W00001")[1].water_level, 4.4);
}

#[tokio::test]
async fn test_only_station_unknown_code_uses_default_metadata() {
    let store = MemoryStore::default();
    let settings = BackfillSettings {
        only_station: Some("W77777".to_string()),
        ..BackfillSettings::default()
    };
    let mut svc = service(StaticRegistry::builtin(), &store, settings);

    let summary = svc.run(at(1, 0, 0)).await.unwrap();

    assert_eq!(summary.stations.len(), 1);
    let readings = store.readings_for("W77777");
    assert_eq!(readings.len(), 6);
    assert_eq!(readings[0].district, "Varanasi");
    assert!(store.readings_for("W06744").is_empty());
}

#[tokio::test]
async fn test_abort_before_run_writes_nothing() {
    let store = MemoryStore::default();
    let abort = AbortFlag::new();
    abort.abort();
    let mut svc = service(StaticRegistry::builtin(), &store, BackfillSettings::default())
        .with_abort_flag(abort);

    let summary = svc.run(at(1, 0, 0)).await.unwrap();

    assert!(summary.aborted);
    assert!(store.readings().is_empty());
}

#[tokio::test]
async fn test_abort_mid_station_keeps_written_prefix() {
    let store = MemoryStore::default();
    let abort = AbortFlag::new();
    store.state.lock().unwrap().abort_after = Some((2, abort.clone()));
    let registry = StaticRegistry::new(vec![
        station("W00001", None, Some(3.0)),
        station("W00002", None, Some(3.0)),
    ]);
    let mut svc =
        service(registry, &store, BackfillSettings::default()).with_abort_flag(abort);

    let summary = svc.run(at(1, 0, 0)).await.unwrap();

    assert!(summary.aborted);
    assert_eq!(summary.stations.len(), 1);
    assert_eq!(summary.stations[0].status, StationStatus::Aborted);
    let readings = store.readings_for("W00001");
    assert_eq!(
        readings.iter().map(|r| r.timestamp).collect::<Vec<_>>(),
        vec![at(0, 10, 0), at(0, 20, 0)]
    );
    assert!(store.readings_for("W00002").is_empty());
}

#[tokio::test]
async fn test_backup_receives_every_generated_reading() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("backup.csv");
    let store = MemoryStore::default();
    store.state.lock().unwrap().failing_attempts.insert(0);
    let mut svc = service(StaticRegistry::builtin(), &store, BackfillSettings::default())
        .with_backup(CsvBackup::new(&path));

    svc.run(at(1, 0, 0)).await.unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<_> = contents.lines().collect();
    assert_eq!(lines[0], "WLCODE,timestamp,water_level,scenario");
    // The failed insert is still backed up
    assert_eq!(lines.len(), 7);
    assert_eq!(lines[1], "W06744,2024-01-01T00:10:00Z,3.000,normal");
}
