//! Console output for backfill runs

use std::fmt::Write as _;

use indicatif::{ProgressBar, ProgressStyle};

use crate::models::Reading;
use crate::services::{RunSummary, StationStatus, StationSummary};
use crate::source::{AppendOutcome, ReadingSink};

/// Changes smaller than this, in metres, are reported as stable
const STABLE_THRESHOLD: f64 = 0.0005;

/// Direction marker for a level change
pub fn trend_marker(change: f64) -> &'static str {
    if change > STABLE_THRESHOLD {
        "rising"
    } else if change < -STABLE_THRESHOLD {
        "falling"
    } else {
        "stable"
    }
}

pub fn render_station(station: &StationSummary) -> String {
    match station.status {
        StationStatus::UpToDate => format!(
            "{}: up to date at {:.3} m ({})",
            station.wlcode, station.start_level, station.scenario
        ),
        StationStatus::Backfilled | StationStatus::Aborted => {
            let mut line = format!(
                "{}: {}/{} readings stored, {:.3} m -> {:.3} m ({:+.3} m, {}) [{}]",
                station.wlcode,
                station.inserted,
                station.attempted,
                station.start_level,
                station.final_level,
                station.change(),
                trend_marker(station.change()),
                station.scenario,
            );
            if station.initialized {
                line.push_str(" first run");
            }
            if station.duplicates > 0 {
                let _ = write!(line, ", {} already stored", station.duplicates);
            }
            if station.failed > 0 {
                let _ = write!(line, ", {} failed", station.failed);
            }
            if station.status == StationStatus::Aborted {
                line.push_str(", aborted");
            }
            line
        }
    }
}

pub fn render_run(summary: &RunSummary) -> String {
    let mut out = format!(
        "Backfill up to {} (default scenario: {})\n",
        summary.now.format("%Y-%m-%d %H:%M UTC"),
        summary.global_scenario
    );
    if summary.stations.is_empty() {
        out.push_str("No stations to simulate\n");
        return out;
    }
    for station in &summary.stations {
        out.push_str("  ");
        out.push_str(&render_station(station));
        out.push('\n');
    }
    let _ = writeln!(
        out,
        "Total: {} stored, {} duplicates, {} failed across {} stations",
        summary.inserted(),
        summary.duplicates(),
        summary.failed(),
        summary.stations.len()
    );
    if summary.aborted {
        out.push_str("Run aborted before completion\n");
    }
    out
}

/// Sink wrapper that ticks a console spinner for every reading written
pub struct ProgressSink<K> {
    inner: K,
    progress: ProgressBar,
}

impl<K> ProgressSink<K> {
    pub fn new(inner: K) -> Self {
        let progress = ProgressBar::new_spinner();
        progress.set_style(
            ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {pos} readings {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        Self { inner, progress }
    }

    /// Wrap without drawing anything, for non-interactive runs
    pub fn hidden(inner: K) -> Self {
        Self {
            inner,
            progress: ProgressBar::hidden(),
        }
    }

    pub fn finish(&self) {
        self.progress.finish_and_clear();
    }
}

impl<K: ReadingSink> ReadingSink for ProgressSink<K> {
    type Error = K::Error;

    async fn append(&self, reading: &Reading) -> Result<AppendOutcome, K::Error> {
        self.progress.set_message(format!(
            "{} {}",
            reading.wlcode,
            reading.timestamp.format("%H:%M")
        ));
        let outcome = self.inner.append(reading).await;
        self.progress.inc(1);
        outcome
    }
}
