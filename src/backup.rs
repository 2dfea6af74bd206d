use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use chrono::SecondsFormat;
use tracing::{debug, instrument};

use crate::models::Reading;

const HEADER: [&str; 4] = ["WLCODE", "timestamp", "water_level", "scenario"];

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("Backup file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Backup file {path}: {source}")]
    Csv { path: String, source: csv::Error },
}

/// Append-only CSV copy of every generated reading, kept independently of
/// the primary store
#[derive(Debug, Clone)]
pub struct CsvBackup {
    path: PathBuf,
}

impl CsvBackup {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one row, writing the header first when the file is new or empty
    #[instrument(skip(self, reading), fields(path = %self.path.display(), station_id = %reading.wlcode))]
    pub fn append(&self, reading: &Reading) -> Result<(), BackupError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| self.io_error(source))?;
        let is_empty = file
            .metadata()
            .map_err(|source| self.io_error(source))?
            .len()
            == 0;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if is_empty {
            debug!("Writing backup header");
            writer
                .write_record(HEADER)
                .map_err(|source| self.csv_error(source))?;
        }

        let timestamp = reading.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true);
        let level = format!("{:.3}", reading.water_level);
        writer
            .write_record([
                reading.wlcode.as_str(),
                timestamp.as_str(),
                level.as_str(),
                reading.scenario.as_str(),
            ])
            .map_err(|source| self.csv_error(source))?;

        writer.flush().map_err(|source| self.io_error(source))?;
        Ok(())
    }

    fn io_error(&self, source: std::io::Error) -> BackupError {
        BackupError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }

    fn csv_error(&self, source: csv::Error) -> BackupError {
        BackupError::Csv {
            path: self.path.display().to_string(),
            source,
        }
    }
}
