use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::Duration;
use serde::Deserialize;

use crate::models::DEFAULT_SITE_TYPE;
use crate::slots::{IntervalError, SlotInterval, DEFAULT_INTERVAL_MINUTES, DEFAULT_LOOKBACK_MINUTES};
use crate::trend::Scenario;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required setting {0}")]
    Missing(&'static str),
    #[error("Invalid value '{value}' for {key}")]
    Invalid { key: &'static str, value: String },
    #[error("Invalid interval: {0}")]
    Interval(#[from] IntervalError),
    #[error("Invalid table name '{0}' (letters, digits and underscores only)")]
    TableName(String),
    #[error("SIM_RUN_MIGRATIONS only creates the default tables; unset it or create '{0}' yourself")]
    MigrationsNeedDefaultTables(String),
    #[error("Supabase credentials not found in environment or {path}: {reason}")]
    SupabaseCredentials { path: String, reason: String },
}

/// Backend holding the readings table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Postgres,
    Supabase,
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreKind::Postgres),
            "supabase" | "rest" => Ok(StoreKind::Supabase),
            other => Err(format!("unknown store '{other}'")),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct SupabaseCredentials {
    pub url: String,
    pub api_key: String,
}

// Keep the key out of logs
impl fmt::Debug for SupabaseCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupabaseCredentials")
            .field("url", &self.url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    pub readings: String,
    pub stations: String,
    pub config: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            readings: "district_data".to_string(),
            stations: "station_scenarios".to_string(),
            config: "simulation_config".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub store: StoreKind,
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub run_migrations: bool,
    pub supabase: Option<SupabaseCredentials>,
    pub tables: TableNames,
    pub interval: SlotInterval,
    pub lookback_minutes: u32,
    pub default_scenario: Scenario,
    pub seed: Option<u64>,
    pub backup_file: Option<PathBuf>,
    pub site_type: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key/value lookup; `from_env` passes the process environment
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let store = match lookup("SIM_STORE") {
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                key: "SIM_STORE",
                value,
            })?,
            None => StoreKind::Postgres,
        };

        let database_url = lookup("DATABASE_URL").filter(|url| !url.is_empty());
        if store == StoreKind::Postgres && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        let supabase = match store {
            StoreKind::Supabase => Some(resolve_supabase_credentials(&lookup)?),
            StoreKind::Postgres => None,
        };

        let tables = TableNames {
            readings: table_name(&lookup, "SIM_TABLE", "district_data")?,
            stations: table_name(&lookup, "SIM_STATIONS_TABLE", "station_scenarios")?,
            config: table_name(&lookup, "SIM_CONFIG_TABLE", "simulation_config")?,
        };

        // Migrations create the default tables only; custom names must already exist
        let custom_table = [
            (&tables.readings, "district_data"),
            (&tables.stations, "station_scenarios"),
            (&tables.config, "simulation_config"),
        ]
        .into_iter()
        .find(|(name, default)| name.as_str() != *default)
        .map(|(name, _)| name.clone());
        let run_migrations = parse_or(&lookup, "SIM_RUN_MIGRATIONS", custom_table.is_none())?;
        if let (true, Some(name)) = (run_migrations, &custom_table) {
            return Err(ConfigError::MigrationsNeedDefaultTables(name.clone()));
        }

        let interval = SlotInterval::new(parse_or(
            &lookup,
            "SIM_INTERVAL_MINUTES",
            DEFAULT_INTERVAL_MINUTES,
        )?)?;

        let seed = match lookup("SIM_SEED") {
            Some(value) => Some(value.parse().map_err(|_| ConfigError::Invalid {
                key: "SIM_SEED",
                value,
            })?),
            None => None,
        };

        Ok(Config {
            store,
            database_url,
            max_connections: parse_or(&lookup, "SIM_MAX_CONNECTIONS", 5)?,
            run_migrations,
            supabase,
            tables,
            interval,
            lookback_minutes: parse_or(&lookup, "SIM_LOOKBACK_MINUTES", DEFAULT_LOOKBACK_MINUTES)?,
            default_scenario: lookup("SIM_DEFAULT_SCENARIO")
                .map(|tag| Scenario::from_tag(&tag))
                .unwrap_or_default(),
            seed,
            backup_file: lookup("SIM_BACKUP_FILE")
                .filter(|path| !path.is_empty())
                .map(PathBuf::from),
            site_type: lookup("SIM_SITE_TYPE").unwrap_or_else(|| DEFAULT_SITE_TYPE.to_string()),
        })
    }

    pub fn lookback(&self) -> Duration {
        Duration::minutes(i64::from(self.lookback_minutes))
    }

    pub fn database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or(ConfigError::Missing("DATABASE_URL"))
    }

    pub fn supabase_credentials(&self) -> Result<&SupabaseCredentials, ConfigError> {
        self.supabase.as_ref().ok_or(ConfigError::SupabaseCredentials {
            path: "app.json".to_string(),
            reason: "store is not supabase".to_string(),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        _ => Ok(default),
    }
}

fn table_name<F>(lookup: &F, key: &str, default: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let name = lookup(key).unwrap_or_else(|| default.to_string());
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(name)
    } else {
        Err(ConfigError::TableName(name))
    }
}

/// Supabase URL and anon key from the environment, falling back to the Expo
/// app manifest (`expo.extra.supabaseUrl` / `expo.extra.supabaseAnonKey`)
fn resolve_supabase_credentials<F>(lookup: &F) -> Result<SupabaseCredentials, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let first = |keys: &[&str]| {
        keys.iter()
            .find_map(|key| lookup(*key).filter(|value| !value.is_empty()))
    };

    let url = first(&["SUPABASE_URL", "EXPO_PUBLIC_SUPABASE_URL"]);
    let api_key = first(&[
        "SUPABASE_ANON_KEY",
        "SUPABASE_KEY",
        "EXPO_PUBLIC_SUPABASE_ANON_KEY",
    ]);

    if let (Some(url), Some(api_key)) = (url, api_key) {
        return Ok(SupabaseCredentials { url, api_key });
    }

    let app_json = lookup("SIM_APP_JSON").unwrap_or_else(|| "app.json".to_string());
    load_app_json_credentials(Path::new(&app_json))
}

#[derive(Deserialize)]
struct AppManifest {
    expo: ExpoSection,
}

#[derive(Deserialize)]
struct ExpoSection {
    extra: ExpoExtra,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExpoExtra {
    supabase_url: String,
    supabase_anon_key: String,
}

pub fn load_app_json_credentials(path: &Path) -> Result<SupabaseCredentials, ConfigError> {
    let failure = |reason: String| ConfigError::SupabaseCredentials {
        path: path.display().to_string(),
        reason,
    };

    let contents = std::fs::read_to_string(path).map_err(|e| failure(e.to_string()))?;
    let manifest: AppManifest =
        serde_json::from_str(&contents).map_err(|e| failure(e.to_string()))?;

    Ok(SupabaseCredentials {
        url: manifest.expo.extra.supabase_url,
        api_key: manifest.expo.extra.supabase_anon_key,
    })
}
