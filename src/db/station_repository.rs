use sqlx::PgPool;
use tracing::{debug, info, instrument};

use crate::config::TableNames;
use crate::db::{DbError, StationScenarioRow};
use crate::models::Station;
use crate::source::StationSource;
use crate::trend::Scenario;

/// Station registry (`station_scenarios`) and run-wide settings
/// (`simulation_config`, row id 1)
#[derive(Clone)]
pub struct StationRepository {
    pool: PgPool,
    stations_table: String,
    config_table: String,
}

impl StationRepository {
    pub fn new(pool: PgPool, tables: &TableNames) -> Self {
        Self {
            pool,
            stations_table: tables.stations.clone(),
            config_table: tables.config.clone(),
        }
    }

    #[instrument(skip(self))]
    pub async fn find_all(&self) -> Result<Vec<StationScenarioRow>, DbError> {
        debug!("Querying station registry");

        let sql = format!(
            r#"
            SELECT wlcode, scenario, start_level, lat, lon, district, state
            FROM {}
            ORDER BY wlcode
            "#,
            self.stations_table
        );

        let rows = sqlx::query_as::<_, StationScenarioRow>(&sql)
            .fetch_all(&self.pool)
            .await?;

        debug!("Found {} stations", rows.len());
        Ok(rows)
    }

    /// Scenario tag stored in the settings row, if any
    #[instrument(skip(self))]
    pub async fn find_global_scenario(&self) -> Result<Option<String>, DbError> {
        let sql = format!("SELECT scenario FROM {} WHERE id = 1", self.config_table);

        let scenario = sqlx::query_scalar::<_, Option<String>>(&sql)
            .fetch_optional(&self.pool)
            .await?
            .flatten();

        debug!(scenario = ?scenario, "Loaded global scenario");
        Ok(scenario)
    }

    /// Insert or update a registry entry
    #[instrument(skip(self, station), fields(station_id = %station.wlcode))]
    pub async fn upsert_station(&self, station: &Station) -> Result<(), DbError> {
        let sql = format!(
            r#"
            INSERT INTO {} (wlcode, scenario, start_level, lat, lon, district, state)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (wlcode) DO UPDATE SET
                scenario = EXCLUDED.scenario,
                start_level = EXCLUDED.start_level,
                lat = EXCLUDED.lat,
                lon = EXCLUDED.lon,
                district = EXCLUDED.district,
                state = EXCLUDED.state
            "#,
            self.stations_table
        );

        sqlx::query(&sql)
            .bind(&station.wlcode)
            .bind(station.scenario.as_ref().map(|s| s.as_str().to_string()))
            .bind(station.start_level)
            .bind(station.lat)
            .bind(station.lon)
            .bind(&station.district)
            .bind(&station.state)
            .execute(&self.pool)
            .await?;

        info!("Upserted station {}", station.wlcode);
        Ok(())
    }

    /// Set the run-wide scenario
    #[instrument(skip(self), fields(scenario = %scenario))]
    pub async fn set_global_scenario(&self, scenario: &Scenario) -> Result<(), DbError> {
        let sql = format!(
            r#"
            INSERT INTO {} (id, scenario) VALUES (1, $1)
            ON CONFLICT (id) DO UPDATE SET scenario = EXCLUDED.scenario
            "#,
            self.config_table
        );

        sqlx::query(&sql)
            .bind(scenario.as_str())
            .execute(&self.pool)
            .await?;

        info!("Global scenario set to {}", scenario);
        Ok(())
    }
}

impl StationSource for StationRepository {
    type Error = DbError;

    async fn list_stations(&self) -> Result<Vec<Station>, DbError> {
        let rows = self.find_all().await?;
        Ok(rows.into_iter().map(Station::from).collect())
    }

    async fn global_default_scenario(&self) -> Result<Option<Scenario>, DbError> {
        let tag = self.find_global_scenario().await?;
        Ok(tag
            .filter(|tag| !tag.trim().is_empty())
            .map(|tag| Scenario::from_tag(&tag)))
    }
}
