use sqlx::PgPool;
use tracing::{debug, error, instrument};

use crate::db::{DbError, LastReadingRow};
use crate::models::{Cursor, Reading};
use crate::source::{AppendOutcome, CursorSource, ReadingSink};

/// Readings table (`district_data` by default)
///
/// The table name comes from validated configuration, so it is spliced into
/// the SQL text; every value is bound.
#[derive(Clone)]
pub struct ReadingRepository {
    pool: PgPool,
    table: String,
}

impl ReadingRepository {
    pub fn new(pool: PgPool, table: &str) -> Self {
        Self {
            pool,
            table: table.to_string(),
        }
    }

    /// Insert one reading; an existing row for the same station and timestamp
    /// is left untouched
    #[instrument(skip(self, reading), fields(station_id = %reading.wlcode, timestamp = %reading.timestamp))]
    pub async fn insert_reading(&self, reading: &Reading) -> Result<AppendOutcome, DbError> {
        let sql = format!(
            r#"
            INSERT INTO {} (
                "P_no", "WLCODE", "timestamp", "Water_Level", "LAT", "LON",
                scenario, "SITE_TYPE", "District", "State"
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT ("WLCODE", "timestamp") DO NOTHING
            "#,
            self.table
        );

        let result = sqlx::query(&sql)
            .bind(reading.sequence_no)
            .bind(&reading.wlcode)
            .bind(reading.timestamp)
            .bind(reading.water_level)
            .bind(reading.lat)
            .bind(reading.lon)
            .bind(reading.scenario.as_str())
            .bind(&reading.site_type)
            .bind(&reading.district)
            .bind(&reading.state)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!(
                    station_id = %reading.wlcode,
                    sequence_no = reading.sequence_no,
                    error = %e,
                    "Failed to insert reading"
                );
                e
            })?;

        if result.rows_affected() > 0 {
            debug!("Inserted reading");
            Ok(AppendOutcome::Inserted)
        } else {
            debug!("Reading already stored, skipped");
            Ok(AppendOutcome::Duplicate)
        }
    }

    /// Most recent reading for a station
    #[instrument(skip(self), fields(station_id = %station_id))]
    pub async fn find_latest_for_station(&self, station_id: &str) -> Result<Option<Cursor>, DbError> {
        debug!("Querying latest reading for station");

        let sql = format!(
            r#"
            SELECT "timestamp" AS timestamp, "Water_Level" AS water_level
            FROM {}
            WHERE "WLCODE" = $1
            ORDER BY "timestamp" DESC
            LIMIT 1
            "#,
            self.table
        );

        let row = sqlx::query_as::<_, LastReadingRow>(&sql)
            .bind(station_id)
            .fetch_optional(&self.pool)
            .await?;

        if row.is_some() {
            debug!("Found latest reading");
        } else {
            debug!("No readings stored for station");
        }

        Ok(row.map(Cursor::from))
    }

    #[instrument(skip(self))]
    pub async fn max_sequence_no(&self) -> Result<Option<i64>, DbError> {
        let sql = format!(r#"SELECT MAX("P_no") FROM {}"#, self.table);
        let max = sqlx::query_scalar::<_, Option<i64>>(&sql)
            .fetch_one(&self.pool)
            .await?;
        Ok(max)
    }

    #[instrument(skip(self), fields(station_id = %station_id))]
    pub async fn count_for_station(&self, station_id: &str) -> Result<i64, DbError> {
        let sql = format!(r#"SELECT COUNT(*) FROM {} WHERE "WLCODE" = $1"#, self.table);
        let count = sqlx::query_scalar::<_, i64>(&sql)
            .bind(station_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

impl CursorSource for ReadingRepository {
    type Error = DbError;

    async fn last_reading(&self, station_id: &str) -> Result<Option<Cursor>, DbError> {
        self.find_latest_for_station(station_id).await
    }

    async fn max_sequence_no(&self) -> Result<Option<i64>, DbError> {
        ReadingRepository::max_sequence_no(self).await
    }
}

impl ReadingSink for ReadingRepository {
    type Error = DbError;

    async fn append(&self, reading: &Reading) -> Result<AppendOutcome, DbError> {
        self.insert_reading(reading).await
    }
}
