//! Source reader for the historical hourly production dataset
//!
//! Reads time-windowed slices of `prod_hourly_data` from a read-only DuckDB
//! file. DuckDB calls are blocking, so every query runs on the blocking pool
//! against the single connection held for the process lifetime.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::models::production::{normalize_well_name, SourceRecord};

/// Source table holding one row per well per hour
const SOURCE_TABLE: &str = "prod_hourly_data";

/// Format used when binding timestamps as DuckDB parameters
const TIMESTAMP_PARAM_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    #[error("Source dataset {0} contains no rows")]
    EmptyDataset(String),

    #[error("Invalid timestamp in source data: {0} ms")]
    InvalidTimestamp(i64),

    #[error("Source query task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// First and last source timestamps; fixed for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRange {
    pub min_date: DateTime<Utc>,
    pub max_date: DateTime<Utc>,
}

impl DataRange {
    pub fn total_days(&self) -> i64 {
        (self.max_date - self.min_date).num_days()
    }
}

/// Slice of the source timeline to fetch.
///
/// Windows follow the cursor: the end is always inclusive, the start is
/// exclusive because the cursor names an hour that was already written.
/// The very first window of a replay (cursor at the dataset start) includes
/// its start so the opening hour is not lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub include_start: bool,
}

impl TimeWindow {
    /// Window from the cursor up to `end`.
    pub fn following(cursor: DateTime<Utc>, end: DateTime<Utc>, min_date: DateTime<Utc>) -> Self {
        Self {
            start: cursor,
            end,
            include_start: cursor <= min_date,
        }
    }

    /// `hours` hours from the cursor.
    pub fn hours_from(cursor: DateTime<Utc>, hours: u32, min_date: DateTime<Utc>) -> Self {
        Self::following(cursor, cursor + Duration::hours(i64::from(hours)), min_date)
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        let after_start = if self.include_start { t >= self.start } else { t > self.start };
        after_start && t <= self.end
    }
}

/// Read side of the replay: dataset bounds and windowed fetches.
#[async_trait]
pub trait ProductionSource: Send + Sync {
    /// Dataset bounds, `None` when the source holds no rows.
    async fn data_range(&self) -> Result<Option<DataRange>, SourceError>;

    /// Records inside `window`, ordered by source time, well names normalized.
    async fn fetch_window(&self, window: TimeWindow) -> Result<Vec<SourceRecord>, SourceError>;
}

/// DuckDB-backed source.
#[derive(Clone)]
pub struct DuckDbSource {
    conn: Arc<Mutex<duckdb::Connection>>,
}

impl DuckDbSource {
    /// Open the dataset file in read-only mode.
    pub fn open_readonly(path: &Path) -> Result<Self, SourceError> {
        use duckdb::{AccessMode, Config};

        let config = Config::default().access_mode(AccessMode::ReadOnly)?;
        let conn = duckdb::Connection::open_with_flags(path, config)?;
        info!(path = %path.display(), "Connected to DuckDB (read-only)");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Wrap an existing connection (in-memory fixtures).
    pub fn from_connection(conn: duckdb::Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    fn query_range(conn: &duckdb::Connection) -> Result<Option<DataRange>, SourceError> {
        let sql = format!(
            "SELECT epoch_ms(CAST(MIN(DATEPRD) AS TIMESTAMP)), \
                    epoch_ms(CAST(MAX(DATEPRD) AS TIMESTAMP)) \
             FROM {SOURCE_TABLE}"
        );
        let (min_ms, max_ms): (Option<i64>, Option<i64>) =
            conn.query_row(&sql, [], |row| Ok((row.get(0)?, row.get(1)?)))?;

        match (min_ms, max_ms) {
            (Some(min_ms), Some(max_ms)) => Ok(Some(DataRange {
                min_date: millis_to_utc(min_ms)?,
                max_date: millis_to_utc(max_ms)?,
            })),
            _ => Ok(None),
        }
    }

    fn query_window(
        conn: &duckdb::Connection,
        window: TimeWindow,
    ) -> Result<Vec<SourceRecord>, SourceError> {
        let lower = if window.include_start { ">=" } else { ">" };
        let sql = format!(
            r#"
            SELECT
                epoch_ms(CAST(DATEPRD AS TIMESTAMP)) AS original_time,
                CAST(NPD_WELL_BORE_NAME AS VARCHAR) AS well_name,
                CAST(WELL_TYPE AS VARCHAR) AS well_type,
                CAST(BORE_OIL_VOL AS DOUBLE) AS oil_rate,
                CAST(BORE_GAS_VOL AS DOUBLE) AS gas_rate,
                CAST(BORE_WAT_VOL AS DOUBLE) AS water_rate,
                CAST(BORE_WI_VOL AS DOUBLE) AS water_inj_rate,
                CAST(ON_STREAM_HRS AS DOUBLE) AS on_stream_hrs,
                CAST(AVG_DOWNHOLE_PRESSURE AS DOUBLE) AS downhole_pressure,
                CAST(AVG_DOWNHOLE_TEMPERATURE AS DOUBLE) AS downhole_temperature,
                CAST(AVG_DP_TUBING AS DOUBLE) AS dp_tubing,
                CAST(AVG_ANNULUS_PRESS AS DOUBLE) AS annulus_pressure,
                CAST(AVG_CHOKE_SIZE_P AS DOUBLE) AS choke_size,
                CAST(AVG_CHOKE_UOM AS VARCHAR) AS choke_size_uom,
                CAST(DP_CHOKE_SIZE AS DOUBLE) AS dp_choke_size,
                CAST(AVG_WHP_P AS DOUBLE) AS thp,
                CAST(AVG_WHT_P AS DOUBLE) AS wht,
                CAST(FLOW_KIND AS VARCHAR) AS flow_kind
            FROM {SOURCE_TABLE}
            WHERE DATEPRD {lower} CAST(? AS TIMESTAMP)
              AND DATEPRD <= CAST(? AS TIMESTAMP)
            ORDER BY DATEPRD, NPD_WELL_BORE_NAME
            "#
        );

        let start = window.start.format(TIMESTAMP_PARAM_FORMAT).to_string();
        let end = window.end.format(TIMESTAMP_PARAM_FORMAT).to_string();

        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(duckdb::params![start, end])?;
        let mut records = Vec::new();

        while let Some(row) = rows.next()? {
            let original_ms: i64 = row.get(0)?;
            let raw_name: Option<String> = row.get(1)?;
            // A reading without a well cannot be keyed in the sink
            let Some(raw_name) = raw_name else {
                continue;
            };

            records.push(SourceRecord {
                original_time: millis_to_utc(original_ms)?,
                well_name: normalize_well_name(&raw_name),
                well_type: row.get(2)?,
                oil_rate: row.get(3)?,
                gas_rate: row.get(4)?,
                water_rate: row.get(5)?,
                water_inj_rate: row.get(6)?,
                on_stream_hrs: row.get(7)?,
                downhole_pressure: row.get(8)?,
                downhole_temperature: row.get(9)?,
                dp_tubing: row.get(10)?,
                annulus_pressure: row.get(11)?,
                choke_size: row.get(12)?,
                choke_size_uom: row.get(13)?,
                dp_choke_size: row.get(14)?,
                thp: row.get(15)?,
                wht: row.get(16)?,
                flow_kind: row.get(17)?,
            });
        }

        debug!(
            start = %window.start,
            end = %window.end,
            records = records.len(),
            "Fetched source window"
        );

        Ok(records)
    }
}

#[async_trait]
impl ProductionSource for DuckDbSource {
    async fn data_range(&self) -> Result<Option<DataRange>, SourceError> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || Self::query_range(&conn.lock())).await?
    }

    async fn fetch_window(&self, window: TimeWindow) -> Result<Vec<SourceRecord>, SourceError> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || Self::query_window(&conn.lock(), window)).await?
    }
}

fn millis_to_utc(ms: i64) -> Result<DateTime<Utc>, SourceError> {
    DateTime::from_timestamp_millis(ms).ok_or(SourceError::InvalidTimestamp(ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn fixture() -> DuckDbSource {
        let conn = duckdb::Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE prod_hourly_data (
                DATEPRD TIMESTAMP,
                NPD_WELL_BORE_NAME VARCHAR,
                WELL_TYPE VARCHAR,
                BORE_OIL_VOL DOUBLE,
                BORE_GAS_VOL DOUBLE,
                BORE_WAT_VOL DOUBLE,
                BORE_WI_VOL DOUBLE,
                ON_STREAM_HRS DOUBLE,
                AVG_DOWNHOLE_PRESSURE DOUBLE,
                AVG_DOWNHOLE_TEMPERATURE DOUBLE,
                AVG_DP_TUBING DOUBLE,
                AVG_ANNULUS_PRESS DOUBLE,
                AVG_CHOKE_SIZE_P DOUBLE,
                AVG_CHOKE_UOM VARCHAR,
                DP_CHOKE_SIZE DOUBLE,
                AVG_WHP_P DOUBLE,
                AVG_WHT_P DOUBLE,
                FLOW_KIND VARCHAR
            );
            INSERT INTO prod_hourly_data VALUES
                ('2007-09-01 00:00:00', '15/9-F-11 B', 'OP', 1000, 50000, 100, NULL, 1, 3000, 200, 100, 500, 32, 'mm', 0, 1000, 150, 'production'),
                ('2007-09-01 01:00:00', '15/9-F-11 B', 'OP', 900, 45000, 120, NULL, 1, 2990, 200, 100, 500, 32, 'mm', 0, 990, 150, 'production'),
                ('2007-09-01 01:00:00', '15/9-F-4 AH', 'WI', 0, 0, 0, 5000, 1, NULL, NULL, NULL, NULL, NULL, NULL, NULL, NULL, NULL, 'injection'),
                ('2007-09-01 02:00:00', '15/9-F-11 B', 'OP', 800, 40000, 150, NULL, 1, 2980, 200, 100, 500, 32, 'mm', 0, 980, 150, 'production');
            "#,
        )
        .unwrap();
        DuckDbSource::from_connection(conn)
    }

    #[tokio::test]
    async fn test_data_range() {
        let source = fixture();
        let range = source.data_range().await.unwrap().unwrap();

        assert_eq!(range.min_date, utc(2007, 9, 1, 0));
        assert_eq!(range.max_date, utc(2007, 9, 1, 2));
    }

    #[tokio::test]
    async fn test_data_range_empty_source() {
        let conn = duckdb::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE prod_hourly_data (DATEPRD TIMESTAMP)")
            .unwrap();
        let source = DuckDbSource::from_connection(conn);

        assert_eq!(source.data_range().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fetch_window_excludes_cursor_hour() {
        let source = fixture();
        let min = utc(2007, 9, 1, 0);

        let window = TimeWindow::hours_from(utc(2007, 9, 1, 1), 1, min);
        let records = source.fetch_window(window).await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].original_time, utc(2007, 9, 1, 2));
    }

    #[tokio::test]
    async fn test_first_window_includes_dataset_start() {
        let source = fixture();
        let min = utc(2007, 9, 1, 0);

        let records = source
            .fetch_window(TimeWindow::hours_from(min, 1, min))
            .await
            .unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].original_time, min);
        assert_eq!(records[0].well_name, "F-11B");
        assert_eq!(records[2].well_name, "F-4AH");
        assert_eq!(records[2].water_inj_rate, Some(5000.0));
        assert_eq!(records[2].downhole_pressure, None);
    }

    #[tokio::test]
    async fn test_fetch_past_end_is_empty() {
        let source = fixture();
        let min = utc(2007, 9, 1, 0);

        let records = source
            .fetch_window(TimeWindow::hours_from(utc(2007, 9, 1, 2), 24, min))
            .await
            .unwrap();

        assert!(records.is_empty());
    }

    #[test]
    fn test_window_bounds() {
        let min = utc(2007, 9, 1, 0);
        let first = TimeWindow::hours_from(min, 2, min);
        assert!(first.contains(min));
        assert!(first.contains(utc(2007, 9, 1, 2)));
        assert!(!first.contains(utc(2007, 9, 1, 3)));

        let later = TimeWindow::hours_from(utc(2007, 9, 1, 2), 2, min);
        assert!(!later.contains(utc(2007, 9, 1, 2)));
        assert!(later.contains(utc(2007, 9, 1, 4)));
    }

    #[tokio::test]
    async fn test_open_readonly_reads_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prod_hourly_data.duckdb");
        {
            let conn = duckdb::Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE prod_hourly_data (DATEPRD TIMESTAMP, NPD_WELL_BORE_NAME VARCHAR);
                 INSERT INTO prod_hourly_data VALUES ('2007-09-01 00:00:00', '15/9-F-12'),
                                                     ('2016-09-17 23:00:00', '15/9-F-12');",
            )
            .unwrap();
        }

        let source = DuckDbSource::open_readonly(&path).unwrap();
        let range = source.data_range().await.unwrap().unwrap();

        assert_eq!(range.min_date, utc(2007, 9, 1, 0));
        assert_eq!(range.max_date, utc(2016, 9, 17, 23));
    }

    #[test]
    fn test_open_readonly_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = DuckDbSource::open_readonly(&dir.path().join("missing.duckdb"));
        assert!(result.is_err());
    }
}
