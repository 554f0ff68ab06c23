//! Sink writer for the Postgres/TimescaleDB production store
//!
//! Writes are idempotent: every batch is inserted in one transaction with
//! conflicts on `(time, well_name)` skipped, so replaying a window that was
//! already committed is a no-op. After each commit the `latest_production`
//! materialized view is refreshed on a best-effort basis.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;
use sea_orm::sea_query::OnConflict;
use sea_orm::sqlx::postgres::PgPoolOptions;
use sea_orm::{
    ConnectionTrait, DatabaseConnection, DbBackend, DbErr, EntityTrait, FromQueryResult,
    RuntimeErr, SqlxPostgresConnector, Statement, TransactionTrait, TryInsertResult,
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::{SinkConfig, StreamerConfig};
use crate::entities::{prelude::*, production_data};
use crate::models::production::MappedRecord;
use crate::services::retry::{RetryExhausted, RetryPolicy};

/// Rows per INSERT statement; 22 bind parameters per row stays well under
/// the Postgres limit of 65535
const INSERT_PAGE_SIZE: usize = 1000;

const REFRESH_VIEW_SQL: &str = "REFRESH MATERIALIZED VIEW latest_production";

/// SQLSTATE for insufficient_privilege
const PG_INSUFFICIENT_PRIVILEGE: &str = "42501";

const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Rendering of timestamps in verbose write logs
const LOG_TIME_FORMAT: &str = "%Y-%m-%d %H:%M %Z";

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

/// Latest committed `(time, original_time)` pair in the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HighWaterMark {
    pub time: DateTime<Utc>,
    pub original_time: DateTime<Utc>,
}

/// Logging verbosity of a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Steady-state ticks: one line per write with original and mapped ranges
    Verbose,
    /// Batch load and catch-up
    Silent,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub submitted: usize,
    /// Rows actually inserted; conflicts are skipped
    pub inserted: u64,
    pub view_refreshed: bool,
}

/// Write side of the replay.
#[async_trait]
pub trait ProductionSink: Send + Sync {
    async fn high_water_mark(&self) -> Result<Option<HighWaterMark>, SinkError>;

    /// Insert all records or none of them.
    ///
    /// An error means nothing from this batch was committed.
    async fn write(&self, records: &[MappedRecord], mode: WriteMode)
        -> Result<WriteSummary, SinkError>;
}

/// Why a view refresh failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshFailure {
    PermissionDenied,
    Other,
}

/// Classify a refresh error; permission problems get an actionable hint.
pub fn classify_refresh_error(err: &DbErr) -> RefreshFailure {
    let sqlstate = match err {
        DbErr::Exec(RuntimeErr::SqlxError(sea_orm::sqlx::Error::Database(db_err)))
        | DbErr::Query(RuntimeErr::SqlxError(sea_orm::sqlx::Error::Database(db_err))) => {
            db_err.code().map(|code| code.into_owned())
        }
        _ => None,
    };

    if sqlstate.as_deref() == Some(PG_INSUFFICIENT_PRIVILEGE) {
        return RefreshFailure::PermissionDenied;
    }

    let message = err.to_string().to_lowercase();
    if message.contains("permission denied") || message.contains("must be owner") {
        RefreshFailure::PermissionDenied
    } else {
        RefreshFailure::Other
    }
}

/// Tracks how long the materialized view has gone without a refresh.
#[derive(Debug)]
pub struct ViewFreshness {
    last_success: Mutex<Option<DateTime<Utc>>>,
    tracking_since: DateTime<Utc>,
    warn_after: Duration,
}

impl ViewFreshness {
    pub fn new(tracking_since: DateTime<Utc>, warn_after: Duration) -> Self {
        Self {
            last_success: Mutex::new(None),
            tracking_since,
            warn_after,
        }
    }

    pub fn record_success(&self, at: DateTime<Utc>) {
        *self.last_success.lock() = Some(at);
    }

    /// Time since the last successful refresh (or since tracking began).
    pub fn stale_for(&self, now: DateTime<Utc>) -> Duration {
        let since = self.last_success.lock().unwrap_or(self.tracking_since);
        now - since
    }

    /// Staleness beyond the configured bound.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.stale_for(now) > self.warn_after
    }
}

/// Postgres-backed sink holding a single connection.
pub struct PostgresSink {
    db: DatabaseConnection,
    timezone: Tz,
    freshness: ViewFreshness,
}

impl PostgresSink {
    pub fn new(db: DatabaseConnection, timezone: Tz, view_staleness_warn_hours: u32) -> Self {
        Self {
            db,
            timezone,
            freshness: ViewFreshness::new(
                Utc::now(),
                Duration::hours(i64::from(view_staleness_warn_hours)),
            ),
        }
    }

    /// Connect with the configured bounded retry policy.
    pub async fn connect(config: &StreamerConfig) -> Result<Self, RetryExhausted<DbErr>> {
        let policy = RetryPolicy::fixed(config.connect_max_retries, config.connect_retry_delay);
        let db = connect_database(&config.sink, &policy).await?;

        Ok(Self::new(
            db,
            config.replay.timezone,
            config.view_staleness_warn_hours,
        ))
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    pub async fn close(self) -> Result<(), SinkError> {
        self.db.close().await?;
        Ok(())
    }

    async fn insert_all(
        &self,
        txn: &sea_orm::DatabaseTransaction,
        records: &[MappedRecord],
    ) -> Result<u64, DbErr> {
        let mut inserted = 0;

        for chunk in records.chunks(INSERT_PAGE_SIZE) {
            let models = chunk.iter().map(production_data::ActiveModel::from);
            let result = ProductionData::insert_many(models)
                .on_conflict(
                    OnConflict::columns([
                        production_data::Column::Time,
                        production_data::Column::WellName,
                    ])
                    .do_nothing()
                    .to_owned(),
                )
                .do_nothing()
                .exec_without_returning(txn)
                .await?;

            if let TryInsertResult::Inserted(rows) = result {
                inserted += rows;
            }
        }

        Ok(inserted)
    }

    async fn refresh_latest_view(&self, mode: WriteMode) -> bool {
        let now = Utc::now();
        match self.db.execute_unprepared(REFRESH_VIEW_SQL).await {
            Ok(_) => {
                self.freshness.record_success(now);
                true
            }
            Err(e) => {
                let stale_hours = self.freshness.stale_for(now).num_minutes() as f64 / 60.0;
                let overdue = self.freshness.is_overdue(now);
                match classify_refresh_error(&e) {
                    RefreshFailure::PermissionDenied if overdue => error!(
                        error = %e,
                        stale_hours = stale_hours,
                        "latest_production has not been refreshed within the staleness bound \
                         (insufficient privileges); grant ownership of the view to the streamer role"
                    ),
                    RefreshFailure::PermissionDenied if mode == WriteMode::Verbose => warn!(
                        error = %e,
                        stale_hours = stale_hours,
                        "Cannot refresh materialized view (insufficient privileges); \
                         grant ownership of latest_production to the streamer role"
                    ),
                    RefreshFailure::PermissionDenied => debug!(
                        error = %e,
                        "Skipping materialized view refresh (insufficient privileges)"
                    ),
                    RefreshFailure::Other if overdue => error!(
                        error = %e,
                        stale_hours = stale_hours,
                        "latest_production has not been refreshed within the staleness bound"
                    ),
                    RefreshFailure::Other => warn!(
                        error = %e,
                        stale_hours = stale_hours,
                        "Failed to refresh materialized view"
                    ),
                }
                false
            }
        }
    }

    fn log_written(&self, records: &[MappedRecord], inserted: u64) {
        let (Some(original_min), Some(original_max)) = (
            records.iter().map(|r| r.original_time()).min(),
            records.iter().map(|r| r.original_time()).max(),
        ) else {
            return;
        };
        let (Some(mapped_min), Some(mapped_max)) = (
            records.iter().map(|r| r.time).min(),
            records.iter().map(|r| r.time).max(),
        ) else {
            return;
        };

        let local = |t: DateTime<Utc>| t.with_timezone(&self.timezone).format(LOG_TIME_FORMAT);
        info!(
            records = records.len(),
            inserted = inserted,
            "✓ Streamed {} records | Original: {} → {} | Offset: {} → {}",
            records.len(),
            local(original_min),
            local(original_max),
            local(mapped_min),
            local(mapped_max)
        );
    }
}

#[async_trait]
impl ProductionSink for PostgresSink {
    async fn high_water_mark(&self) -> Result<Option<HighWaterMark>, SinkError> {
        #[derive(Debug, FromQueryResult)]
        struct HighWaterRow {
            last_time: Option<DateTime<Utc>>,
            last_original_time: Option<NaiveDateTime>,
        }

        let row = HighWaterRow::find_by_statement(Statement::from_string(
            DbBackend::Postgres,
            "SELECT MAX(time) AS last_time, MAX(original_time) AS last_original_time \
             FROM production_data",
        ))
        .one(&self.db)
        .await?;

        Ok(match row {
            Some(HighWaterRow {
                last_time: Some(time),
                last_original_time: Some(original),
            }) => Some(HighWaterMark {
                time,
                original_time: original.and_utc(),
            }),
            _ => None,
        })
    }

    async fn write(
        &self,
        records: &[MappedRecord],
        mode: WriteMode,
    ) -> Result<WriteSummary, SinkError> {
        if records.is_empty() {
            return Ok(WriteSummary::default());
        }

        let txn = self.db.begin().await?;
        let inserted = match self.insert_all(&txn, records).await {
            Ok(inserted) => {
                txn.commit().await.map_err(|e| {
                    error!(error = %e, "Failed to commit batch");
                    e
                })?;
                inserted
            }
            Err(e) => {
                if let Err(rollback_err) = txn.rollback().await {
                    warn!(error = %rollback_err, "Rollback after failed insert also failed");
                }
                error!(error = %e, records = records.len(), "Failed to insert batch");
                return Err(e.into());
            }
        };

        let view_refreshed = self.refresh_latest_view(mode).await;

        match mode {
            WriteMode::Verbose => self.log_written(records, inserted),
            WriteMode::Silent => debug!(
                records = records.len(),
                inserted = inserted,
                "Batch written"
            ),
        }

        Ok(WriteSummary {
            submitted: records.len(),
            inserted,
            view_refreshed,
        })
    }
}

/// Open the single sink connection, retrying per `policy`.
pub async fn connect_database(
    sink: &SinkConfig,
    policy: &RetryPolicy,
) -> Result<DatabaseConnection, RetryExhausted<DbErr>> {
    let options = sink.connect_options();
    let target = sink.display_target();

    let db = policy
        .run("postgres connect", |attempt| {
            let options = options.clone();
            let target = target.clone();
            async move {
                debug!(attempt = attempt, sink = %target, "Connecting to PostgreSQL");
                let pool = PgPoolOptions::new()
                    .max_connections(1)
                    .min_connections(1)
                    .acquire_timeout(std::time::Duration::from_secs(CONNECT_TIMEOUT_SECS))
                    .connect_with(options)
                    .await
                    .map_err(|e| DbErr::Conn(RuntimeErr::SqlxError(e)))?;
                Ok::<_, DbErr>(SqlxPostgresConnector::from_sqlx_postgres_pool(pool))
            }
        })
        .await?;

    info!(sink = %target, "Connected to PostgreSQL");
    Ok(db)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_permission_errors_are_recognised() {
        let err = DbErr::Custom(
            "permission denied for materialized view latest_production".to_string(),
        );
        assert_eq!(classify_refresh_error(&err), RefreshFailure::PermissionDenied);

        let err = DbErr::Custom("must be owner of materialized view latest_production".to_string());
        assert_eq!(classify_refresh_error(&err), RefreshFailure::PermissionDenied);

        let err = DbErr::Custom("relation \"latest_production\" does not exist".to_string());
        assert_eq!(classify_refresh_error(&err), RefreshFailure::Other);
    }

    #[test]
    fn test_view_freshness_bound() {
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let freshness = ViewFreshness::new(start, Duration::hours(24));

        assert!(!freshness.is_overdue(start + Duration::hours(23)));
        assert!(freshness.is_overdue(start + Duration::hours(25)));

        freshness.record_success(start + Duration::hours(24));
        assert_eq!(
            freshness.stale_for(start + Duration::hours(30)),
            Duration::hours(6)
        );
        assert!(!freshness.is_overdue(start + Duration::hours(30)));
    }

    #[test]
    fn test_page_size_fits_bind_limit() {
        assert!(INSERT_PAGE_SIZE * 22 < 65535);
    }
}
