//! Replay cursor and execution mode
//!
//! Created once at startup from the dataset bounds and the sink's
//! high-water mark. Only the scheduler mutates it afterwards; it is never
//! persisted except through the rows the sink already holds.

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::config::ReplayConfig;
use crate::services::sink_writer::HighWaterMark;
use crate::services::source_reader::DataRange;
use crate::services::time_mapper::{duration_hours, TimeMapper};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayMode {
    /// Loading history up to the current hour without wall-clock pacing
    BatchLoad,
    /// Paced to wall-clock hour boundaries
    Streaming,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayState {
    /// Last source hour handed to the sink (or the dataset start)
    pub current_timestamp: DateTime<Utc>,
    /// Batch-load target; the source time that plays as "today 00:00" plus
    /// the hours already elapsed today
    pub reference_date: DateTime<Utc>,
    pub min_date: DateTime<Utc>,
    pub max_date: DateTime<Utc>,
    pub mode: ReplayMode,
}

impl ReplayState {
    /// Decide the starting position and mode.
    ///
    /// A high-water mark always wins: the cursor is set to its
    /// `original_time` verbatim and the run goes straight to streaming.
    pub fn initialize(
        range: DataRange,
        high_water_mark: Option<HighWaterMark>,
        config: &ReplayConfig,
        now: DateTime<Utc>,
    ) -> Self {
        let offset = Duration::days(i64::from(config.start_offset_days));
        let mut reference_date = range.min_date + offset;
        if reference_date > range.max_date {
            warn!(
                start_offset_days = config.start_offset_days,
                "START_OFFSET_DAYS exceeds data range. Using end date."
            );
            reference_date = range.max_date;
        }

        if let Some(mark) = high_water_mark {
            info!(
                last_time = %mark.time,
                last_original_time = %mark.original_time,
                "Found existing data in sink, resuming from where we left off"
            );

            let mut current_timestamp = mark.original_time;
            if current_timestamp < range.min_date {
                warn!(
                    last_original_time = %mark.original_time,
                    min_date = %range.min_date,
                    "High-water mark predates the source dataset, starting from its first record"
                );
                current_timestamp = range.min_date;
            }

            return Self {
                current_timestamp,
                reference_date,
                min_date: range.min_date,
                max_date: range.max_date,
                mode: ReplayMode::Streaming,
            };
        }

        if config.start_offset_days > 0 {
            let mapper = TimeMapper::new(range.min_date, config.start_offset_days, config.timezone);
            let hours_elapsed_today = mapper.whole_hours_since_local_midnight(now);
            let batch_end = reference_date + Duration::hours(i64::from(hours_elapsed_today));

            info!(
                start_offset_days = config.start_offset_days,
                hours_elapsed_today = hours_elapsed_today,
                "Batch load planned: {} → {}",
                range.min_date,
                batch_end
            );

            return Self {
                current_timestamp: range.min_date,
                reference_date: batch_end,
                min_date: range.min_date,
                max_date: range.max_date,
                mode: ReplayMode::BatchLoad,
            };
        }

        info!(from = %range.min_date, "Starting real-time streaming from the first record");
        Self {
            current_timestamp: range.min_date,
            reference_date,
            min_date: range.min_date,
            max_date: range.max_date,
            mode: ReplayMode::Streaming,
        }
    }

    /// Move the cursor forward to the end of a processed window.
    pub fn advance_to(&mut self, window_end: DateTime<Utc>) {
        debug_assert!(window_end >= self.current_timestamp);
        self.current_timestamp = window_end;
    }

    /// Restart the replay from the first record.
    pub fn wrap(&mut self) {
        self.current_timestamp = self.min_date;
    }

    pub fn enter_streaming(&mut self) {
        self.mode = ReplayMode::Streaming;
    }

    /// The cursor has passed the last source record.
    pub fn is_exhausted(&self) -> bool {
        self.current_timestamp >= self.max_date
    }

    pub fn batch_load_done(&self) -> bool {
        self.current_timestamp >= self.reference_date
    }

    /// Hours left until the batch-load target.
    pub fn batch_hours_remaining(&self) -> f64 {
        duration_hours(self.reference_date - self.current_timestamp).max(0.0)
    }
}
