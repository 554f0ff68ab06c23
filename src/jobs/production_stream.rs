//! Production Stream Job
//!
//! Replays the source dataset into the sink on the wall clock:
//! 1. Batch-loads history up to the current hour on a fresh start with an offset
//! 2. Catches up in larger silent batches whenever the cursor falls behind
//! 3. Otherwise streams exactly one source hour at every local hour boundary
//!
//! Reaching the end of the dataset wraps the cursor back to the first record.
//! Cancellation is checked between iterations; a write in flight always completes.

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ReplayConfig;
use crate::error::Result;
use crate::models::production::{MappedRecord, SourceRecord};
use crate::services::clock::Clock;
use crate::services::replay_state::{ReplayMode, ReplayState};
use crate::services::sink_writer::{ProductionSink, WriteMode};
use crate::services::source_reader::{DataRange, ProductionSource, SourceError, TimeWindow};
use crate::services::time_mapper::TimeMapper;

/// Pause after wrapping to the start of the dataset
pub const WRAP_PAUSE: Duration = Duration::from_secs(5);

/// Longest single sleep while waiting for the next hour boundary
pub const MAX_TICK_SLEEP: Duration = Duration::from_secs(60);

/// Result of the batch-load phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchLoadOutcome {
    Completed,
    Interrupted,
}

/// How a catch-up run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CatchUpOutcome {
    CaughtUp,
    Wrapped,
    Interrupted,
}

/// Hours to fetch in one catch-up batch: never overshoot, always move.
pub fn catchup_hours(hours_behind: f64, catchup_batch_hours: u32) -> u32 {
    let whole_hours_behind = hours_behind.floor().max(0.0).min(f64::from(u32::MAX)) as u32;
    catchup_batch_hours.min(whole_hours_behind).max(1)
}

/// Offset actually usable against this dataset.
pub fn effective_offset_days(range: &DataRange, start_offset_days: u32) -> u32 {
    let available = u32::try_from(range.total_days().max(0)).unwrap_or(u32::MAX);
    start_offset_days.min(available)
}

pub struct ProductionStreamer<S, W, C> {
    source: S,
    sink: W,
    clock: C,
    config: ReplayConfig,
    cancel: CancellationToken,
}

impl<S, W, C> ProductionStreamer<S, W, C>
where
    S: ProductionSource,
    W: ProductionSink,
    C: Clock,
{
    pub fn new(source: S, sink: W, clock: C, config: ReplayConfig, cancel: CancellationToken) -> Self {
        Self {
            source,
            sink,
            clock,
            config,
            cancel,
        }
    }

    pub fn sink(&self) -> &W {
        &self.sink
    }

    /// Hand the connections back so the caller can close them.
    pub fn into_parts(self) -> (S, W) {
        (self.source, self.sink)
    }

    /// Read the dataset bounds and the sink's high-water mark.
    pub async fn initialize(&self) -> Result<ReplayState> {
        let range = self
            .source
            .data_range()
            .await?
            .ok_or_else(|| SourceError::EmptyDataset("prod_hourly_data".to_string()))?;

        info!(
            min_date = %range.min_date,
            max_date = %range.max_date,
            total_days = range.total_days(),
            "Source data range loaded"
        );

        let high_water_mark = self.sink.high_water_mark().await?;
        Ok(ReplayState::initialize(
            range,
            high_water_mark,
            &self.config,
            self.clock.now(),
        ))
    }

    /// Run until cancelled. Only startup and write failures end it early.
    pub async fn run(&self) -> Result<()> {
        let mut state = self.initialize().await?;

        if state.mode == ReplayMode::BatchLoad {
            match self.batch_load(&mut state).await? {
                BatchLoadOutcome::Completed => state.enter_streaming(),
                BatchLoadOutcome::Interrupted => {
                    warn!("Batch load was interrupted");
                    return Ok(());
                }
            }
        }

        self.stream(&mut state).await
    }

    fn mapper(&self, state: &ReplayState) -> TimeMapper {
        let range = DataRange {
            min_date: state.min_date,
            max_date: state.max_date,
        };
        TimeMapper::new(
            state.min_date,
            effective_offset_days(&range, self.config.start_offset_days),
            self.config.timezone,
        )
    }

    fn map_records(&self, mapper: &TimeMapper, records: Vec<SourceRecord>) -> Vec<MappedRecord> {
        let now = self.clock.now();
        records
            .into_iter()
            .map(|record| {
                let time = mapper.map(record.original_time, now);
                record.into_mapped(time)
            })
            .collect()
    }

    /// Load history from the cursor to the reference date without pacing.
    pub async fn batch_load(&self, state: &mut ReplayState) -> Result<BatchLoadOutcome> {
        let mapper = self.mapper(state);
        let batch_start = state.current_timestamp;
        let total_hours = state.batch_hours_remaining();

        info!(
            total_hours = total_hours,
            batch_size_hours = self.config.batch_size_hours,
            "Starting batch load of historical data..."
        );

        let mut batch_count: u64 = 0;
        while !state.batch_load_done() {
            if self.cancel.is_cancelled() {
                return Ok(BatchLoadOutcome::Interrupted);
            }

            let end = (state.current_timestamp
                + chrono::Duration::hours(i64::from(self.config.batch_size_hours)))
            .min(state.reference_date);
            let window = TimeWindow::following(state.current_timestamp, end, state.min_date);

            let records = self.source.fetch_window(window).await?;
            if records.is_empty() {
                warn!("No data found for period {} to {}", window.start, window.end);
                state.advance_to(window.end);
                continue;
            }

            let mapped = self.map_records(&mapper, records);
            self.sink.write(&mapped, WriteMode::Silent).await?;
            state.advance_to(window.end);
            batch_count += 1;

            let loaded_hours = (window.end - batch_start).num_minutes() as f64 / 60.0;
            let progress_pct = if total_hours > 0.0 {
                loaded_hours / total_hours * 100.0
            } else {
                100.0
            };
            let (first, last) = original_date_span(&mapped);
            info!(
                batch = batch_count,
                records = mapped.len(),
                "Batch {}: Loaded {} records | Original: {} to {} | Progress: {:.1}%",
                batch_count,
                mapped.len(),
                first,
                last,
                progress_pct
            );
        }

        info!(
            loaded_hours = total_hours,
            "✓ Batch load complete! Original timeline: {} → {}. Switching to real-time streaming mode",
            batch_start.date_naive(),
            state.reference_date.date_naive()
        );
        Ok(BatchLoadOutcome::Completed)
    }

    /// Streaming phase: catch-up when far behind, otherwise one hour per boundary.
    pub async fn stream(&self, state: &mut ReplayState) -> Result<()> {
        let mapper = self.mapper(state);

        info!(
            catchup_threshold_hours = self.config.catchup_threshold_hours,
            timezone = %self.config.timezone,
            "Real-time streaming started, one hour of data at each hour boundary"
        );

        while !self.cancel.is_cancelled() {
            let hours_behind = mapper.hours_behind(state.current_timestamp, self.clock.now());

            if hours_behind > f64::from(self.config.catchup_threshold_hours) {
                match self.catch_up(state, &mapper, hours_behind).await? {
                    CatchUpOutcome::CaughtUp | CatchUpOutcome::Wrapped => continue,
                    CatchUpOutcome::Interrupted => break,
                }
            }

            self.normal_tick(state, &mapper).await?;
        }

        info!(
            current_timestamp = %state.current_timestamp,
            "Streaming stopped"
        );
        Ok(())
    }

    async fn catch_up(
        &self,
        state: &mut ReplayState,
        mapper: &TimeMapper,
        mut hours_behind: f64,
    ) -> Result<CatchUpOutcome> {
        let threshold = f64::from(self.config.catchup_threshold_hours);
        warn!(
            hours_behind = hours_behind,
            "⚡ CATCH-UP MODE: {:.1} hours behind schedule, streaming up to {} hours per batch",
            hours_behind,
            self.config.catchup_batch_hours
        );

        while hours_behind > threshold {
            if self.cancel.is_cancelled() {
                return Ok(CatchUpOutcome::Interrupted);
            }

            let hours = catchup_hours(hours_behind, self.config.catchup_batch_hours);
            let window = TimeWindow::hours_from(state.current_timestamp, hours, state.min_date);
            let records = self.source.fetch_window(window).await?;

            if records.is_empty() {
                if state.is_exhausted() {
                    info!("Reached end of dataset during catch-up. Restarting from beginning...");
                    state.wrap();
                    self.pause(WRAP_PAUSE).await;
                    return Ok(CatchUpOutcome::Wrapped);
                }
                debug!(start = %window.start, end = %window.end, "Gap in source data");
                state.advance_to(window.end);
                hours_behind = mapper.hours_behind(state.current_timestamp, self.clock.now());
                continue;
            }

            let mapped = self.map_records(mapper, records);
            self.sink.write(&mapped, WriteMode::Silent).await?;
            state.advance_to(window.end);

            hours_behind = mapper.hours_behind(state.current_timestamp, self.clock.now());
            info!(
                records = mapped.len(),
                hours = hours,
                hours_behind = hours_behind,
                "Catch-up: Loaded {} records ({}h) | Still {:.1}h behind",
                mapped.len(),
                hours,
                hours_behind
            );
        }

        info!(
            hours_behind = hours_behind,
            "✓ Caught up! Now only {:.1}h behind. Switching to clock-synchronized mode",
            hours_behind
        );
        Ok(CatchUpOutcome::CaughtUp)
    }

    /// Wait for the next local hour boundary, then stream one source hour.
    async fn normal_tick(&self, state: &mut ReplayState, mapper: &TimeMapper) -> Result<()> {
        let now = self.clock.now();
        let next_hour = mapper.next_hour_boundary(now);
        let remaining = (next_hour - now).to_std().unwrap_or(Duration::ZERO);

        debug!(
            "⏱  Waiting until {} to stream next hour ({}s)...",
            next_hour.with_timezone(&self.config.timezone).format("%H:%M"),
            remaining.as_secs()
        );

        if !self.pause(remaining.min(MAX_TICK_SLEEP)).await {
            return Ok(());
        }
        if self.clock.now() < next_hour {
            return Ok(());
        }

        let window = TimeWindow::hours_from(state.current_timestamp, 1, state.min_date);
        let records = self.source.fetch_window(window).await?;

        if records.is_empty() {
            if state.is_exhausted() {
                info!("Reached end of dataset. Restarting from beginning...");
                state.wrap();
                self.pause(WRAP_PAUSE).await;
            } else {
                debug!(start = %window.start, end = %window.end, "Gap in source data");
                state.advance_to(window.end);
            }
            return Ok(());
        }

        let mapped = self.map_records(mapper, records);
        self.sink.write(&mapped, WriteMode::Verbose).await?;
        state.advance_to(window.end);
        Ok(())
    }

    /// Sleep unless cancelled first. Returns `false` on cancellation.
    async fn pause(&self, duration: Duration) -> bool {
        if duration.is_zero() {
            return !self.cancel.is_cancelled();
        }
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = self.clock.sleep(duration) => !self.cancel.is_cancelled(),
        }
    }
}

fn original_date_span(records: &[MappedRecord]) -> (String, String) {
    let dates = records.iter().map(|r| r.original_time().date_naive());
    match (dates.clone().min(), dates.max()) {
        (Some(first), Some(last)) => (first.to_string(), last.to_string()),
        _ => (String::new(), String::new()),
    }
}
