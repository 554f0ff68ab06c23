//! Top-level error for the streamer process.

use sea_orm::DbErr;
use thiserror::Error;

use crate::config::ConfigError;
use crate::services::retry::RetryExhausted;
use crate::services::sink_writer::SinkError;
use crate::services::source_reader::SourceError;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Connection(#[from] RetryExhausted<DbErr>),

    #[error("Schema migration failed: {0}")]
    Migration(DbErr),
}

pub type Result<T> = std::result::Result<T, StreamError>;
