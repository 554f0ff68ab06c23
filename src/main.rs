use flodata_streamer::config::StreamerConfig;
use flodata_streamer::error::StreamError;
use flodata_streamer::jobs::production_stream::ProductionStreamer;
use flodata_streamer::jobs::shutdown::spawn_shutdown_listener;
use flodata_streamer::services::clock::SystemClock;
use flodata_streamer::services::sink_writer::PostgresSink;
use flodata_streamer::services::source_reader::DuckDbSource;
use sea_orm_migration::MigratorTrait;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,flodata_streamer=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = StreamerConfig::from_env().map_err(StreamError::from)?;

    tracing::info!("═══════════════════════════════════════════════════════════");
    tracing::info!("    FloData Production Streamer");
    tracing::info!("    (Clock-Synchronized Real-Time + Auto Catch-Up)");
    tracing::info!("═══════════════════════════════════════════════════════════");
    tracing::info!(
        start_offset_days = config.replay.start_offset_days,
        batch_size_hours = config.replay.batch_size_hours,
        catchup_threshold_hours = config.replay.catchup_threshold_hours,
        catchup_batch_hours = config.replay.catchup_batch_hours,
        timezone = %config.replay.timezone,
        "Configuration loaded"
    );

    let cancel = CancellationToken::new();
    let listener = spawn_shutdown_listener(cancel.clone());

    tracing::info!(path = %config.duckdb_path.display(), "Opening DuckDB source (read-only)...");
    let source = DuckDbSource::open_readonly(&config.duckdb_path).map_err(StreamError::from)?;

    tracing::info!(sink = %config.sink.display_target(), "Connecting to TimescaleDB...");
    let sink = PostgresSink::connect(&config)
        .await
        .map_err(StreamError::from)?;
    tracing::info!("✓ Connected to TimescaleDB");

    if config.run_migrations {
        tracing::info!("Running migrations...");
        migration::Migrator::up(sink.connection(), None)
            .await
            .map_err(StreamError::Migration)?;
    }

    let streamer = ProductionStreamer::new(
        source,
        sink,
        SystemClock,
        config.replay.clone(),
        cancel.clone(),
    );
    let outcome = streamer.run().await;

    tracing::info!("Cleaning up...");
    cancel.cancel();
    listener.abort();

    let (source, sink) = streamer.into_parts();
    drop(source);
    if let Err(e) = sink.close().await {
        tracing::warn!(error = %e, "Failed to close sink connection");
    }

    match outcome {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "Fatal error");
            tracing::info!("Shutdown complete");
            Err(e.into())
        }
    }
}
