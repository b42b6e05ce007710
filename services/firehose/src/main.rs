//! Firehose ingest service for the Skywatch analytics platform.
//!
//! Thin driver around the stream session: it loads configuration, seeds the
//! watch-set, connects to the Jetstream, runs one session, and reports the
//! flush outcomes.
//!
//! # Architecture
//!
//! ```text
//! Jetstream -> JetstreamSource -> StreamSession -> EventBuffer -> ObjectSink
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded from:
//! 1. Configuration files (config/default.toml, config/{env}.toml)
//! 2. Environment variables (prefixed with FIREHOSE_)
//!
//! See `config.rs` for detailed configuration options.

use anyhow::{bail, Context, Result};
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use skywatch_firehose::config::{FirehoseConfig, JetstreamConfig, LoggingConfig, StorageBackend};
use skywatch_firehose::session::{SessionOptions, SessionSummary, StreamSession};
use skywatch_firehose::sink::{FsSink, ObjectSink, S3Sink};
use skywatch_firehose::transport::{ConnectError, JetstreamSource};
use skywatch_firehose::watch::{WatchMode, WatchSet};
use skywatch_firehose::{seed, FlushOutcome};

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config()?;

    init_tracing(&config.logging);

    info!(
        service = "skywatch-firehose",
        version = env!("CARGO_PKG_VERSION"),
        endpoint = %config.jetstream.endpoint,
        mode = ?config.watch.mode,
        "Starting firehose ingest service"
    );

    config.validate()?;

    if config.metrics.enabled {
        init_metrics(config.metrics.port)?;
    }

    let watch = seed_watch_set(&config).await?;
    if config.watch.mode == WatchMode::Filtered {
        info!(identities = watch.len(), "watch-set ready");
    }

    let summary = match config.storage.backend {
        StorageBackend::S3 => {
            let sink = S3Sink::new(&config.storage)
                .await
                .context("Failed to initialize S3 sink")?;
            run_session(&config, watch, sink).await?
        }
        StorageBackend::Filesystem => {
            let sink = FsSink::new(&config.storage)
                .context("Failed to initialize filesystem sink")?;
            run_session(&config, watch, sink).await?
        }
    };

    report(&summary);

    let failed = summary.failed_flushes();
    if failed > 0 {
        bail!("{failed} batch flush(es) failed at shutdown");
    }

    Ok(())
}

/// Load and validate configuration.
fn load_config() -> Result<FirehoseConfig> {
    let config = FirehoseConfig::load().or_else(|e| {
        warn!(error = %e, "Failed to load config from files, trying environment");
        FirehoseConfig::from_env()
    })?;

    Ok(config)
}

/// Initialize the tracing/logging subsystem.
fn init_tracing(config: &LoggingConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    if config.format == "json" {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer().pretty()).init();
    }
}

/// Initialize Prometheus metrics exporter.
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Build the watch-set: seed query result (when configured) merged with the
/// static allow-list.
async fn seed_watch_set(config: &FirehoseConfig) -> Result<WatchSet> {
    let mut identities = config.watch.identities.clone();

    if let Some(database) = &config.database {
        let seeded = seed::fetch_identities(database)
            .await
            .context("Failed to seed watch identities")?;
        identities.extend(seeded);
    }

    let watch = WatchSet::from_identities(identities);
    if config.watch.mode == WatchMode::Filtered && watch.is_empty() {
        bail!("filtered mode with an empty watch-set would retain nothing");
    }

    Ok(watch)
}

/// Connect and run one stream session against the given sink.
async fn run_session<K: ObjectSink>(
    config: &FirehoseConfig,
    watch: WatchSet,
    sink: K,
) -> Result<SessionSummary> {
    let source = connect_with_retry(&config.jetstream)
        .await
        .context("Failed to connect to jetstream")?;

    let options = SessionOptions::new(
        config.watch.mode,
        config.window.granularity_secs,
        config.storage.prefix.clone(),
    )
    .with_idle_timeout(config.jetstream.idle_timeout());

    let session = StreamSession::new(source, sink, watch, options);
    Ok(session.run(config.jetstream.run_duration()).await)
}

/// Connect with exponential backoff. Retry lives here in the driver; the
/// session itself treats connect failure as fatal.
async fn connect_with_retry(config: &JetstreamConfig) -> Result<JetstreamSource, ConnectError> {
    let mut backoff = ExponentialBackoff {
        initial_interval: config.retry_base_delay(),
        max_interval: config.retry_max_delay(),
        max_elapsed_time: None,
        ..Default::default()
    };

    let mut attempts = 0u32;

    loop {
        match JetstreamSource::connect(config).await {
            Ok(source) => return Ok(source),
            Err(e) => {
                if attempts >= config.max_connect_attempts {
                    return Err(e);
                }
                attempts += 1;

                let delay = backoff.next_backoff().unwrap_or(config.retry_max_delay());
                warn!(
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Connection failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Log final statistics and per-key flush outcomes.
fn report(summary: &SessionSummary) {
    let stats = &summary.stats;
    info!(
        frames_received = stats.frames_received,
        decode_errors = stats.decode_errors,
        transport_faults = stats.transport_faults,
        events_filtered = stats.events_filtered,
        events_buffered = stats.events_buffered,
        batches_flushed = stats.batches_flushed,
        batches_failed = stats.batches_failed,
        lines_flushed = stats.lines_flushed,
        "Final statistics"
    );

    for (key, outcome) in &summary.outcomes {
        if let FlushOutcome::Failed(e) = outcome {
            tracing::error!(
                window = %key.window,
                partition = key.partition.as_deref().unwrap_or("-"),
                error = %e,
                "Batch was not durably written"
            );
        }
    }
}
