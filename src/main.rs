//! Waypoint - journey tracking indexer

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use waypoint::{
    config::{Args, IndexBackend},
    index::{DocumentIndex, ElasticIndex, InMemoryIndex},
    nats::EventConsumer,
    shutdown, TrackerError, TrackingService,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    init_tracing(&args);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Waypoint - journey tracking indexer");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Index backend: {:?}", args.index_backend);
    if args.index_backend == IndexBackend::Elastic {
        info!("Elasticsearch: {}", args.es_url);
    }
    info!("Index prefix: {}", args.index_prefix);
    info!("NATS: {}", args.nats.nats_url);
    info!(
        "Stream: {} / subject: {} / consumer: {}",
        args.nats.nats_stream, args.nats.nats_subject, args.nats.nats_consumer
    );
    info!(
        "Flush: debounce {}ms, overflow {} trackers, cache TTL {}ms, retry {}ms",
        args.flush_debounce_ms, args.overflow_threshold, args.cache_ttl_ms, args.retry_delay_ms
    );
    info!("======================================");

    let index: Arc<dyn DocumentIndex> = match args.index_backend {
        IndexBackend::Elastic => Arc::new(ElasticIndex::new(&args.elastic_config())?),
        IndexBackend::Memory => {
            warn!("Using in-memory index, documents are lost on exit");
            Arc::new(InMemoryIndex::new())
        }
    };

    let (shutdown_tx, shutdown_rx) = shutdown::channel();
    let mut service = TrackingService::new(index, args.service_config(), shutdown_rx.clone());

    let consumer = match EventConsumer::connect(&args.nats, args.consumer_config()).await {
        Ok(consumer) => consumer,
        Err(e) => {
            error!("NATS connection failed: {}", e);
            std::process::exit(1);
        }
    };

    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    let run_result = consumer.run(&mut service, shutdown_rx).await;
    if let Err(ref e) = run_result {
        error!("Consumer error: {}", e);
    }

    let stats = service.stats();
    info!(pending = stats.pending, items = stats.items, "Flushing buffered documents");
    match service.flush_now().await {
        Ok(report) => info!(flushed = report.flushed, "Final flush completed"),
        Err(TrackerError::Cancelled) => {
            warn!(pending = service.stats().pending, "Final flush failed, buffered documents dropped");
        }
        Err(e) => error!("Final flush failed: {}", e),
    }

    info!("Waypoint stopped");
    run_result.map_err(Into::into)
}

fn init_tracing(args: &Args) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("waypoint={},info", args.log_level).into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Resolve on Ctrl-C, or SIGTERM on unix
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
