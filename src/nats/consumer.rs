//! JetStream consumer for step events
//!
//! One message is in flight at a time (`max_ack_pending = 1`): a message is
//! fetched, fully processed, then acked or nak'd before the next fetch.

use std::time::Duration;

use async_nats::jetstream::{self, consumer::PullConsumer, stream::Stream, AckKind};
use async_nats::ConnectOptions;
use futures_util::StreamExt;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::NatsArgs;
use crate::model::StepEvent;
use crate::service::{ProcessOutcome, TrackingService};
use crate::shutdown;
use crate::types::{Result, TrackerError};

/// Default ping interval for keep-alive
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(120);

/// Pause after a failed fetch before trying again
const FETCH_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Consumer configuration
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Client name reported to the NATS server
    pub client_name: String,
    pub stream: String,
    pub subject: String,
    /// Durable consumer name
    pub durable_name: String,
    /// How long an empty fetch waits before idle flushing
    pub fetch_idle: Duration,
    /// Delay requested when a message is nak'd
    pub redelivery_delay: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            client_name: "waypoint".to_string(),
            stream: "TRACK_DATA".to_string(),
            subject: "track.data".to_string(),
            durable_name: "waypoint".to_string(),
            fetch_idle: Duration::from_secs(5),
            redelivery_delay: Duration::from_secs(5),
        }
    }
}

/// What the transport should do with a processed message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Done with it, including dropped/rejected events
    Ack,
    /// Not applied; deliver again later
    Redeliver,
}

/// Decode and process one message payload.
pub async fn handle_payload(service: &mut TrackingService, payload: &[u8]) -> Disposition {
    let event: StepEvent = match serde_json::from_slice(payload) {
        Ok(event) => event,
        Err(e) => {
            let tracker_id = payload_tracker_id(payload).unwrap_or_default();
            warn!(tracker_id = %tracker_id, error = %e, "Dropping malformed event");
            return Disposition::Ack;
        }
    };

    match service.process(event).await {
        Ok(ProcessOutcome::Rejected(_)) => Disposition::Ack,
        Ok(ProcessOutcome::Buffered { flush }) => {
            if let Some(report) = flush {
                debug!(
                    flushed = report.flushed,
                    evicted = report.evicted,
                    attempts = report.attempts,
                    "Event triggered flush"
                );
            }
            Disposition::Ack
        }
        Err(TrackerError::Cancelled) => {
            // Already merged into the cache; the final flush writes it
            info!("Shutdown during flush, event left buffered");
            Disposition::Ack
        }
        Err(e) if e.is_transient() => {
            warn!(error = %e, "Event not applied, requesting redelivery");
            Disposition::Redeliver
        }
        Err(e) => {
            error!(error = %e, "Event failed permanently, dropping");
            Disposition::Ack
        }
    }
}

/// Best-effort tracker id of a payload that failed to decode, for logging
fn payload_tracker_id(payload: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(payload).ok()?;
    value
        .get("tracker_id")
        .or_else(|| value.get("trackerId"))?
        .as_str()
        .map(str::to_string)
}

/// Durable JetStream consumer feeding a [`TrackingService`]
pub struct EventConsumer {
    config: ConsumerConfig,
    jetstream: jetstream::Context,
}

impl EventConsumer {
    /// Connect to NATS
    pub async fn connect(args: &NatsArgs, config: ConsumerConfig) -> Result<Self> {
        info!("Connecting to NATS at {}", args.nats_url);

        let mut options = ConnectOptions::new()
            .name(&config.client_name)
            .ping_interval(DEFAULT_PING_INTERVAL)
            .connection_timeout(Duration::from_secs(5));

        if let (Some(user), Some(pass)) = (&args.nats_user, &args.nats_password) {
            options = options.user_and_password(user.clone(), pass.clone());
        }

        let client = options
            .connect(&args.nats_url)
            .await
            .map_err(|e| TrackerError::Nats(format!("Failed to connect: {}", e)))?;

        info!("Connected to NATS at {}", args.nats_url);

        Ok(Self {
            config,
            jetstream: jetstream::new(client),
        })
    }

    /// Ensure the event stream exists
    async fn ensure_stream(&self) -> Result<Stream> {
        let stream = self
            .jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: self.config.stream.clone(),
                subjects: vec![self.config.subject.clone()],
                storage: jetstream::stream::StorageType::File,
                ..Default::default()
            })
            .await
            .map_err(|e| TrackerError::Nats(format!("Failed to create stream: {e}")))?;

        info!(
            "Using stream {} with subject {}",
            self.config.stream, self.config.subject
        );
        Ok(stream)
    }

    /// Ensure the durable consumer exists
    async fn ensure_consumer(&self, stream: &Stream) -> Result<PullConsumer> {
        let name = &self.config.durable_name;

        let consumer = stream
            .get_or_create_consumer(
                name,
                jetstream::consumer::pull::Config {
                    durable_name: Some(name.clone()),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    filter_subject: self.config.subject.clone(),
                    max_ack_pending: 1,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| TrackerError::Nats(format!("Failed to create consumer: {e}")))?;

        info!("Using consumer {}", name);
        Ok(consumer)
    }

    /// Consume until shutdown is requested.
    ///
    /// Buffered documents are left in `service`; the caller decides on a
    /// final flush.
    pub async fn run(&self, service: &mut TrackingService, mut shutdown_rx: watch::Receiver<bool>) -> Result<()> {
        let stream = self.ensure_stream().await?;
        let consumer = self.ensure_consumer(&stream).await?;

        info!("Listening for step events");

        'fetch: loop {
            if shutdown::is_requested(&shutdown_rx) {
                break;
            }

            let batch = tokio::select! {
                batch = consumer
                    .fetch()
                    .max_messages(1)
                    .expires(self.config.fetch_idle)
                    .messages() => batch,
                _ = shutdown::requested(&mut shutdown_rx) => break 'fetch,
            };

            let mut messages = match batch {
                Ok(messages) => messages,
                Err(e) => {
                    error!("Failed to fetch messages: {}", e);
                    tokio::time::sleep(FETCH_ERROR_BACKOFF).await;
                    continue;
                }
            };

            let mut received = 0usize;

            loop {
                let next = tokio::select! {
                    next = messages.next() => next,
                    _ = shutdown::requested(&mut shutdown_rx) => break 'fetch,
                };

                match next {
                    Some(Ok(msg)) => {
                        received += 1;
                        self.handle_message(service, msg).await;
                    }
                    Some(Err(e)) => warn!("Error receiving message: {}", e),
                    None => break,
                }
            }

            if received == 0 {
                match service.flush_idle().await {
                    Ok(Some(report)) => {
                        debug!(flushed = report.flushed, "Idle flush completed");
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "Idle flush interrupted"),
                }
            }
        }

        info!("Consumer stopped");
        Ok(())
    }

    async fn handle_message(&self, service: &mut TrackingService, msg: jetstream::Message) {
        let disposition = handle_payload(service, &msg.payload).await;

        let result = match disposition {
            Disposition::Ack => msg.ack().await,
            Disposition::Redeliver => {
                msg.ack_with(AckKind::Nak(Some(self.config.redelivery_delay)))
                    .await
            }
        };

        if let Err(e) = result {
            warn!("Failed to ack message: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::index::InMemoryIndex;
    use crate::service::ServiceConfig;

    fn service(index: Arc<InMemoryIndex>) -> TrackingService {
        let (_, rx) = shutdown::channel();
        TrackingService::new(index, ServiceConfig::default(), rx)
    }

    #[tokio::test]
    async fn test_malformed_payload_is_acked() {
        let index = Arc::new(InMemoryIndex::new());
        let mut service = service(index.clone());

        assert_eq!(handle_payload(&mut service, b"not json").await, Disposition::Ack);
        assert_eq!(index.call_counts().exists_checks, 0);
    }

    #[tokio::test]
    async fn test_rejected_event_is_acked() {
        let index = Arc::new(InMemoryIndex::new());
        let mut service = service(index.clone());

        let payload = br#"{"application": "Shop", "tracker_id": "0123456789abcdef0123456789abcdef"}"#;
        assert_eq!(handle_payload(&mut service, payload).await, Disposition::Ack);
        assert_eq!(index.call_counts().exists_checks, 0);
    }

    #[tokio::test]
    async fn test_applied_event_is_acked() {
        let index = Arc::new(InMemoryIndex::new());
        let mut service = service(index.clone());

        let payload = br#"{
            "application": "shop",
            "tracker_id": "0123456789abcdef0123456789abcdef",
            "step": {"name": "cart", "date": "2024-03-01T10:00:00Z"}
        }"#;
        assert_eq!(handle_payload(&mut service, payload).await, Disposition::Ack);
        assert!(index
            .stored("journeys_shop", "0123456789abcdef0123456789abcdef")
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_read_failure_requests_redelivery() {
        let index = Arc::new(InMemoryIndex::new());
        index.set_failing_reads(true);
        let mut service = service(index.clone());

        let payload = br#"{"application": "shop", "tracker_id": "0123456789abcdef0123456789abcdef"}"#;
        assert_eq!(handle_payload(&mut service, payload).await, Disposition::Redeliver);
        assert_eq!(service.stats().pending, 0);
    }

    #[tokio::test]
    async fn test_shutdown_during_flush_acks_buffered_event() {
        let index = Arc::new(InMemoryIndex::new());
        index.fail_next_bulk_writes(usize::MAX);
        let (tx, rx) = shutdown::channel();
        tx.send(true).unwrap();
        let mut service = TrackingService::new(index.clone(), ServiceConfig::default(), rx);

        let payload = br#"{
            "application": "shop",
            "tracker_id": "0123456789abcdef0123456789abcdef",
            "step": {"name": "cart", "date": "2024-03-01T10:00:00Z"}
        }"#;
        assert_eq!(handle_payload(&mut service, payload).await, Disposition::Ack);
        assert_eq!(service.stats().pending, 1);
        assert_eq!(index.call_counts().bulk_writes, 1);
    }

    #[test]
    fn test_tracker_id_of_malformed_payload() {
        let payload = br#"{"trackerId": "0123456789abcdef0123456789abcdef", "step": {"name": "a", "date": "soon"}}"#;
        assert_eq!(
            payload_tracker_id(payload).as_deref(),
            Some("0123456789abcdef0123456789abcdef")
        );
        assert_eq!(payload_tracker_id(b"not json"), None);
    }
}
