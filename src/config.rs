//! Configuration for Waypoint
//!
//! CLI arguments and environment variable handling using clap.

use std::time::Duration;

use clap::{Parser, ValueEnum};
use uuid::Uuid;

use crate::cache::WriteBackConfig;
use crate::index::{ElasticConfig, IndexSchema};
use crate::nats::ConsumerConfig;
use crate::service::ServiceConfig;

/// Where tracked documents are persisted
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexBackend {
    /// Elasticsearch cluster at ES_URL
    Elastic,
    /// Process memory only (development)
    Memory,
}

/// Waypoint - folds journey step events into per-tracker search documents
#[derive(Parser, Debug, Clone)]
#[command(name = "waypoint")]
#[command(about = "Journey tracker: step events in, per-tracker documents out")]
pub struct Args {
    /// Unique node identifier, used in the NATS client name
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Elasticsearch base URL
    #[arg(long, env = "ES_URL", default_value = "http://localhost:9200")]
    pub es_url: String,

    /// Elasticsearch username (optional)
    #[arg(long, env = "ES_USER")]
    pub es_user: Option<String>,

    /// Elasticsearch password (optional)
    #[arg(long, env = "ES_PASSWORD")]
    pub es_password: Option<String>,

    /// Elasticsearch request timeout in milliseconds
    #[arg(long, env = "ES_TIMEOUT_MS", default_value = "10000")]
    pub es_timeout_ms: u64,

    /// Prefix of per-application index names ({prefix}_{application})
    #[arg(long, env = "INDEX_PREFIX", default_value = "journeys")]
    pub index_prefix: String,

    /// Primary shards for newly created indexes
    #[arg(long, env = "INDEX_SHARDS", default_value = "3")]
    pub index_shards: u32,

    /// Replicas for newly created indexes
    #[arg(long, env = "INDEX_REPLICAS", default_value = "1")]
    pub index_replicas: u32,

    /// Storage backend
    #[arg(long, env = "INDEX_BACKEND", value_enum, default_value_t = IndexBackend::Elastic)]
    pub index_backend: IndexBackend,

    /// NATS configuration
    #[command(flatten)]
    pub nats: NatsArgs,

    /// How long a fetch waits for a message before flushing idle buffers
    #[arg(long, env = "FETCH_IDLE_MS", default_value = "5000")]
    pub fetch_idle_ms: u64,

    /// Redelivery delay for events that could not be applied
    #[arg(long, env = "REDELIVERY_DELAY_MS", default_value = "5000")]
    pub redelivery_delay_ms: u64,

    /// Read-through cache lifetime after a document's last update
    #[arg(long, env = "CACHE_TTL_MS", default_value = "60000")]
    pub cache_ttl_ms: u64,

    /// Minimum interval between debounced flushes
    #[arg(long, env = "FLUSH_DEBOUNCE_MS", default_value = "3000")]
    pub flush_debounce_ms: u64,

    /// Cached tracker count that forces a flush inside the debounce window
    #[arg(long, env = "OVERFLOW_THRESHOLD", default_value = "1000")]
    pub overflow_threshold: usize,

    /// Wait between bulk write attempts in milliseconds
    #[arg(long, env = "RETRY_DELAY_MS", default_value = "1000")]
    pub retry_delay_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,
}

/// NATS connection and consumer configuration
#[derive(Parser, Debug, Clone)]
pub struct NatsArgs {
    /// NATS server URL
    #[arg(long, env = "NATS_URL", default_value = "nats://127.0.0.1:4222")]
    pub nats_url: String,

    /// NATS username (optional)
    #[arg(long, env = "NATS_USER")]
    pub nats_user: Option<String>,

    /// NATS password (optional)
    #[arg(long, env = "NATS_PASSWORD")]
    pub nats_password: Option<String>,

    /// JetStream stream holding step events
    #[arg(long, env = "NATS_STREAM", default_value = "TRACK_DATA")]
    pub nats_stream: String,

    /// Subject step events are published on
    #[arg(long, env = "NATS_SUBJECT", default_value = "track.data")]
    pub nats_subject: String,

    /// Durable consumer name
    #[arg(long, env = "NATS_CONSUMER", default_value = "waypoint")]
    pub nats_consumer: String,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.index_prefix.is_empty()
            || !self
                .index_prefix
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
        {
            return Err(format!(
                "INDEX_PREFIX must be lowercase alphanumerics, '_' or '-': {:?}",
                self.index_prefix
            ));
        }

        if self.index_shards == 0 {
            return Err("INDEX_SHARDS must be at least 1".to_string());
        }

        if self.overflow_threshold == 0 {
            return Err("OVERFLOW_THRESHOLD must be at least 1".to_string());
        }

        if self.fetch_idle_ms == 0 || self.retry_delay_ms == 0 || self.es_timeout_ms == 0 {
            return Err("FETCH_IDLE_MS, RETRY_DELAY_MS and ES_TIMEOUT_MS must be non-zero".to_string());
        }

        if self.es_password.is_some() && self.es_user.is_none() {
            return Err("ES_PASSWORD requires ES_USER".to_string());
        }

        Ok(())
    }

    pub fn schema(&self) -> IndexSchema {
        IndexSchema {
            shards: self.index_shards,
            replicas: self.index_replicas,
        }
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            index_prefix: self.index_prefix.clone(),
            schema: self.schema(),
            cache: WriteBackConfig {
                cache_ttl: Duration::from_millis(self.cache_ttl_ms),
                flush_debounce: Duration::from_millis(self.flush_debounce_ms),
                overflow_threshold: self.overflow_threshold,
            },
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    pub fn elastic_config(&self) -> ElasticConfig {
        ElasticConfig {
            url: self.es_url.clone(),
            username: self.es_user.clone(),
            password: self.es_password.clone(),
            timeout: Duration::from_millis(self.es_timeout_ms),
        }
    }

    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig {
            client_name: format!("waypoint-{}", self.node_id),
            stream: self.nats.nats_stream.clone(),
            subject: self.nats.nats_subject.clone(),
            durable_name: self.nats.nats_consumer.clone(),
            fetch_idle: Duration::from_millis(self.fetch_idle_ms),
            redelivery_delay: Duration::from_millis(self.redelivery_delay_ms),
        }
    }
}
