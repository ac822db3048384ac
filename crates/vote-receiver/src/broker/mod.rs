//! Kafka hand-off for accepted votes.
//!
//! A [`BrokerPublisher`] owns a fixed [`ProducerPool`] of producer handles, verifies at startup
//! that the configured brokers serve the target topic, and spreads publish calls over the pool
//! in round-robin order. Asynchronous acknowledgements flow back as [`DeliveryEvent`]s.

mod adapter;
pub mod delivery;
pub mod handle;
pub mod health;
pub mod pool;

pub use adapter::{BrokerPublisher, PublisherSettings, VoteMessage};
pub use delivery::{
    spawn_delivery_listener, DeliveryEvent, DeliveryEvents, DeliveryOutcome, DeliveryReporter,
    DeliverySummary,
};
pub use handle::{KafkaProducerHandle, OutboundMessage, ProducerHandle};
pub use health::{
    check_brokers, BrokerHealth, BrokerProbe, HealthCheckSettings, HealthReport,
    KafkaMetadataProbe, ProbeError,
};
pub use pool::{PooledHandle, ProducerPool};

/// Error raised while building, probing or closing the producer pool.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("invalid broker configuration: {0}")]
    Config(String),
    #[error("failed to create producer {index}: {source}")]
    Client {
        index: usize,
        #[source]
        source: rdkafka::error::KafkaError,
    },
    #[error(
        "brokers unavailable for topic '{topic}' ({healthy}/{total} healthy), last error: {source}"
    )]
    Unavailable {
        topic: String,
        healthy: usize,
        total: usize,
        #[source]
        source: ProbeError,
    },
    #[error("failed to close producer {index}: {source}")]
    Close {
        index: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("producer pool is already closed")]
    AlreadyClosed,
}
