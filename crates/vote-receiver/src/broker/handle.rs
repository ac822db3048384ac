use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use tokio::sync::oneshot;
use tokio::time::{timeout_at, Instant};
use tracing::debug;

use super::delivery::{DeliveryEvent, DeliveryOutcome, DeliveryReporter};
use super::BrokerError;
use crate::config::{DeliveryMode, KafkaConfig};
use crate::votes::PublishFailure;

/// Keyed record ready to be written to a topic.
#[derive(Debug, Clone, Copy)]
pub struct OutboundMessage<'a> {
    pub topic: &'a str,
    pub key: &'a str,
    pub payload: &'a [u8],
}

/// One pooled broker client. Implementations must be safe to share between concurrent sends.
#[async_trait]
pub trait ProducerHandle: Send + Sync {
    async fn send(
        &self,
        message: OutboundMessage<'_>,
        deadline: Instant,
    ) -> Result<(), PublishFailure>;

    /// Flushes pending records and releases the client.
    fn close(&self, timeout: Duration) -> Result<(), BrokerError>;
}

/// rdkafka-backed producer handle.
pub struct KafkaProducerHandle {
    index: usize,
    producer: FutureProducer,
    mode: DeliveryMode,
    reporter: DeliveryReporter,
}

impl KafkaProducerHandle {
    pub fn create(
        index: usize,
        config: &KafkaConfig,
        reporter: DeliveryReporter,
    ) -> Result<Self, BrokerError> {
        let producer: FutureProducer = client_config(index, config)
            .create()
            .map_err(|source| BrokerError::Client { index, source })?;

        Ok(Self {
            index,
            producer,
            mode: config.delivery_mode,
            reporter,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

/// librdkafka settings shared by every pooled producer.
pub(crate) fn client_config(index: usize, config: &KafkaConfig) -> ClientConfig {
    let io_timeout_ms = config.io_timeout.as_millis().max(10).to_string();
    let retries = config.max_attempts.saturating_sub(1);

    let mut client = ClientConfig::new();
    client
        .set("bootstrap.servers", config.brokers.join(","))
        .set("client.id", format!("vote-receiver-{index}"))
        .set("acks", "1")
        .set("batch.num.messages", config.batch_size.to_string())
        .set("batch.size", config.batch_bytes.to_string())
        .set("linger.ms", config.linger.as_millis().to_string())
        .set("compression.type", config.compression.as_str())
        .set("partitioner", config.partitioner.as_str())
        .set("socket.timeout.ms", io_timeout_ms.as_str())
        .set("request.timeout.ms", io_timeout_ms.as_str())
        .set("message.send.max.retries", retries.to_string())
        .set(
            "message.timeout.ms",
            config.delivery_timeout().as_millis().to_string(),
        );
    client
}

impl KafkaProducerHandle {
    /// Queues the record and spawns a task that reports the broker acknowledgement whether or
    /// not the caller is still waiting on the returned receiver.
    fn enqueue(
        &self,
        message: OutboundMessage<'_>,
    ) -> Result<oneshot::Receiver<Result<(), PublishFailure>>, PublishFailure> {
        let record = FutureRecord::to(message.topic)
            .key(message.key)
            .payload(message.payload);
        let delivery = self
            .producer
            .send_result(record)
            .map_err(|(err, _)| PublishFailure::broker(err))?;

        let (ack_sender, ack) = oneshot::channel();
        let reporter = self.reporter.clone();
        let handle = self.index;
        tokio::spawn(async move {
            let (outcome, acknowledged) = match delivery.await {
                Ok(Ok(_)) => (DeliveryOutcome::Delivered, Ok(())),
                Ok(Err((err, _))) => (
                    DeliveryOutcome::Failed(err.to_string()),
                    Err(PublishFailure::broker(err)),
                ),
                Err(_) => (
                    DeliveryOutcome::Failed(DELIVERY_CANCELLED.to_string()),
                    Err(PublishFailure::broker(DELIVERY_CANCELLED)),
                ),
            };
            reporter.report(DeliveryEvent { handle, outcome });
            ack_sender.send(acknowledged).ok();
        });
        Ok(ack)
    }
}

const DELIVERY_CANCELLED: &str = "delivery cancelled";

#[async_trait]
impl ProducerHandle for KafkaProducerHandle {
    /// Async mode returns once the record is queued. Sync mode waits for the acknowledgement
    /// until `deadline`; a record abandoned at the deadline is still reported when librdkafka
    /// settles it.
    async fn send(
        &self,
        message: OutboundMessage<'_>,
        deadline: Instant,
    ) -> Result<(), PublishFailure> {
        let ack = self.enqueue(message)?;

        match self.mode {
            DeliveryMode::Async => Ok(()),
            DeliveryMode::Sync => match timeout_at(deadline, ack).await {
                Ok(Ok(acknowledged)) => acknowledged,
                Ok(Err(_)) => Err(PublishFailure::broker(DELIVERY_CANCELLED)),
                Err(_) => Err(PublishFailure::DeadlineExceeded),
            },
        }
    }

    fn close(&self, timeout: Duration) -> Result<(), BrokerError> {
        debug!(index = self.index, ?timeout, "flushing producer");
        self.producer
            .flush(Timeout::After(timeout))
            .map_err(|source| BrokerError::Close {
                index: self.index,
                source: Box::new(source),
            })
    }
}
