use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{BaseProducer, Producer};
use rdkafka::util::Timeout;
use tokio::time::Instant;
use tracing::{info, warn};

use super::BrokerError;
use crate::config::{HealthPolicy, KafkaConfig};

/// Why a single broker failed verification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    #[error("broker {broker} did not answer within {timeout:?}")]
    Timeout { broker: String, timeout: Duration },
    #[error("broker {broker} unreachable: {reason}")]
    Unreachable { broker: String, reason: String },
    #[error("broker {broker} cannot serve topic '{topic}': {reason}")]
    Topic {
        broker: String,
        topic: String,
        reason: String,
    },
    #[error("no brokers configured")]
    NoBrokers,
}

/// Connects to one broker and reads the partition metadata of `topic`.
#[async_trait]
pub trait BrokerProbe: Send + Sync {
    /// Returns the number of partitions the broker reports for `topic`.
    async fn probe(&self, broker: &str, topic: &str, timeout: Duration)
        -> Result<usize, ProbeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthCheckSettings {
    pub policy: HealthPolicy,
    pub broker_timeout: Duration,
    pub overall_timeout: Duration,
}

impl From<&KafkaConfig> for HealthCheckSettings {
    fn from(config: &KafkaConfig) -> Self {
        Self {
            policy: config.health_policy,
            broker_timeout: config.broker_check_timeout,
            overall_timeout: config.health_check_timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerHealth {
    pub broker: String,
    pub result: Result<usize, ProbeError>,
}

impl BrokerHealth {
    pub fn is_healthy(&self) -> bool {
        self.result.is_ok()
    }
}

/// Outcome of probing every configured broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub topic: String,
    pub brokers: Vec<BrokerHealth>,
}

impl HealthReport {
    pub fn healthy(&self) -> usize {
        self.brokers.iter().filter(|b| b.is_healthy()).count()
    }

    pub fn total(&self) -> usize {
        self.brokers.len()
    }

    /// Some, but not all, brokers answered.
    pub fn is_degraded(&self) -> bool {
        let healthy = self.healthy();
        healthy > 0 && healthy < self.total()
    }

    fn last_error(&self) -> ProbeError {
        self.brokers
            .iter()
            .rev()
            .find_map(|b| b.result.as_ref().err().cloned())
            .unwrap_or(ProbeError::NoBrokers)
    }

    /// Applies `policy` to the report. A degraded pool is accepted under
    /// [`HealthPolicy::AnyBroker`] and only logged.
    pub fn into_verdict(self, policy: HealthPolicy) -> Result<HealthReport, BrokerError> {
        let healthy = self.healthy();
        let total = self.total();

        let acceptable = match policy {
            HealthPolicy::AnyBroker => healthy > 0,
            HealthPolicy::AllBrokers => total > 0 && healthy == total,
        };
        if !acceptable {
            return Err(BrokerError::Unavailable {
                source: self.last_error(),
                topic: self.topic,
                healthy,
                total,
            });
        }

        if self.is_degraded() {
            warn!(
                topic = %self.topic,
                healthy,
                total,
                "running in degraded mode, some brokers are unreachable"
            );
        }
        info!(topic = %self.topic, healthy, total, "broker health check passed");
        Ok(self)
    }
}

/// Probes every broker in order. Each probe is bounded by `broker_timeout` and by what is left
/// of `deadline`; a failing broker is recorded and the check moves on.
pub async fn check_brokers(
    probe: &dyn BrokerProbe,
    brokers: &[String],
    topic: &str,
    broker_timeout: Duration,
    deadline: Instant,
) -> HealthReport {
    let total = brokers.len();
    let mut results = Vec::with_capacity(total);

    for (position, broker) in brokers.iter().enumerate() {
        info!(broker = %broker, "checking broker {}/{}", position + 1, total);

        let budget = broker_timeout.min(deadline.saturating_duration_since(Instant::now()));
        let result = match tokio::time::timeout(budget, probe.probe(broker, topic, budget)).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout {
                broker: broker.clone(),
                timeout: budget,
            }),
        };

        match &result {
            Ok(partitions) => info!(broker = %broker, partitions, "broker healthy"),
            Err(err) => warn!(broker = %broker, error = %err, "broker check failed"),
        }

        results.push(BrokerHealth {
            broker: broker.clone(),
            result,
        });
    }

    HealthReport {
        topic: topic.to_string(),
        brokers: results,
    }
}

/// Probe backed by a throwaway rdkafka client per broker.
#[derive(Debug, Clone, Copy, Default)]
pub struct KafkaMetadataProbe;

#[async_trait]
impl BrokerProbe for KafkaMetadataProbe {
    async fn probe(
        &self,
        broker: &str,
        topic: &str,
        timeout: Duration,
    ) -> Result<usize, ProbeError> {
        let broker = broker.to_string();
        let topic = topic.to_string();
        let task_broker = broker.clone();

        tokio::task::spawn_blocking(move || fetch_partitions(&task_broker, &topic, timeout))
            .await
            .map_err(|err| ProbeError::Unreachable {
                broker,
                reason: err.to_string(),
            })?
    }
}

fn fetch_partitions(broker: &str, topic: &str, timeout: Duration) -> Result<usize, ProbeError> {
    let unreachable = |reason: String| ProbeError::Unreachable {
        broker: broker.to_string(),
        reason,
    };
    let topic_error = |reason: String| ProbeError::Topic {
        broker: broker.to_string(),
        topic: topic.to_string(),
        reason,
    };

    let timeout_ms = timeout.as_millis().max(10).to_string();
    let client: BaseProducer = ClientConfig::new()
        .set("bootstrap.servers", broker)
        .set("client.id", "vote-receiver-health")
        .set("socket.timeout.ms", timeout_ms.as_str())
        .create()
        .map_err(|err| unreachable(err.to_string()))?;

    let metadata = client
        .client()
        .fetch_metadata(Some(topic), Timeout::After(timeout))
        .map_err(|err| unreachable(err.to_string()))?;

    let entry = metadata
        .topics()
        .iter()
        .find(|entry| entry.name() == topic)
        .ok_or_else(|| topic_error("topic missing from metadata".to_string()))?;

    if let Some(code) = entry.error() {
        return Err(topic_error(format!("{code:?}")));
    }
    if entry.partitions().is_empty() {
        return Err(topic_error("no partitions".to_string()));
    }
    Ok(entry.partitions().len())
}
