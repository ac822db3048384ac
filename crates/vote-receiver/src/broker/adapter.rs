use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info};

use super::delivery::DeliveryReporter;
use super::handle::{KafkaProducerHandle, OutboundMessage, ProducerHandle};
use super::health::{
    check_brokers, BrokerProbe, HealthCheckSettings, HealthReport, KafkaMetadataProbe,
};
use super::pool::ProducerPool;
use super::BrokerError;
use crate::config::KafkaConfig;
use crate::votes::{PublishFailure, Vote, VotePublisher};

/// Record written to the votes topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteMessage {
    pub id: String,
    pub participant_id: i64,
    pub session_id: String,
    pub timestamp: String,
}

impl From<&Vote> for VoteMessage {
    fn from(vote: &Vote) -> Self {
        Self {
            id: vote.id().to_string(),
            participant_id: vote.participant_id(),
            session_id: vote.session_id().to_string(),
            timestamp: vote.timestamp_rfc3339(),
        }
    }
}

/// The subset of broker configuration the publisher itself needs.
#[derive(Debug, Clone)]
pub struct PublisherSettings {
    pub brokers: Vec<String>,
    pub topic: String,
    pub pool_size: usize,
    pub health: HealthCheckSettings,
    pub close_timeout: Duration,
}

impl From<&KafkaConfig> for PublisherSettings {
    fn from(config: &KafkaConfig) -> Self {
        Self {
            brokers: config.brokers.clone(),
            topic: config.topic.clone(),
            pool_size: config.pool_size,
            health: HealthCheckSettings::from(config),
            close_timeout: config.close_timeout,
        }
    }
}

/// [`VotePublisher`] writing votes to a topic through a round-robin pool of producer handles.
pub struct BrokerPublisher<H> {
    pool: ProducerPool<H>,
    topic: String,
    brokers: Vec<String>,
    probe: Arc<dyn BrokerProbe>,
    health: HealthCheckSettings,
    close_timeout: Duration,
    closed: AtomicBool,
}

impl BrokerPublisher<KafkaProducerHandle> {
    /// Opens `pool_size` rdkafka producers and verifies the brokers before returning.
    pub async fn connect(
        config: &KafkaConfig,
        reporter: DeliveryReporter,
    ) -> Result<Self, BrokerError> {
        Self::establish(
            PublisherSettings::from(config),
            Arc::new(KafkaMetadataProbe),
            |index| KafkaProducerHandle::create(index, config, reporter.clone()),
        )
        .await
    }
}

impl<H> BrokerPublisher<H>
where
    H: ProducerHandle,
{
    /// Builds the pool with `factory` and runs the startup health check. On any failure every
    /// handle opened so far is closed before the error is returned.
    pub async fn establish<F>(
        settings: PublisherSettings,
        probe: Arc<dyn BrokerProbe>,
        mut factory: F,
    ) -> Result<Self, BrokerError>
    where
        F: FnMut(usize) -> Result<H, BrokerError>,
    {
        if settings.brokers.is_empty() {
            return Err(BrokerError::Config("no brokers configured".to_string()));
        }
        if settings.pool_size == 0 {
            return Err(BrokerError::Config(
                "pool size must be at least one".to_string(),
            ));
        }

        let mut handles = Vec::with_capacity(settings.pool_size);
        for index in 0..settings.pool_size {
            match factory(index) {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    release(&handles, settings.close_timeout);
                    return Err(err);
                }
            }
        }
        info!(
            pool_size = handles.len(),
            topic = %settings.topic,
            brokers = ?settings.brokers,
            "producer pool created"
        );

        let publisher = Self {
            pool: ProducerPool::new(handles)?,
            topic: settings.topic,
            brokers: settings.brokers,
            probe,
            health: settings.health,
            close_timeout: settings.close_timeout,
            closed: AtomicBool::new(false),
        };

        let deadline = Instant::now() + publisher.health.overall_timeout;
        if let Err(err) = publisher.health_check(deadline).await {
            publisher.close().ok();
            return Err(err);
        }
        Ok(publisher)
    }

    /// Probes every configured broker and applies the configured health policy.
    pub async fn health_check(&self, deadline: Instant) -> Result<HealthReport, BrokerError> {
        check_brokers(
            self.probe.as_ref(),
            &self.brokers,
            &self.topic,
            self.health.broker_timeout,
            deadline,
        )
        .await
        .into_verdict(self.health.policy)
    }

    pub fn pool_size(&self) -> usize {
        self.pool.len()
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Closes every pooled handle. Only the first call does any work; later calls return
    /// [`BrokerError::AlreadyClosed`].
    pub fn close(&self) -> Result<(), BrokerError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(BrokerError::AlreadyClosed);
        }
        self.pool.close_all(self.close_timeout)
    }
}

fn release<H: ProducerHandle>(handles: &[H], timeout: Duration) {
    for handle in handles {
        handle.close(timeout).ok();
    }
}

#[async_trait]
impl<H> VotePublisher for BrokerPublisher<H>
where
    H: ProducerHandle,
{
    async fn publish_vote(&self, deadline: Instant, vote: &Vote) -> Result<(), PublishFailure> {
        if self.is_closed() {
            return Err(PublishFailure::Closed);
        }

        let slot = self.pool.acquire();
        let payload = serde_json::to_vec(&VoteMessage::from(vote))?;
        debug!(slot = slot.index, vote = %vote.id().short(), "publishing vote");

        let message = OutboundMessage {
            topic: &self.topic,
            key: vote.session_id(),
            payload: &payload,
        };
        timeout_at(deadline, slot.handle.send(message, deadline))
            .await
            .map_err(|_| PublishFailure::DeadlineExceeded)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::health::ProbeError;
    use crate::config::HealthPolicy;
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    struct Sent {
        handle: usize,
        topic: String,
        key: String,
        payload: serde_json::Value,
    }

    #[derive(Default)]
    struct Journal {
        sent: Mutex<Vec<Sent>>,
        closed: Mutex<Vec<usize>>,
    }

    struct FakeHandle {
        index: usize,
        journal: Arc<Journal>,
        stall: bool,
    }

    #[async_trait]
    impl ProducerHandle for FakeHandle {
        async fn send(
            &self,
            message: OutboundMessage<'_>,
            _deadline: Instant,
        ) -> Result<(), PublishFailure> {
            if self.stall {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            self.journal.sent.lock().expect("journal lock").push(Sent {
                handle: self.index,
                topic: message.topic.to_string(),
                key: message.key.to_string(),
                payload: serde_json::from_slice(message.payload).expect("payload is json"),
            });
            Ok(())
        }

        fn close(&self, _timeout: Duration) -> Result<(), BrokerError> {
            self.journal.closed.lock().expect("journal lock").push(self.index);
            Ok(())
        }
    }

    struct FixedProbe {
        reachable: bool,
    }

    #[async_trait]
    impl BrokerProbe for FixedProbe {
        async fn probe(
            &self,
            broker: &str,
            _topic: &str,
            _timeout: Duration,
        ) -> Result<usize, ProbeError> {
            if self.reachable {
                Ok(3)
            } else {
                Err(ProbeError::Unreachable {
                    broker: broker.to_string(),
                    reason: "connection refused".to_string(),
                })
            }
        }
    }

    fn settings(pool_size: usize) -> PublisherSettings {
        PublisherSettings {
            brokers: vec!["kafka-1:9092".to_string(), "kafka-2:9092".to_string()],
            topic: "votos".to_string(),
            pool_size,
            health: HealthCheckSettings {
                policy: HealthPolicy::AnyBroker,
                broker_timeout: Duration::from_secs(5),
                overall_timeout: Duration::from_secs(30),
            },
            close_timeout: Duration::from_secs(1),
        }
    }

    async fn publisher(
        pool_size: usize,
        reachable: bool,
        stall: bool,
    ) -> (Arc<Journal>, Result<BrokerPublisher<FakeHandle>, BrokerError>) {
        let journal = Arc::new(Journal::default());
        let factory_journal = journal.clone();
        let result = BrokerPublisher::establish(
            settings(pool_size),
            Arc::new(FixedProbe { reachable }),
            move |index| {
                Ok(FakeHandle {
                    index,
                    journal: factory_journal.clone(),
                    stall,
                })
            },
        )
        .await;
        (journal, result)
    }

    #[tokio::test]
    async fn publishes_keyed_messages_round_robin() {
        let (journal, publisher) = publisher(3, true, false).await;
        let publisher = publisher.expect("publisher connects");
        let deadline = Instant::now() + Duration::from_secs(1);

        for session in ["s-1", "s-2", "s-3", "s-4"] {
            let vote = Vote::new(7, session);
            publisher
                .publish_vote(deadline, &vote)
                .await
                .expect("vote published");
        }

        let sent = journal.sent.lock().expect("journal lock").clone();
        let handles: Vec<usize> = sent.iter().map(|s| s.handle).collect();
        assert_eq!(handles, vec![0, 1, 2, 0]);
        assert!(sent.iter().all(|s| s.topic == "votos"));
        assert_eq!(sent[1].key, "s-2");
        assert_eq!(sent[1].payload["participantId"], 7);
        assert_eq!(sent[1].payload["sessionId"], "s-2");
        assert!(sent[1].payload["id"].as_str().is_some());
        assert!(sent[1].payload["timestamp"]
            .as_str()
            .is_some_and(|ts| ts.ends_with('Z')));
    }

    #[tokio::test]
    async fn failed_health_check_releases_every_handle() {
        let (journal, publisher) = publisher(3, false, false).await;

        assert!(matches!(
            publisher,
            Err(BrokerError::Unavailable { healthy: 0, total: 2, .. })
        ));
        let mut closed = journal.closed.lock().expect("journal lock").clone();
        closed.sort_unstable();
        assert_eq!(closed, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn factory_failure_closes_handles_opened_so_far() {
        let journal = Arc::new(Journal::default());
        let factory_journal = journal.clone();

        let result = BrokerPublisher::establish(
            settings(3),
            Arc::new(FixedProbe { reachable: true }),
            move |index| {
                if index == 2 {
                    return Err(BrokerError::Config("bad client".to_string()));
                }
                Ok(FakeHandle {
                    index,
                    journal: factory_journal.clone(),
                    stall: false,
                })
            },
        )
        .await;

        assert!(matches!(result, Err(BrokerError::Config(_))));
        assert_eq!(*journal.closed.lock().expect("journal lock"), vec![0, 1]);
    }

    #[tokio::test]
    async fn zero_pool_size_is_a_configuration_error() {
        let (_, publisher) = publisher(0, true, false).await;
        assert!(matches!(publisher, Err(BrokerError::Config(_))));
    }

    #[tokio::test]
    async fn close_runs_once_and_blocks_further_publishing() {
        let (journal, publisher) = publisher(2, true, false).await;
        let publisher = publisher.expect("publisher connects");

        publisher.close().expect("first close succeeds");
        assert!(matches!(publisher.close(), Err(BrokerError::AlreadyClosed)));
        assert_eq!(journal.closed.lock().expect("journal lock").len(), 2);

        let vote = Vote::new(1, "s-1");
        let result = publisher
            .publish_vote(Instant::now() + Duration::from_secs(1), &vote)
            .await;
        assert!(matches!(result, Err(PublishFailure::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_handle_is_bounded_by_the_deadline() {
        let (_, publisher) = publisher(1, true, true).await;
        let publisher = publisher.expect("publisher connects");

        let vote = Vote::new(1, "s-1");
        let result = publisher
            .publish_vote(Instant::now() + Duration::from_millis(200), &vote)
            .await;

        assert!(matches!(result, Err(PublishFailure::DeadlineExceeded)));
    }
}
