use async_trait::async_trait;
use tokio::time::Instant;

use super::domain::Vote;

/// Outbound port handing an accepted vote to the message broker.
///
/// Implementations must give up once `deadline` passes; the receive-vote service enforces the
/// same deadline around the call as well.
#[async_trait]
pub trait VotePublisher: Send + Sync {
    async fn publish_vote(&self, deadline: Instant, vote: &Vote) -> Result<(), PublishFailure>;
}

/// Why a hand-off did not complete.
#[derive(Debug, thiserror::Error)]
pub enum PublishFailure {
    #[error("publish deadline exceeded")]
    DeadlineExceeded,
    #[error("failed to encode vote message: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("broker hand-off failed: {0}")]
    Broker(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("publisher is closed")]
    Closed,
}

impl PublishFailure {
    pub fn broker<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Broker(error.into())
    }
}
