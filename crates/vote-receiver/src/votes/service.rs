use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use super::domain::{Vote, VoteId, VoteStatus, VoteStatusError};
use super::publisher::{PublishFailure, VotePublisher};

/// Default cap on the broker hand-off, kept well below the request deadline.
pub const DEFAULT_PUBLISH_BUDGET: Duration = Duration::from_millis(200);
/// Default deadline for an inbound vote request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Deadline carried by an inbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestContext {
    deadline: Instant,
}

impl RequestContext {
    pub fn with_deadline(deadline: Instant) -> Self {
        Self { deadline }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Deadline for the broker hand-off: the request deadline or `budget` from now, whichever
    /// comes first.
    pub fn publish_deadline(&self, budget: Duration) -> Instant {
        self.deadline.min(Instant::now() + budget)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveVoteInput {
    #[serde(alias = "participanteId")]
    pub participant_id: i64,
    pub session_id: String,
}

impl ReceiveVoteInput {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.participant_id <= 0 {
            return Err(ValidationError::NonPositiveParticipant);
        }
        if self.session_id.is_empty() {
            return Err(ValidationError::EmptySession);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveVoteOutput {
    pub vote_id: VoteId,
    pub timestamp: DateTime<Utc>,
    pub status: VoteStatus,
}

/// Service validating vote submissions and handing them to the publisher exactly once.
pub struct ReceiveVoteService<P> {
    publisher: Arc<P>,
    publish_budget: Duration,
}

impl<P> ReceiveVoteService<P>
where
    P: VotePublisher + 'static,
{
    pub fn new(publisher: Arc<P>) -> Self {
        Self {
            publisher,
            publish_budget: DEFAULT_PUBLISH_BUDGET,
        }
    }

    pub fn with_publish_budget(mut self, budget: Duration) -> Self {
        self.publish_budget = budget;
        self
    }

    pub fn publish_budget(&self) -> Duration {
        self.publish_budget
    }

    /// Validate, record and publish one vote.
    pub async fn execute(
        &self,
        context: RequestContext,
        input: ReceiveVoteInput,
    ) -> Result<ReceiveVoteOutput, ReceiveVoteError> {
        input.validate()?;

        info!(
            participant_id = input.participant_id,
            session_id = %input.session_id,
            "recording vote"
        );
        let mut vote = Vote::new(input.participant_id, input.session_id);

        self.hand_off(&context, &mut vote).await?;

        Ok(ReceiveVoteOutput {
            vote_id: vote.id(),
            timestamp: vote.timestamp(),
            status: vote.status(),
        })
    }

    /// Single publish attempt under the capped deadline, followed by the one status change.
    pub(crate) async fn hand_off(
        &self,
        context: &RequestContext,
        vote: &mut Vote,
    ) -> Result<(), ReceiveVoteError> {
        if vote.is_processed() {
            return Err(VoteStatusError::InvalidTransition {
                from: vote.status(),
                to: VoteStatus::Sent,
            }
            .into());
        }

        let deadline = context.publish_deadline(self.publish_budget);
        let attempt = match timeout_at(deadline, self.publisher.publish_vote(deadline, vote)).await
        {
            Ok(result) => result,
            Err(_) => Err(PublishFailure::DeadlineExceeded),
        };

        match attempt {
            Ok(()) => {
                vote.mark_sent()?;
                debug!(vote = %vote, "vote handed off");
                Ok(())
            }
            Err(source) => {
                vote.mark_failed()?;
                warn!(vote = %vote, error = %source, "vote hand-off failed");
                Err(ReceiveVoteError::Publish {
                    vote_id: vote.id(),
                    source,
                })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("participant id must be positive")]
    NonPositiveParticipant,
    #[error("session id must not be empty")]
    EmptySession,
}

/// Error raised by the receive-vote service.
#[derive(Debug, thiserror::Error)]
pub enum ReceiveVoteError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("failed to publish vote {vote_id}: {source}")]
    Publish {
        vote_id: VoteId,
        #[source]
        source: PublishFailure,
    },
    #[error(transparent)]
    Lifecycle(#[from] VoteStatusError),
}
