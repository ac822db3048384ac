use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request};
use axum::response::Response;
use serde_json::Value;
use tokio::time::Instant;

use crate::votes::domain::{Vote, VoteId, VoteStatus};
use crate::votes::publisher::{PublishFailure, VotePublisher};
use crate::votes::service::{ReceiveVoteInput, ReceiveVoteService};
use crate::votes::VOTE_ROUTE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Script {
    Accept,
    Reject,
    Stall,
}

#[derive(Debug, Clone)]
pub(super) struct PublishedVote {
    pub(super) vote_id: VoteId,
    pub(super) participant_id: i64,
    pub(super) session_id: String,
    pub(super) status: VoteStatus,
    pub(super) wire_timestamp: String,
    pub(super) deadline: Instant,
}

/// In-memory publisher recording every attempt and answering per its script.
pub(super) struct RecordingPublisher {
    script: Script,
    calls: Mutex<Vec<PublishedVote>>,
}

impl RecordingPublisher {
    pub(super) fn new(script: Script) -> Self {
        Self {
            script,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(super) fn calls(&self) -> Vec<PublishedVote> {
        self.calls.lock().expect("publisher mutex poisoned").clone()
    }

    pub(super) fn call_count(&self) -> usize {
        self.calls.lock().expect("publisher mutex poisoned").len()
    }
}

#[async_trait]
impl VotePublisher for RecordingPublisher {
    async fn publish_vote(&self, deadline: Instant, vote: &Vote) -> Result<(), PublishFailure> {
        self.calls
            .lock()
            .expect("publisher mutex poisoned")
            .push(PublishedVote {
                vote_id: vote.id(),
                participant_id: vote.participant_id(),
                session_id: vote.session_id().to_string(),
                status: vote.status(),
                wire_timestamp: vote.timestamp_rfc3339(),
                deadline,
            });

        match self.script {
            Script::Accept => Ok(()),
            Script::Reject => Err(PublishFailure::broker("broker connection refused")),
            Script::Stall => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            }
        }
    }
}

pub(super) fn service_with(
    script: Script,
) -> (
    Arc<RecordingPublisher>,
    ReceiveVoteService<RecordingPublisher>,
) {
    let publisher = Arc::new(RecordingPublisher::new(script));
    let service = ReceiveVoteService::new(publisher.clone());
    (publisher, service)
}

pub(super) fn input(participant_id: i64, session_id: &str) -> ReceiveVoteInput {
    ReceiveVoteInput {
        participant_id,
        session_id: session_id.to_string(),
    }
}

pub(super) fn post_vote(body: impl Into<Body>) -> Request<Body> {
    Request::post(VOTE_ROUTE)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body.into())
        .expect("request builds")
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 4096)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
