use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Renders a vote timestamp with second precision and a `Z` suffix.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Globally unique vote identifier, assigned once when the vote is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoteId(Uuid);

impl VoteId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// First eight hex digits, enough to correlate log lines.
    pub fn short(&self) -> String {
        let mut simple = self.0.simple().to_string();
        simple.truncate(8);
        simple
    }
}

impl fmt::Display for VoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Lifecycle of a vote while its request is being handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoteStatus {
    Received,
    Sent,
    Failed,
}

impl VoteStatus {
    pub fn label(self) -> &'static str {
        match self {
            VoteStatus::Received => "RECEIVED",
            VoteStatus::Sent => "SENT",
            VoteStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, VoteStatus::Sent | VoteStatus::Failed)
    }
}

impl fmt::Display for VoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for VoteStatus {
    type Err = VoteStatusError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "RECEIVED" => Ok(VoteStatus::Received),
            "SENT" => Ok(VoteStatus::Sent),
            "FAILED" => Ok(VoteStatus::Failed),
            _ => Err(VoteStatusError::InvalidStatus(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VoteStatusError {
    #[error("invalid vote status: {0}")]
    InvalidStatus(String),
    #[error("vote status cannot move from {from} to {to}")]
    InvalidTransition { from: VoteStatus, to: VoteStatus },
}

/// A single submitted vote. Identity fields are fixed at construction; only the status moves,
/// and only once, from `Received` to either `Sent` or `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vote {
    id: VoteId,
    participant_id: i64,
    session_id: String,
    timestamp: DateTime<Utc>,
    status: VoteStatus,
}

impl Vote {
    pub fn new(participant_id: i64, session_id: impl Into<String>) -> Self {
        Self {
            id: VoteId::generate(),
            participant_id,
            session_id: session_id.into(),
            timestamp: Utc::now(),
            status: VoteStatus::Received,
        }
    }

    pub fn id(&self) -> VoteId {
        self.id
    }

    pub fn participant_id(&self) -> i64 {
        self.participant_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// RFC 3339 rendering used on the wire, e.g. `2025-03-01T12:00:00Z`.
    pub fn timestamp_rfc3339(&self) -> String {
        format_timestamp(self.timestamp)
    }

    pub fn status(&self) -> VoteStatus {
        self.status
    }

    pub fn is_processed(&self) -> bool {
        self.status.is_terminal()
    }

    /// Applies a status given by label. Unknown labels and illegal moves leave the vote as-is.
    pub fn set_status(&mut self, label: &str) -> Result<(), VoteStatusError> {
        let next = label.parse()?;
        self.transition(next)
    }

    pub fn transition(&mut self, next: VoteStatus) -> Result<(), VoteStatusError> {
        if self.status.is_terminal() || !next.is_terminal() {
            return Err(VoteStatusError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn mark_sent(&mut self) -> Result<(), VoteStatusError> {
        self.transition(VoteStatus::Sent)
    }

    pub fn mark_failed(&mut self) -> Result<(), VoteStatusError> {
        self.transition(VoteStatus::Failed)
    }
}

impl fmt::Display for Vote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Vote[id={}, participant={}, status={}]",
            self.id, self.participant_id, self.status
        )
    }
}
