//! Vote intake: the vote record and its status lifecycle, the outbound publisher port, the
//! receive-vote service and the HTTP route in front of it.

pub mod domain;
pub mod publisher;
pub mod router;
pub mod service;

#[cfg(test)]
mod tests;

pub use domain::{format_timestamp, Vote, VoteId, VoteStatus, VoteStatusError};
pub use publisher::{PublishFailure, VotePublisher};
pub use router::{vote_router, VoteAcceptedResponse, VOTE_ROUTE};
pub use service::{
    ReceiveVoteError, ReceiveVoteInput, ReceiveVoteOutput, ReceiveVoteService, RequestContext,
    ValidationError, DEFAULT_PUBLISH_BUDGET, DEFAULT_REQUEST_TIMEOUT,
};
