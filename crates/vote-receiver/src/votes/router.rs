use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::post,
    Extension, Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tokio::time::timeout_at;
use tracing::{info, warn};

use super::domain::{format_timestamp, VoteId};
use super::publisher::VotePublisher;
use super::service::{
    ReceiveVoteError, ReceiveVoteInput, ReceiveVoteService, RequestContext,
    DEFAULT_REQUEST_TIMEOUT,
};

pub const VOTE_ROUTE: &str = "/api/v1/vote";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteAcceptedResponse {
    pub message: &'static str,
    pub vote_id: VoteId,
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy)]
struct RequestBudget(Duration);

/// Router builder exposing the vote intake endpoint. Every request runs under
/// `request_timeout`, from which the service derives its publish budget.
pub fn vote_router<P>(service: Arc<ReceiveVoteService<P>>, request_timeout: Duration) -> Router
where
    P: VotePublisher + 'static,
{
    Router::new()
        .route(VOTE_ROUTE, post(receive_vote_handler::<P>))
        .route_layer(middleware::from_fn_with_state(
            RequestBudget(request_timeout),
            enforce_request_deadline,
        ))
        .with_state(service)
}

async fn enforce_request_deadline(
    State(RequestBudget(budget)): State<RequestBudget>,
    mut request: Request,
    next: Next,
) -> Response {
    let context = RequestContext::with_timeout(budget);
    request.extensions_mut().insert(context);

    match timeout_at(context.deadline(), next.run(request)).await {
        Ok(response) => response,
        Err(_) => {
            warn!(?budget, "request deadline exceeded");
            error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "request deadline exceeded",
                format!("no response within {} ms", budget.as_millis()),
            )
        }
    }
}

pub(crate) async fn receive_vote_handler<P>(
    State(service): State<Arc<ReceiveVoteService<P>>>,
    context: Option<Extension<RequestContext>>,
    payload: Result<Json<ReceiveVoteInput>, JsonRejection>,
) -> Response
where
    P: VotePublisher + 'static,
{
    let started = std::time::Instant::now();

    let Json(input) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            record_outcome("invalid");
            return error_response(
                StatusCode::BAD_REQUEST,
                "invalid payload",
                rejection.body_text(),
            );
        }
    };

    info!(
        participant_id = input.participant_id,
        session_id = %input.session_id,
        "vote request received"
    );

    let context = context
        .map(|Extension(context)| context)
        .unwrap_or_else(|| RequestContext::with_timeout(DEFAULT_REQUEST_TIMEOUT));

    match service.execute(context, input).await {
        Ok(output) => {
            record_outcome("accepted");
            let body = VoteAcceptedResponse {
                message: "vote received",
                vote_id: output.vote_id,
                timestamp: format_timestamp(output.timestamp),
            };
            (StatusCode::ACCEPTED, Json(body)).into_response()
        }
        Err(ReceiveVoteError::Validation(error)) => {
            record_outcome("invalid");
            error_response(StatusCode::BAD_REQUEST, "invalid vote", error.to_string())
        }
        Err(error @ ReceiveVoteError::Publish { .. }) => {
            record_outcome("failed");
            warn!(elapsed = ?started.elapsed(), error = %error, "vote not accepted");
            error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "failed to process vote",
                error.to_string(),
            )
        }
        Err(error @ ReceiveVoteError::Lifecycle(_)) => {
            record_outcome("failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to process vote",
                error.to_string(),
            )
        }
    }
}

fn record_outcome(outcome: &'static str) {
    metrics::counter!("votes_received_total", "outcome" => outcome).increment(1);
}

fn error_response(status: StatusCode, error: &str, details: String) -> Response {
    let payload = json!({
        "error": error,
        "details": details,
    });
    (status, Json(payload)).into_response()
}
