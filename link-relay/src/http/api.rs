//! JSON API handlers.
//!
//! Every response is wrapped in [`ApiResponse`]. Service errors map onto
//! status codes here; internal failures are logged and answered with a
//! generic message.

use super::auth::Caller;
use crate::error::{ServiceError, ServiceResult};
use crate::server::LoveRelay;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use link_types::{Ack, ApiResponse, RequestId};
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use std::sync::Arc;

impl ServiceError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::Validation(_) | ServiceError::SelfPair => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Conflict(_) => StatusCode::CONFLICT,
            ServiceError::Authorization(_) => StatusCode::FORBIDDEN,
            ServiceError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ServiceError::Internal(detail) => {
                tracing::error!(error = %detail, "Internal error while handling request");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(ApiResponse::<()>::failure(message))).into_response()
    }
}

/// Response for a failed request; internal errors are counted.
pub(super) fn failure(relay: &LoveRelay, error: ServiceError) -> Response {
    if matches!(error, ServiceError::Internal(_)) {
        relay.metrics().errors_total.fetch_add(1, Ordering::Relaxed);
    }
    error.into_response()
}

fn reply<T: Serialize>(relay: &LoveRelay, result: ServiceResult<T>) -> Response {
    match result {
        Ok(data) => Json(ApiResponse::ok(data)).into_response(),
        Err(e) => failure(relay, e),
    }
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> ServiceResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ServiceError::Validation(rejection.body_text()))
}

/// Body of `POST /pairs/request`.
#[derive(Debug, Deserialize)]
pub struct CreateRequestBody {
    /// Target user id or username.
    pub identifier: String,
}

/// Body of `POST /pairs/respond`.
#[derive(Debug, Deserialize)]
pub struct RespondBody {
    /// Request being answered.
    pub request_id: String,
    /// `true` to accept, `false` to reject.
    pub accept: bool,
}

/// Body of `POST /love/send`.
#[derive(Debug, Deserialize)]
pub struct SendLoveBody {
    /// How long the heart was held, in seconds.
    pub duration_seconds: i64,
}

pub async fn create_request(
    Extension(relay): Extension<Arc<LoveRelay>>,
    Caller(user): Caller,
    payload: Result<Json<CreateRequestBody>, JsonRejection>,
) -> Response {
    let result = match body(payload) {
        Ok(b) => relay.request_pair(user, &b.identifier).await,
        Err(e) => Err(e),
    };
    reply(&relay, result)
}

pub async fn respond(
    Extension(relay): Extension<Arc<LoveRelay>>,
    Caller(user): Caller,
    payload: Result<Json<RespondBody>, JsonRejection>,
) -> Response {
    let result = match body(payload).and_then(|b| {
        b.request_id
            .trim()
            .parse::<RequestId>()
            .map(|id| (id, b.accept))
            .map_err(|_| ServiceError::Validation("invalid request_id".to_string()))
    }) {
        Ok((request_id, accept)) => relay.respond_to_request(request_id, user, accept).await,
        Err(e) => Err(e),
    };
    reply(&relay, result)
}

pub async fn list_requests(
    Extension(relay): Extension<Arc<LoveRelay>>,
    Caller(user): Caller,
) -> Response {
    let result = relay.pairing().list_pending(user).await;
    reply(&relay, result)
}

pub async fn current_pair(
    Extension(relay): Extension<Arc<LoveRelay>>,
    Caller(user): Caller,
) -> Response {
    let result = relay.pairing().active_pair(user).await;
    reply(&relay, result)
}

pub async fn dissolve_current(
    Extension(relay): Extension<Arc<LoveRelay>>,
    Caller(user): Caller,
) -> Response {
    let result = relay
        .pairing()
        .dissolve_current(user)
        .await
        .map(|()| Ack::new("Pair dissolved"));
    reply(&relay, result)
}

pub async fn send_love(
    Extension(relay): Extension<Arc<LoveRelay>>,
    Caller(user): Caller,
    payload: Result<Json<SendLoveBody>, JsonRejection>,
) -> Response {
    let result = match body(payload) {
        Ok(b) => relay.send_love(user, b.duration_seconds).await,
        Err(e) => Err(e),
    };
    reply(&relay, result)
}

pub async fn history(
    Extension(relay): Extension<Arc<LoveRelay>>,
    Caller(user): Caller,
) -> Response {
    let result = relay.events().history(user).await;
    reply(&relay, result)
}

pub async fn stats(Extension(relay): Extension<Arc<LoveRelay>>, Caller(user): Caller) -> Response {
    let result = relay.events().stats(user).await;
    reply(&relay, result)
}
