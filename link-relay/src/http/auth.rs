//! Caller identity.
//!
//! Authentication happens upstream; the relay only needs to learn which
//! user a request belongs to. An [`IdentityResolver`] extracts a [`UserId`]
//! from the request head and the [`Caller`] extractor checks that the user
//! exists. Anything else is answered with 401.

use crate::error::ServiceError;
use crate::server::LoveRelay;
use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use link_types::{ApiResponse, UserId};
use std::sync::Arc;

/// Resolves the calling user from a request head.
pub trait IdentityResolver: Send + Sync {
    /// The caller's id, or `None` if the request is unauthenticated.
    fn resolve(&self, parts: &Parts) -> Option<UserId>;
}

/// Reads the caller's id from a header set by the upstream gateway.
#[derive(Debug, Clone)]
pub struct HeaderIdentity {
    header: String,
}

impl HeaderIdentity {
    /// Resolve identities from `header`.
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
        }
    }
}

impl IdentityResolver for HeaderIdentity {
    fn resolve(&self, parts: &Parts) -> Option<UserId> {
        parts
            .headers
            .get(self.header.as_str())?
            .to_str()
            .ok()?
            .trim()
            .parse()
            .ok()
    }
}

/// The authenticated user making a request.
#[derive(Debug, Clone, Copy)]
pub struct Caller(pub UserId);

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ApiResponse::<()>::failure("unauthorized")),
    )
        .into_response()
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Extension(relay) = Extension::<Arc<LoveRelay>>::from_request_parts(parts, state)
            .await
            .map_err(IntoResponse::into_response)?;

        let Some(user) = relay.identity().resolve(parts) else {
            tracing::debug!(path = %parts.uri.path(), "Request without a valid identity");
            return Err(unauthorized());
        };

        match relay.store().get_user(&user).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                tracing::debug!(user = %user, "Identity names an unknown user");
                return Err(unauthorized());
            }
            Err(e) => return Err(super::api::failure(&relay, ServiceError::from(e))),
        }

        relay.check_global().map_err(IntoResponse::into_response)?;
        Ok(Caller(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts_with(header: &str, value: &str) -> Parts {
        Request::builder()
            .header(header, value)
            .body(())
            .unwrap()
            .into_parts()
            .0
    }

    #[test]
    fn header_identity_parses_uuid() {
        let id = UserId::new();
        let resolver = HeaderIdentity::new("x-user-id");

        assert_eq!(resolver.resolve(&parts_with("x-user-id", &id.to_string())), Some(id));
    }

    #[test]
    fn header_identity_rejects_garbage_and_missing() {
        let resolver = HeaderIdentity::new("x-user-id");

        assert_eq!(resolver.resolve(&parts_with("x-user-id", "alice")), None);
        assert_eq!(
            resolver.resolve(&parts_with("x-other", &UserId::new().to_string())),
            None
        );
    }

    #[test]
    fn header_name_is_configurable() {
        let id = UserId::new();
        let resolver = HeaderIdentity::new("x-forwarded-user");
        assert_eq!(
            resolver.resolve(&parts_with("X-Forwarded-User", &id.to_string())),
            Some(id)
        );
    }
}
