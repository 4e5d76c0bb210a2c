//! Placement hierarchy visible to the caller, gated by a session token.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::instrument;

use super::auth::{Operation, error_response};
use super::{MessageResponse, message};
use crate::provision::{Provisioner, directory::Domains};

/// Pull the token out of `Authorization: Bearer <token>`.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

#[utoipa::path(
    get,
    path = "/domains",
    params(
        ("Authorization" = String, Header, description = "Bearer session token from /verify-otp")
    ),
    responses(
        (status = 200, description = "Selectable districts, sub-districts and facilities", body = Domains),
        (status = 401, description = "Missing or invalid token", body = MessageResponse),
        (status = 404, description = "Identity no longer exists", body = MessageResponse),
        (status = 500, description = "Internal error", body = MessageResponse)
    ),
    tag = "domains"
)]
#[instrument(skip(headers, provisioner))]
pub async fn domains(headers: HeaderMap, provisioner: Extension<Arc<Provisioner>>) -> Response {
    let Some(token) = bearer_token(&headers) else {
        return message(StatusCode::UNAUTHORIZED, "Unauthorized");
    };

    match provisioner.domains(token).await {
        Ok(domains) => (StatusCode::OK, Json(domains)).into_response(),
        Err(err) => error_response(Operation::Domains, &err),
    }
}
