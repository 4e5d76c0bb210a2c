use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};
use std::sync::Arc;
use tracing::instrument;

use super::types::SignupRequest;
use super::{Operation, error_response};
use crate::api::handlers::{MISSING_PAYLOAD, MessageResponse, message};
use crate::provision::Provisioner;

pub(crate) const CODE_SENT: &str = "OTP sent successfully to your email";

/// Stage a registration and email a one-time code.
#[utoipa::path(
    post,
    path = "/signup",
    request_body = SignupRequest,
    responses(
        (status = 200, description = "Code sent", body = MessageResponse),
        (status = 400, description = "Invalid input or subject/email already taken", body = MessageResponse),
        (status = 500, description = "Code could not be delivered", body = MessageResponse)
    ),
    tag = "auth"
)]
#[instrument(skip(provisioner, payload))]
pub async fn signup(
    provisioner: Extension<Arc<Provisioner>>,
    payload: Option<Json<SignupRequest>>,
) -> impl IntoResponse {
    let request: SignupRequest = match payload {
        Some(Json(payload)) => payload,
        None => return message(StatusCode::BAD_REQUEST, MISSING_PAYLOAD),
    };

    match provisioner.signup(request.into()).await {
        Ok(()) => message(StatusCode::OK, CODE_SENT),
        Err(err) => error_response(Operation::Signup, &err),
    }
}
