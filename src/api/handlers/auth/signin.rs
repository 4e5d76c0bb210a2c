use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};
use std::sync::Arc;
use tracing::instrument;

use super::types::SigninRequest;
use super::{Operation, error_response};
use crate::api::handlers::{MISSING_PAYLOAD, MessageResponse, message};
use crate::provision::Provisioner;

pub(crate) const CODE_SENT: &str = "OTP sent to your email";

/// Check the password and email a one-time code.
#[utoipa::path(
    post,
    path = "/signin",
    request_body = SigninRequest,
    responses(
        (status = 200, description = "Code sent", body = MessageResponse),
        (status = 400, description = "Invalid input", body = MessageResponse),
        (status = 401, description = "Unknown subject or wrong password", body = MessageResponse),
        (status = 500, description = "Code could not be delivered", body = MessageResponse)
    ),
    tag = "auth"
)]
#[instrument(skip(provisioner, payload))]
pub async fn signin(
    provisioner: Extension<Arc<Provisioner>>,
    payload: Option<Json<SigninRequest>>,
) -> impl IntoResponse {
    let request: SigninRequest = match payload {
        Some(Json(payload)) => payload,
        None => return message(StatusCode::BAD_REQUEST, MISSING_PAYLOAD),
    };

    match provisioner.signin(&request.subject_id, &request.password).await {
        Ok(()) => message(StatusCode::OK, CODE_SENT),
        Err(err) => error_response(Operation::Signin, &err),
    }
}
