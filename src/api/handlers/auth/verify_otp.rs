use axum::{
    Json,
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{debug, instrument};

use super::types::{VerifyOtpRequest, VerifyOtpResponse};
use super::{Operation, error_response};
use crate::api::handlers::{MISSING_PAYLOAD, MessageResponse, message};
use crate::provision::Provisioner;

/// Confirm a code; completes signup (promotion) or signin and returns a token.
#[utoipa::path(
    post,
    path = "/verify-otp",
    request_body = VerifyOtpRequest,
    responses(
        (status = 200, description = "Code confirmed", body = VerifyOtpResponse),
        (status = 400, description = "Code expired or did not match", body = MessageResponse),
        (status = 404, description = "No account for this subject", body = MessageResponse),
        (status = 500, description = "Internal error", body = MessageResponse)
    ),
    tag = "auth"
)]
#[instrument(skip(provisioner, payload))]
pub async fn verify_otp(
    provisioner: Extension<Arc<Provisioner>>,
    payload: Option<Json<VerifyOtpRequest>>,
) -> Response {
    let request: VerifyOtpRequest = match payload {
        Some(Json(payload)) => payload,
        None => return message(StatusCode::BAD_REQUEST, MISSING_PAYLOAD),
    };

    match provisioner.verify(&request.subject_id, &request.code).await {
        Ok(verified) => {
            debug!(path = ?verified.path, "code confirmed");
            (
                StatusCode::OK,
                Json(VerifyOtpResponse {
                    token: verified.token,
                    identity: verified.identity,
                }),
            )
                .into_response()
        }
        Err(err) => error_response(Operation::Verify, &err),
    }
}
