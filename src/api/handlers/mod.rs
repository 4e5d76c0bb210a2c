//! Route handlers.
//!
//! Every handler takes the shared `Provisioner` as an `Extension` and answers
//! with a JSON body; failures always use the `{message}` shape.

pub mod auth;
pub mod domains;
pub mod health;
pub mod root;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub(crate) const MISSING_PAYLOAD: &str = "Missing payload";

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MessageResponse {
    pub message: String,
}

/// `{message}` body with the given status.
pub(crate) fn message(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(MessageResponse {
            message: message.into(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn message_renders_json_body() -> Result<()> {
        let response = message(StatusCode::BAD_REQUEST, MISSING_PAYLOAD);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        let decoded: MessageResponse = serde_json::from_slice(&body)?;
        assert_eq!(decoded.message, "Missing payload");
        Ok(())
    }
}
