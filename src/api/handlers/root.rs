use axum::{http::StatusCode, response::IntoResponse};

use crate::GIT_COMMIT_HASH;

// axum handler for /
pub async fn root() -> impl IntoResponse {
    (
        StatusCode::OK,
        format!(
            "{} {} ({})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            GIT_COMMIT_HASH
        ),
    )
}
