//! Mapping from provisioning failures to HTTP responses.

use axum::{http::StatusCode, response::Response};
use tracing::{debug, error};

use crate::api::handlers::message;
use crate::provision::ProvisionError;

pub(crate) const ALREADY_TAKEN: &str = "Username / Email already taken";
pub(crate) const CODE_INVALID: &str = "OTP expired or didn't match";
pub(crate) const DELIVERY_FAILED: &str = "Failed to send OTP email";
pub(crate) const INTERNAL: &str = "Internal server error";
pub(crate) const NO_ACCOUNT: &str = "No account found with this username";
pub(crate) const USER_NOT_FOUND: &str = "User not found";

/// Endpoint a failure came from; `NotFound` means different things per endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Operation {
    Signup,
    Signin,
    Verify,
    Domains,
}

impl Operation {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Signup => "signup",
            Self::Signin => "signin",
            Self::Verify => "verify-otp",
            Self::Domains => "domains",
        }
    }
}

pub(crate) fn error_response(operation: Operation, err: &ProvisionError) -> Response {
    let (status, text) = status_and_message(operation, err);

    if status.is_server_error() || matches!(err, ProvisionError::Conflict) {
        error!(
            operation = operation.as_str(),
            kind = err.kind(),
            "request failed: {err:#}"
        );
    } else {
        debug!(operation = operation.as_str(), kind = err.kind(), "request rejected");
    }

    message(status, text)
}

fn status_and_message(operation: Operation, err: &ProvisionError) -> (StatusCode, String) {
    match err {
        ProvisionError::InvalidInput(reason) => {
            (StatusCode::BAD_REQUEST, format!("Incorrect input: {reason}"))
        }
        ProvisionError::AlreadyRegistered => (StatusCode::BAD_REQUEST, ALREADY_TAKEN.to_string()),
        ProvisionError::CodeInvalid => (StatusCode::BAD_REQUEST, CODE_INVALID.to_string()),
        ProvisionError::NotFound if operation == Operation::Signin => {
            (StatusCode::UNAUTHORIZED, NO_ACCOUNT.to_string())
        }
        ProvisionError::NotFound => (StatusCode::NOT_FOUND, USER_NOT_FOUND.to_string()),
        ProvisionError::BadCredential => {
            (StatusCode::UNAUTHORIZED, "Incorrect password".to_string())
        }
        ProvisionError::Conflict => (
            StatusCode::NOT_FOUND,
            "Account is in an inconsistent state".to_string(),
        ),
        ProvisionError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
        ProvisionError::DeliveryFailed(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, DELIVERY_FAILED.to_string())
        }
        ProvisionError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn not_found_depends_on_endpoint() {
        let (status, text) = status_and_message(Operation::Signin, &ProvisionError::NotFound);
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(text, NO_ACCOUNT);

        let (status, text) = status_and_message(Operation::Verify, &ProvisionError::NotFound);
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(text, USER_NOT_FOUND);
    }

    #[test]
    fn conflict_is_not_found_for_clients() {
        let (status, _) = status_and_message(Operation::Verify, &ProvisionError::Conflict);
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn internal_errors_do_not_leak_details() {
        let err = ProvisionError::Internal(anyhow!("connection refused to 10.0.0.7"));
        let (status, text) = status_and_message(Operation::Signup, &err);
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(text, INTERNAL);

        let err = ProvisionError::DeliveryFailed(anyhow!("smtp 550"));
        let (_, text) = status_and_message(Operation::Signin, &err);
        assert_eq!(text, DELIVERY_FAILED);
    }

    #[test]
    fn code_invalid_is_a_client_error() {
        let (status, text) = status_and_message(Operation::Verify, &ProvisionError::CodeInvalid);
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(text, CODE_INVALID);
    }
}
