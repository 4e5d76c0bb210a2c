use thiserror::Error;

/// Failure kinds surfaced by signup, signin, verify and token resolution.
///
/// `CodeInvalid` deliberately covers a wrong, expired and never-issued code.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("subject id or email already registered")]
    AlreadyRegistered,
    #[error("not found")]
    NotFound,
    #[error("incorrect password")]
    BadCredential,
    #[error("code expired or did not match")]
    CodeInvalid,
    #[error("subject present in both identity and staging stores")]
    Conflict,
    #[error("invalid session token")]
    Unauthorized,
    #[error("failed to deliver code: {0}")]
    DeliveryFailed(#[source] anyhow::Error),
    #[error("internal error: {0}")]
    Internal(#[source] anyhow::Error),
}

impl ProvisionError {
    /// Short machine-readable name, used as a log field.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::AlreadyRegistered => "already_registered",
            Self::NotFound => "not_found",
            Self::BadCredential => "bad_credential",
            Self::CodeInvalid => "code_invalid",
            Self::Conflict => "conflict",
            Self::Unauthorized => "unauthorized",
            Self::DeliveryFailed(_) => "delivery_failed",
            Self::Internal(_) => "internal",
        }
    }
}
