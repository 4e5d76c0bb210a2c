//! Request/response types for the signup, signin and verify-otp endpoints.
//!
//! Field names are camelCase. `userId` is accepted for `subjectId` and `otp`
//! for `code` so older clients keep working.

use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

use crate::provision::models::{Identity, Placement, SignupInput};

#[derive(ToSchema, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    #[serde(alias = "userId")]
    pub subject_id: String,
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    pub email: String,
    pub password: String,
    #[serde(flatten)]
    pub placement: Placement,
}

impl fmt::Debug for SignupRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignupRequest")
            .field("subject_id", &self.subject_id)
            .field("email", &self.email)
            .field("password", &"***")
            .finish_non_exhaustive()
    }
}

impl From<SignupRequest> for SignupInput {
    fn from(request: SignupRequest) -> Self {
        Self {
            subject_id: request.subject_id,
            first_name: request.first_name,
            last_name: request.last_name,
            email: request.email,
            password: request.password,
            placement: request.placement,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SigninRequest {
    #[serde(alias = "userId")]
    pub subject_id: String,
    pub password: String,
}

impl fmt::Debug for SigninRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigninRequest")
            .field("subject_id", &self.subject_id)
            .field("password", &"***")
            .finish()
    }
}

#[derive(ToSchema, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOtpRequest {
    #[serde(alias = "userId")]
    pub subject_id: String,
    #[serde(alias = "otp")]
    pub code: String,
}

impl fmt::Debug for VerifyOtpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifyOtpRequest")
            .field("subject_id", &self.subject_id)
            .field("code", &"***")
            .finish()
    }
}

#[derive(ToSchema, Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOtpResponse {
    pub token: String,
    pub identity: Identity,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use serde_json::json;

    #[test]
    fn signup_request_accepts_legacy_field_names() -> Result<()> {
        let request: SignupRequest = serde_json::from_value(json!({
            "userId": "alice",
            "firstName": "Alice",
            "email": "a@x.com",
            "password": "p1",
            "districtId": "d1"
        }))?;
        assert_eq!(request.subject_id, "alice");
        assert_eq!(request.last_name, None);
        assert_eq!(request.placement.district_id.as_deref(), Some("d1"));
        assert_eq!(request.placement.facility_id, None);

        let input = SignupInput::from(request);
        assert_eq!(input.first_name, "Alice");
        Ok(())
    }

    #[test]
    fn verify_request_accepts_otp_alias() -> Result<()> {
        let request: VerifyOtpRequest =
            serde_json::from_value(json!({"userId": "alice", "otp": "482913"}))?;
        assert_eq!(request.subject_id, "alice");
        assert_eq!(request.code, "482913");

        let request: VerifyOtpRequest =
            serde_json::from_value(json!({"subjectId": "alice", "code": "482913"}))?;
        assert_eq!(request.code, "482913");
        Ok(())
    }

    #[test]
    fn debug_output_hides_secrets() -> Result<()> {
        let request: SigninRequest =
            serde_json::from_value(json!({"subjectId": "alice", "password": "hunter2"}))?;
        assert!(!format!("{request:?}").contains("hunter2"));
        Ok(())
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let result = serde_json::from_value::<SigninRequest>(json!({"subjectId": "alice"}));
        assert!(result.is_err());
    }
}
