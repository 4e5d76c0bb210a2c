//! Records held by the identity, staging and challenge stores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

/// Optional position of a person in the district → sub-district → facility tree.
#[derive(ToSchema, Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Placement {
    pub district_id: Option<String>,
    pub sub_district_id: Option<String>,
    pub facility_id: Option<String>,
}

/// Permanent account. Only ever created by promoting a [`Staging`] record.
#[derive(ToSchema, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub subject_id: String,
    pub first_name: String,
    pub last_name: Option<String>,
    pub email: String,
    #[serde(skip)]
    pub credential_digest: String,
    #[serde(flatten)]
    pub placement: Placement,
    pub created_at: DateTime<Utc>,
}

impl Identity {
    /// Build the permanent record from a pending registration.
    ///
    /// The credential digest is carried over verbatim, never re-hashed.
    #[must_use]
    pub fn promote(staging: Staging, created_at: DateTime<Utc>) -> Self {
        Self {
            subject_id: staging.subject_id,
            first_name: staging.first_name,
            last_name: staging.last_name,
            email: staging.email,
            credential_digest: staging.credential_digest,
            placement: staging.placement,
            created_at,
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("subject_id", &self.subject_id)
            .field("first_name", &self.first_name)
            .field("last_name", &self.last_name)
            .field("email", &self.email)
            .field("credential_digest", &"***")
            .field("placement", &self.placement)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Pending registration awaiting code confirmation.
#[derive(Clone, PartialEq, Eq)]
pub struct Staging {
    pub subject_id: String,
    pub first_name: String,
    pub last_name: Option<String>,
    pub email: String,
    pub credential_digest: String,
    pub placement: Placement,
    pub created_at: DateTime<Utc>,
}

impl fmt::Debug for Staging {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Staging")
            .field("subject_id", &self.subject_id)
            .field("email", &self.email)
            .field("credential_digest", &"***")
            .field("placement", &self.placement)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Live one-time code for a subject.
#[derive(Clone, PartialEq, Eq)]
pub struct Challenge {
    pub subject_id: String,
    pub code: String,
    pub created_at: DateTime<Utc>,
}

impl fmt::Debug for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Challenge")
            .field("subject_id", &self.subject_id)
            .field("code", &"***")
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Raw signup input as submitted by the client.
#[derive(Clone, Default)]
pub struct SignupInput {
    pub subject_id: String,
    pub first_name: String,
    pub last_name: Option<String>,
    pub email: String,
    pub password: String,
    pub placement: Placement,
}

impl fmt::Debug for SignupInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignupInput")
            .field("subject_id", &self.subject_id)
            .field("first_name", &self.first_name)
            .field("last_name", &self.last_name)
            .field("email", &self.email)
            .field("password", &"***")
            .field("placement", &self.placement)
            .finish()
    }
}
