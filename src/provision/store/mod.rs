//! Persistence seams for identities, staging records and challenges.
//!
//! Every method is individually atomic; no caller may assume atomicity across
//! two calls. Creation paths are upserts keyed by subject id so that two
//! concurrent signups for the same subject converge on one record.
//!
//! Stale rows (older than their window) are invisible to every lookup and
//! never block creation of a fresh row for the same key.

mod clock;
pub mod memory;
pub mod postgres;

pub use clock::{Clock, ManualClock, SystemClock};
pub use memory::MemoryStore;
pub use postgres::PgStore;

use anyhow::{Result, bail};
use async_trait::async_trait;
use std::time::Duration;

use super::models::{Challenge, Identity, Staging};

pub const DEFAULT_CHALLENGE_WINDOW: Duration = Duration::from_secs(60);
pub const DEFAULT_STAGING_WINDOW: Duration = Duration::from_secs(15 * 60);

/// Lifetimes of challenges and staging records.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Windows {
    challenge: Duration,
    staging: Duration,
}

impl Windows {
    /// # Errors
    /// Returns an error unless `0 < challenge < staging`.
    pub fn new(challenge: Duration, staging: Duration) -> Result<Self> {
        if challenge.is_zero() || staging.is_zero() {
            bail!("challenge and staging windows must be non-zero");
        }
        if challenge >= staging {
            bail!(
                "challenge window ({}s) must be shorter than the staging window ({}s)",
                challenge.as_secs(),
                staging.as_secs()
            );
        }
        Ok(Self { challenge, staging })
    }

    #[must_use]
    pub fn challenge(&self) -> Duration {
        self.challenge
    }

    #[must_use]
    pub fn staging(&self) -> Duration {
        self.staging
    }
}

impl Default for Windows {
    fn default() -> Self {
        Self {
            challenge: DEFAULT_CHALLENGE_WINDOW,
            staging: DEFAULT_STAGING_WINDOW,
        }
    }
}

/// Result of writing a challenge for a subject.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No live challenge existed.
    Created,
    /// A live challenge was overwritten in place.
    Refreshed,
}

/// Result of creating a staging record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StagingOutcome {
    Created,
    /// A live record for this subject id already exists; nothing was written.
    AlreadyPending,
    /// Another subject holds a live record with this email.
    EmailTaken,
    /// An identity already holds this subject id or email; nothing was written.
    Registered,
}

/// Result of inserting a permanent identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Created,
    SubjectTaken,
    EmailTaken,
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn find(&self, subject_id: &str) -> Result<Option<Identity>>;

    /// True when an identity holds this subject id OR this email.
    async fn exists(&self, subject_id: &str, email: &str) -> Result<bool>;

    async fn insert(&self, identity: &Identity) -> Result<InsertOutcome>;

    /// Cheap liveness probe for `/health`.
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
pub trait StagingStore: Send + Sync {
    /// Live record only.
    async fn find(&self, subject_id: &str) -> Result<Option<Staging>>;

    /// Insert a new record; `created_at` on the argument is ignored.
    ///
    /// Refuses while an identity holds the subject id or email, so a signup
    /// racing a promotion cannot leave the subject in both stores.
    async fn create(&self, staging: &Staging) -> Result<StagingOutcome>;

    /// Reset the timestamp of a live record. False when no live record exists.
    async fn touch(&self, subject_id: &str) -> Result<bool>;

    /// Remove the record regardless of age. False when nothing was removed.
    async fn delete(&self, subject_id: &str) -> Result<bool>;

    /// Physically remove stale records, returning how many went.
    async fn purge_expired(&self) -> Result<u64>;
}

#[async_trait]
pub trait CodeStore: Send + Sync {
    /// Create or overwrite the subject's challenge with a new code and timestamp.
    async fn upsert(&self, subject_id: &str, code: &str) -> Result<UpsertOutcome>;

    /// Live challenge only.
    async fn find(&self, subject_id: &str) -> Result<Option<Challenge>>;

    /// Delete the live challenge if and only if `code` matches it.
    ///
    /// This is the serialization point for verification: of two concurrent
    /// calls with the same valid code exactly one observes `true`.
    async fn consume(&self, subject_id: &str, code: &str) -> Result<bool>;

    /// Remove the challenge regardless of age or value.
    async fn discard(&self, subject_id: &str) -> Result<()>;

    async fn purge_expired(&self) -> Result<u64>;
}
