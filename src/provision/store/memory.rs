//! In-process store used when no database DSN is configured, and by tests.
//!
//! All tables sit behind one lock, so every trait method is atomic with respect
//! to every other. No await happens while the lock is held.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{
    Clock, CodeStore, IdentityStore, InsertOutcome, StagingOutcome, StagingStore, SystemClock,
    UpsertOutcome, Windows,
};
use crate::provision::directory::{DirectoryStore, District, Facility, SubDistrict};
use crate::provision::models::{Challenge, Identity, Staging};

#[derive(Default)]
struct Tables {
    identities: HashMap<String, Identity>,
    staging: HashMap<String, Staging>,
    challenges: HashMap<String, Challenge>,
    districts: BTreeMap<String, District>,
    sub_districts: BTreeMap<String, SubDistrict>,
    facilities: BTreeMap<String, Facility>,
}

#[derive(Debug, Clone, Copy)]
struct Ages {
    now: DateTime<Utc>,
    windows: Windows,
}

impl Ages {
    fn live(&self, created_at: DateTime<Utc>, window: Duration) -> bool {
        self.now
            .signed_duration_since(created_at)
            .to_std()
            // Timestamps in the future count as fresh.
            .map_or(true, |age| age < window)
    }

    fn challenge_live(&self, challenge: &Challenge) -> bool {
        self.live(challenge.created_at, self.windows.challenge())
    }

    fn staging_live(&self, staging: &Staging) -> bool {
        self.live(staging.created_at, self.windows.staging())
    }
}

pub struct MemoryStore {
    tables: Mutex<Tables>,
    windows: Windows,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    #[must_use]
    pub fn new(windows: Windows, clock: Arc<dyn Clock>) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            windows,
            clock,
        }
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ages(&self) -> Ages {
        Ages {
            now: self.clock.now(),
            windows: self.windows,
        }
    }

    pub fn seed_district(&self, district_id: &str, name: &str) {
        self.tables().districts.insert(
            district_id.to_string(),
            District {
                district_id: district_id.to_string(),
                name: name.to_string(),
            },
        );
    }

    pub fn seed_sub_district(&self, sub_district_id: &str, district_id: &str, name: &str) {
        self.tables().sub_districts.insert(
            sub_district_id.to_string(),
            SubDistrict {
                sub_district_id: sub_district_id.to_string(),
                district_id: district_id.to_string(),
                name: name.to_string(),
            },
        );
    }

    pub fn seed_facility(&self, facility_id: &str, sub_district_id: &str, name: &str) {
        self.tables().facilities.insert(
            facility_id.to_string(),
            Facility {
                facility_id: facility_id.to_string(),
                sub_district_id: sub_district_id.to_string(),
                name: name.to_string(),
            },
        );
    }

    /// Number of physically stored challenges, live or not.
    #[must_use]
    pub fn challenge_rows(&self) -> usize {
        self.tables().challenges.len()
    }

    /// Number of physically stored staging records, live or not.
    #[must_use]
    pub fn staging_rows(&self) -> usize {
        self.tables().staging.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Windows::default(), Arc::new(SystemClock))
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("windows", &self.windows)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn find(&self, subject_id: &str) -> Result<Option<Identity>> {
        Ok(self.tables().identities.get(subject_id).cloned())
    }

    async fn exists(&self, subject_id: &str, email: &str) -> Result<bool> {
        let tables = self.tables();
        Ok(tables.identities.contains_key(subject_id)
            || tables.identities.values().any(|identity| identity.email == email))
    }

    async fn insert(&self, identity: &Identity) -> Result<InsertOutcome> {
        let mut tables = self.tables();
        if tables.identities.contains_key(&identity.subject_id) {
            return Ok(InsertOutcome::SubjectTaken);
        }
        if tables
            .identities
            .values()
            .any(|existing| existing.email == identity.email)
        {
            return Ok(InsertOutcome::EmailTaken);
        }
        tables
            .identities
            .insert(identity.subject_id.clone(), identity.clone());
        Ok(InsertOutcome::Created)
    }
}

#[async_trait]
impl StagingStore for MemoryStore {
    async fn find(&self, subject_id: &str) -> Result<Option<Staging>> {
        let ages = self.ages();
        Ok(self
            .tables()
            .staging
            .get(subject_id)
            .filter(|staging| ages.staging_live(staging))
            .cloned())
    }

    async fn create(&self, staging: &Staging) -> Result<StagingOutcome> {
        let ages = self.ages();
        let mut tables = self.tables();

        if tables.identities.contains_key(&staging.subject_id)
            || tables
                .identities
                .values()
                .any(|identity| identity.email == staging.email)
        {
            return Ok(StagingOutcome::Registered);
        }

        tables.staging.retain(|subject_id, existing| {
            ages.staging_live(existing)
                || (subject_id != &staging.subject_id && existing.email != staging.email)
        });

        if tables.staging.contains_key(&staging.subject_id) {
            return Ok(StagingOutcome::AlreadyPending);
        }
        if tables
            .staging
            .values()
            .any(|existing| existing.email == staging.email)
        {
            return Ok(StagingOutcome::EmailTaken);
        }

        let mut record = staging.clone();
        record.created_at = ages.now;
        tables.staging.insert(record.subject_id.clone(), record);
        Ok(StagingOutcome::Created)
    }

    async fn touch(&self, subject_id: &str) -> Result<bool> {
        let ages = self.ages();
        let mut tables = self.tables();
        match tables.staging.get_mut(subject_id) {
            Some(staging) if ages.staging_live(staging) => {
                staging.created_at = ages.now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, subject_id: &str) -> Result<bool> {
        Ok(self.tables().staging.remove(subject_id).is_some())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let ages = self.ages();
        let mut tables = self.tables();
        let before = tables.staging.len();
        tables.staging.retain(|_, staging| ages.staging_live(staging));
        Ok(u64::try_from(before - tables.staging.len()).unwrap_or(u64::MAX))
    }
}

#[async_trait]
impl CodeStore for MemoryStore {
    async fn upsert(&self, subject_id: &str, code: &str) -> Result<UpsertOutcome> {
        let ages = self.ages();
        let mut tables = self.tables();
        let previous = tables.challenges.insert(
            subject_id.to_string(),
            Challenge {
                subject_id: subject_id.to_string(),
                code: code.to_string(),
                created_at: ages.now,
            },
        );
        Ok(match previous {
            Some(challenge) if ages.challenge_live(&challenge) => UpsertOutcome::Refreshed,
            _ => UpsertOutcome::Created,
        })
    }

    async fn find(&self, subject_id: &str) -> Result<Option<Challenge>> {
        let ages = self.ages();
        Ok(self
            .tables()
            .challenges
            .get(subject_id)
            .filter(|challenge| ages.challenge_live(challenge))
            .cloned())
    }

    async fn consume(&self, subject_id: &str, code: &str) -> Result<bool> {
        let ages = self.ages();
        let mut tables = self.tables();
        let matches = tables
            .challenges
            .get(subject_id)
            .is_some_and(|challenge| challenge.code == code && ages.challenge_live(challenge));
        if matches {
            tables.challenges.remove(subject_id);
        }
        Ok(matches)
    }

    async fn discard(&self, subject_id: &str) -> Result<()> {
        self.tables().challenges.remove(subject_id);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let ages = self.ages();
        let mut tables = self.tables();
        let before = tables.challenges.len();
        tables
            .challenges
            .retain(|_, challenge| ages.challenge_live(challenge));
        Ok(u64::try_from(before - tables.challenges.len()).unwrap_or(u64::MAX))
    }
}

#[async_trait]
impl DirectoryStore for MemoryStore {
    async fn districts(&self) -> Result<Vec<District>> {
        Ok(self.tables().districts.values().cloned().collect())
    }

    async fn district(&self, district_id: &str) -> Result<Option<District>> {
        Ok(self.tables().districts.get(district_id).cloned())
    }

    async fn sub_districts_of(&self, district_id: &str) -> Result<Vec<SubDistrict>> {
        Ok(self
            .tables()
            .sub_districts
            .values()
            .filter(|sub| sub.district_id == district_id)
            .cloned()
            .collect())
    }

    async fn sub_district(&self, sub_district_id: &str) -> Result<Option<SubDistrict>> {
        Ok(self.tables().sub_districts.get(sub_district_id).cloned())
    }

    async fn facilities_of(&self, sub_district_id: &str) -> Result<Vec<Facility>> {
        Ok(self
            .tables()
            .facilities
            .values()
            .filter(|facility| facility.sub_district_id == sub_district_id)
            .cloned()
            .collect())
    }

    async fn facility(&self, facility_id: &str) -> Result<Option<Facility>> {
        Ok(self.tables().facilities.get(facility_id).cloned())
    }
}
