//! Postgres-backed stores.
//!
//! Liveness is evaluated in SQL against `NOW()`, so every replica agrees on
//! which rows are stale regardless of local clock skew.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgPoolOptions, postgres::PgRow};
use std::time::Duration;
use tracing::{Instrument, debug};

use super::{
    CodeStore, IdentityStore, InsertOutcome, StagingOutcome, StagingStore, UpsertOutcome, Windows,
};
use crate::provision::directory::{DirectoryStore, District, Facility, SubDistrict};
use crate::provision::models::{Challenge, Identity, Placement, Staging};

const SCHEMA_SQL: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/sql/schema.sql"));

const IDENTITY_PKEY: &str = "identities_pkey";

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
    windows: Windows,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool, windows: Windows) -> Self {
        Self { pool, windows }
    }

    /// Open a pool; acquiring a connection gives up after `acquire_timeout`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be reached.
    pub async fn connect(dsn: &str, acquire_timeout: Duration, windows: Windows) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(10)
            .max_lifetime(Duration::from_secs(60 * 2))
            .acquire_timeout(acquire_timeout)
            .test_before_acquire(true)
            .connect(dsn)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool, windows))
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables and indexes if they do not exist yet.
    ///
    /// # Errors
    /// Returns an error naming the first statement that failed.
    pub async fn apply_schema(&self) -> Result<()> {
        for (index, statement) in split_sql_statements(SCHEMA_SQL).iter().enumerate() {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .with_context(|| format!("failed to execute schema statement {}", index + 1))?;
        }
        debug!("schema applied");
        Ok(())
    }

    fn challenge_seconds(&self) -> i64 {
        seconds(self.windows.challenge())
    }

    fn staging_seconds(&self) -> i64 {
        seconds(self.windows.staging())
    }
}

fn seconds(window: Duration) -> i64 {
    i64::try_from(window.as_secs()).unwrap_or(i64::MAX)
}

fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();

    for line in sql.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("--") && current.trim().is_empty() {
            continue;
        }
        current.push_str(line);
        current.push('\n');

        if trimmed.ends_with(';') {
            let statement = current.trim();
            if !statement.is_empty() {
                statements.push(statement.to_string());
            }
            current.clear();
        }
    }

    let leftover = current.trim();
    if !leftover.is_empty() {
        statements.push(leftover.to_string());
    }

    statements
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

/// Map a failed identity insert to the key that collided, if it was a collision.
fn identity_conflict(err: &sqlx::Error) -> Option<InsertOutcome> {
    if !is_unique_violation(err) {
        return None;
    }
    let constraint = match err {
        sqlx::Error::Database(db_err) => db_err.constraint(),
        _ => None,
    };
    Some(if constraint == Some(IDENTITY_PKEY) {
        InsertOutcome::SubjectTaken
    } else {
        InsertOutcome::EmailTaken
    })
}

fn placement_from(row: &PgRow) -> Placement {
    Placement {
        district_id: row.get("district_id"),
        sub_district_id: row.get("sub_district_id"),
        facility_id: row.get("facility_id"),
    }
}

fn identity_from(row: &PgRow) -> Identity {
    Identity {
        subject_id: row.get("subject_id"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        email: row.get("email"),
        credential_digest: row.get("credential_digest"),
        placement: placement_from(row),
        created_at: row.get("created_at"),
    }
}

fn staging_from(row: &PgRow) -> Staging {
    Staging {
        subject_id: row.get("subject_id"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        email: row.get("email"),
        credential_digest: row.get("credential_digest"),
        placement: placement_from(row),
        created_at: row.get("created_at"),
    }
}

#[async_trait]
impl IdentityStore for PgStore {
    async fn find(&self, subject_id: &str) -> Result<Option<Identity>> {
        let query = r"
            SELECT subject_id, first_name, last_name, email, credential_digest,
                   district_id, sub_district_id, facility_id, created_at
            FROM identities
            WHERE subject_id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(subject_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup identity")?;
        Ok(row.as_ref().map(identity_from))
    }

    async fn exists(&self, subject_id: &str, email: &str) -> Result<bool> {
        let query = r"
            SELECT EXISTS (
                SELECT 1 FROM identities WHERE subject_id = $1 OR email = $2
            ) AS taken
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(subject_id)
            .bind(email)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to check identity existence")?;
        Ok(row.get("taken"))
    }

    async fn insert(&self, identity: &Identity) -> Result<InsertOutcome> {
        let query = r"
            INSERT INTO identities
                (subject_id, first_name, last_name, email, credential_digest,
                 district_id, sub_district_id, facility_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(&identity.subject_id)
            .bind(&identity.first_name)
            .bind(&identity.last_name)
            .bind(&identity.email)
            .bind(&identity.credential_digest)
            .bind(&identity.placement.district_id)
            .bind(&identity.placement.sub_district_id)
            .bind(&identity.placement.facility_id)
            .bind(identity.created_at)
            .execute(&self.pool)
            .instrument(span)
            .await;

        match result {
            Ok(_) => Ok(InsertOutcome::Created),
            Err(err) => match identity_conflict(&err) {
                Some(outcome) => Ok(outcome),
                None => Err(err).context("failed to insert identity"),
            },
        }
    }

    async fn ping(&self) -> Result<()> {
        let query = "SELECT 1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        sqlx::query(query)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("database ping failed")?;
        Ok(())
    }
}

#[async_trait]
impl StagingStore for PgStore {
    async fn find(&self, subject_id: &str) -> Result<Option<Staging>> {
        let query = r"
            SELECT subject_id, first_name, last_name, email, credential_digest,
                   district_id, sub_district_id, facility_id, created_at
            FROM staging_registrations
            WHERE subject_id = $1
              AND created_at > NOW() - ($2 * INTERVAL '1 second')
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(subject_id)
            .bind(self.staging_seconds())
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup staging record")?;
        Ok(row.as_ref().map(staging_from))
    }

    async fn create(&self, staging: &Staging) -> Result<StagingOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin staging transaction")?;

        // Stale rows must not block a fresh registration for the same keys.
        let query = r"
            DELETE FROM staging_registrations
            WHERE (subject_id = $1 OR email = $2)
              AND created_at <= NOW() - ($3 * INTERVAL '1 second')
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(&staging.subject_id)
            .bind(&staging.email)
            .bind(self.staging_seconds())
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to clear stale staging records")?;

        let query = r"
            INSERT INTO staging_registrations
                (subject_id, first_name, last_name, email, credential_digest,
                 district_id, sub_district_id, facility_id, created_at)
            SELECT $1, $2, $3, $4, $5, $6, $7, $8, NOW()
            WHERE NOT EXISTS (
                SELECT 1 FROM identities WHERE subject_id = $1 OR email = $4
            )
            ON CONFLICT (subject_id) DO NOTHING
            RETURNING subject_id
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(&staging.subject_id)
            .bind(&staging.first_name)
            .bind(&staging.last_name)
            .bind(&staging.email)
            .bind(&staging.credential_digest)
            .bind(&staging.placement.district_id)
            .bind(&staging.placement.sub_district_id)
            .bind(&staging.placement.facility_id)
            .fetch_optional(&mut *tx)
            .instrument(span)
            .await;

        let outcome = match row {
            Ok(Some(_)) => StagingOutcome::Created,
            Ok(None) => {
                // Nothing inserted: either an identity holds the keys or a live
                // record for the subject already exists.
                let query = r"
                    SELECT EXISTS (
                        SELECT 1 FROM identities WHERE subject_id = $1 OR email = $2
                    ) AS taken
                ";
                let span = tracing::info_span!(
                    "db.query",
                    db.system = "postgresql",
                    db.operation = "SELECT",
                    db.statement = query
                );
                let registered: bool = sqlx::query(query)
                    .bind(&staging.subject_id)
                    .bind(&staging.email)
                    .fetch_one(&mut *tx)
                    .instrument(span)
                    .await
                    .context("failed to check identities for staging conflict")?
                    .get("taken");
                if registered {
                    StagingOutcome::Registered
                } else {
                    StagingOutcome::AlreadyPending
                }
            }
            // The dropped transaction rolls back the stale-row cleanup.
            Err(err) if is_unique_violation(&err) => return Ok(StagingOutcome::EmailTaken),
            Err(err) => return Err(err).context("failed to insert staging record"),
        };

        tx.commit().await.context("commit staging transaction")?;

        Ok(outcome)
    }

    async fn touch(&self, subject_id: &str) -> Result<bool> {
        let query = r"
            UPDATE staging_registrations
            SET created_at = NOW()
            WHERE subject_id = $1
              AND created_at > NOW() - ($2 * INTERVAL '1 second')
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(subject_id)
            .bind(self.staging_seconds())
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to touch staging record")?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, subject_id: &str) -> Result<bool> {
        let query = "DELETE FROM staging_registrations WHERE subject_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(subject_id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete staging record")?;
        Ok(result.rows_affected() > 0)
    }

    async fn purge_expired(&self) -> Result<u64> {
        let query = r"
            DELETE FROM staging_registrations
            WHERE created_at <= NOW() - ($1 * INTERVAL '1 second')
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(self.staging_seconds())
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to purge staging records")?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl CodeStore for PgStore {
    async fn upsert(&self, subject_id: &str, code: &str) -> Result<UpsertOutcome> {
        // The CTE reads the snapshot taken before the upsert runs.
        let query = r"
            WITH prior AS (
                SELECT 1 FROM challenges
                WHERE subject_id = $1
                  AND created_at > NOW() - ($3 * INTERVAL '1 second')
            )
            INSERT INTO challenges (subject_id, code, created_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (subject_id)
            DO UPDATE SET code = EXCLUDED.code, created_at = EXCLUDED.created_at
            RETURNING EXISTS (SELECT 1 FROM prior) AS refreshed
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(subject_id)
            .bind(code)
            .bind(self.challenge_seconds())
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to upsert challenge")?;

        let refreshed: bool = row.get("refreshed");
        Ok(if refreshed {
            UpsertOutcome::Refreshed
        } else {
            UpsertOutcome::Created
        })
    }

    async fn find(&self, subject_id: &str) -> Result<Option<Challenge>> {
        let query = r"
            SELECT subject_id, code, created_at
            FROM challenges
            WHERE subject_id = $1
              AND created_at > NOW() - ($2 * INTERVAL '1 second')
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(subject_id)
            .bind(self.challenge_seconds())
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup challenge")?;
        Ok(row.map(|row| Challenge {
            subject_id: row.get("subject_id"),
            code: row.get("code"),
            created_at: row.get("created_at"),
        }))
    }

    async fn consume(&self, subject_id: &str, code: &str) -> Result<bool> {
        let query = r"
            DELETE FROM challenges
            WHERE subject_id = $1
              AND code = $2
              AND created_at > NOW() - ($3 * INTERVAL '1 second')
            RETURNING subject_id
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(subject_id)
            .bind(code)
            .bind(self.challenge_seconds())
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to consume challenge")?;
        Ok(row.is_some())
    }

    async fn discard(&self, subject_id: &str) -> Result<()> {
        let query = "DELETE FROM challenges WHERE subject_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(subject_id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to discard challenge")?;
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let query = r"
            DELETE FROM challenges
            WHERE created_at <= NOW() - ($1 * INTERVAL '1 second')
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(self.challenge_seconds())
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to purge challenges")?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl DirectoryStore for PgStore {
    async fn districts(&self) -> Result<Vec<District>> {
        let query = "SELECT district_id, name FROM districts ORDER BY district_id";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to list districts")?;
        Ok(rows
            .iter()
            .map(|row| District {
                district_id: row.get("district_id"),
                name: row.get("name"),
            })
            .collect())
    }

    async fn district(&self, district_id: &str) -> Result<Option<District>> {
        let query = "SELECT district_id, name FROM districts WHERE district_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(district_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup district")?;
        Ok(row.map(|row| District {
            district_id: row.get("district_id"),
            name: row.get("name"),
        }))
    }

    async fn sub_districts_of(&self, district_id: &str) -> Result<Vec<SubDistrict>> {
        let query = r"
            SELECT sub_district_id, district_id, name
            FROM sub_districts
            WHERE district_id = $1
            ORDER BY sub_district_id
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .bind(district_id)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to list sub-districts")?;
        Ok(rows.iter().map(sub_district_from).collect())
    }

    async fn sub_district(&self, sub_district_id: &str) -> Result<Option<SubDistrict>> {
        let query = r"
            SELECT sub_district_id, district_id, name
            FROM sub_districts
            WHERE sub_district_id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(sub_district_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup sub-district")?;
        Ok(row.as_ref().map(sub_district_from))
    }

    async fn facilities_of(&self, sub_district_id: &str) -> Result<Vec<Facility>> {
        let query = r"
            SELECT facility_id, sub_district_id, name
            FROM facilities
            WHERE sub_district_id = $1
            ORDER BY facility_id
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .bind(sub_district_id)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to list facilities")?;
        Ok(rows.iter().map(facility_from).collect())
    }

    async fn facility(&self, facility_id: &str) -> Result<Option<Facility>> {
        let query = r"
            SELECT facility_id, sub_district_id, name
            FROM facilities
            WHERE facility_id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(facility_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup facility")?;
        Ok(row.as_ref().map(facility_from))
    }
}

fn sub_district_from(row: &PgRow) -> SubDistrict {
    SubDistrict {
        sub_district_id: row.get("sub_district_id"),
        district_id: row.get("district_id"),
        name: row.get("name"),
    }
}

fn facility_from(row: &PgRow) -> Facility {
    Facility {
        facility_id: row.get("facility_id"),
        sub_district_id: row.get("sub_district_id"),
        name: row.get("name"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::{borrow::Cow, error::Error as StdError, fmt};

    #[derive(Debug)]
    struct TestDbError {
        code: Option<&'static str>,
        constraint: Option<&'static str>,
    }

    impl fmt::Display for TestDbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "test database error")
        }
    }

    impl StdError for TestDbError {}

    impl DatabaseError for TestDbError {
        fn message(&self) -> &'static str {
            "test database error"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            self.code.map(Cow::Borrowed)
        }

        fn constraint(&self) -> Option<&str> {
            self.constraint
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::UniqueViolation
        }
    }

    fn db_error(code: &'static str, constraint: Option<&'static str>) -> sqlx::Error {
        sqlx::Error::Database(Box::new(TestDbError {
            code: Some(code),
            constraint,
        }))
    }

    #[test]
    fn unique_violation_matches_sqlstate() {
        assert!(is_unique_violation(&db_error("23505", None)));
        assert!(!is_unique_violation(&db_error("99999", None)));
        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
    }

    #[test]
    fn identity_conflict_names_the_colliding_key() {
        assert_eq!(
            identity_conflict(&db_error("23505", Some(IDENTITY_PKEY))),
            Some(InsertOutcome::SubjectTaken)
        );
        assert_eq!(
            identity_conflict(&db_error("23505", Some("identities_email_key"))),
            Some(InsertOutcome::EmailTaken)
        );
        assert_eq!(identity_conflict(&db_error("40001", None)), None);
    }

    #[test]
    fn schema_splits_into_statements() {
        let statements = split_sql_statements(SCHEMA_SQL);
        assert!(statements.len() >= 6);
        assert!(statements.iter().all(|statement| statement.ends_with(';')));
        assert!(
            statements
                .iter()
                .any(|statement| statement.contains("CREATE TABLE IF NOT EXISTS challenges"))
        );
    }

    #[test]
    fn split_keeps_trailing_statement_without_semicolon() {
        let statements = split_sql_statements("-- header\nSELECT 1;\nSELECT 2");
        assert_eq!(statements, vec!["SELECT 1;", "SELECT 2"]);
    }

    #[test]
    fn windows_convert_to_whole_seconds() {
        assert_eq!(seconds(Duration::from_secs(60)), 60);
        assert_eq!(seconds(Duration::from_secs(u64::MAX)), i64::MAX);
    }
}
