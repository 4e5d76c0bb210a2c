//! OTP-gated identity provisioning.
//!
//! Flow:
//! - `signup` stages a pending registration and sends a code.
//! - `signin` checks the password of an existing identity and sends a code.
//! - `verify` consumes the code, then promotes the staging record (signup) or
//!   simply confirms the identity (signin), and mints a session token.
//!
//! Records are tied together by the subject id only; no operation spans more
//! than one store atomically. Consuming the challenge is the serialization
//! point: at most one `verify` per issued code gets past it.

pub mod code;
pub mod directory;
mod error;
pub mod hasher;
pub mod models;
pub mod notifier;
pub mod store;
pub mod sweeper;
pub mod token;
mod validate;


pub use error::ProvisionError;

use anyhow::anyhow;
use chrono::Utc;
use std::{future::Future, sync::Arc, time::Duration};
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

use self::directory::{DirectoryStore, Domains};
use self::hasher::CredentialHasher;
use self::models::{Identity, SignupInput, Staging};
use self::notifier::{CodeMessage, Notifier, Purpose};
use self::store::{
    CodeStore, IdentityStore, InsertOutcome, StagingOutcome, StagingStore, UpsertOutcome, Windows,
};
use self::token::TokenMinter;
use self::validate::Registration;

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_NOTIFIER_TIMEOUT: Duration = Duration::from_secs(10);

/// Store handles shared by every request.
#[derive(Clone)]
pub struct Stores {
    pub identities: Arc<dyn IdentityStore>,
    pub staging: Arc<dyn StagingStore>,
    pub codes: Arc<dyn CodeStore>,
    pub directory: Arc<dyn DirectoryStore>,
}

impl Stores {
    /// Use one backend for every store.
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: IdentityStore + StagingStore + CodeStore + DirectoryStore + 'static,
    {
        Self {
            identities: store.clone(),
            staging: store.clone(),
            codes: store.clone(),
            directory: store,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ProvisionConfig {
    windows: Windows,
    store_timeout: Duration,
    notifier_timeout: Duration,
}

impl ProvisionConfig {
    #[must_use]
    pub fn new(windows: Windows) -> Self {
        Self {
            windows,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            notifier_timeout: DEFAULT_NOTIFIER_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    #[must_use]
    pub fn with_notifier_timeout(mut self, notifier_timeout: Duration) -> Self {
        self.notifier_timeout = notifier_timeout;
        self
    }

    #[must_use]
    pub fn windows(&self) -> Windows {
        self.windows
    }

    #[must_use]
    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    #[must_use]
    pub fn notifier_timeout(&self) -> Duration {
        self.notifier_timeout
    }
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self::new(Windows::default())
    }
}

/// Which confirmation `verify` completed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerifyPath {
    Signup,
    Signin,
}

/// Successful `verify`.
#[derive(Debug)]
pub struct Verified {
    pub token: String,
    pub identity: Identity,
    pub path: VerifyPath,
}

/// Registrar, authenticator and confirmer over a set of stores.
pub struct Provisioner {
    stores: Stores,
    hasher: Arc<dyn CredentialHasher>,
    notifier: Arc<dyn Notifier>,
    minter: Arc<dyn TokenMinter>,
    config: ProvisionConfig,
}

impl Provisioner {
    #[must_use]
    pub fn new(
        stores: Stores,
        hasher: Arc<dyn CredentialHasher>,
        notifier: Arc<dyn Notifier>,
        minter: Arc<dyn TokenMinter>,
        config: ProvisionConfig,
    ) -> Self {
        Self {
            stores,
            hasher,
            notifier,
            minter,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ProvisionConfig {
        &self.config
    }

    /// Stage a registration and send a code to its address.
    ///
    /// A repeat call for a subject that is still pending refreshes the staging
    /// record and issues a new code; the credential from the first call is kept.
    ///
    /// # Errors
    /// `InvalidInput`, `AlreadyRegistered`, `DeliveryFailed` or `Internal`.
    #[instrument(skip_all, fields(subject_id = %input.subject_id.trim()))]
    pub async fn signup(&self, input: SignupInput) -> Result<(), ProvisionError> {
        let registration = validate::signup(input)?;
        let subject_id = registration.subject_id.clone();

        let taken = self
            .bounded(
                "identity lookup",
                self.stores
                    .identities
                    .exists(&subject_id, &registration.email),
            )
            .await?;
        if taken {
            return Err(ProvisionError::AlreadyRegistered);
        }

        let code = code::generate();
        let outcome = self
            .bounded("challenge upsert", self.stores.codes.upsert(&subject_id, &code))
            .await?;

        let refreshed = match outcome {
            // Repeat signup: keep the staged credential and address.
            UpsertOutcome::Refreshed => self.refresh_pending(&subject_id).await?,
            // The challenge was gone; staging may have outlived it.
            UpsertOutcome::Created => {
                let pending = self
                    .bounded("staging lookup", self.stores.staging.find(&subject_id))
                    .await?;
                match pending {
                    Some(_) => self.refresh_pending(&subject_id).await?,
                    None => None,
                }
            }
        };
        let recipient = match refreshed {
            Some(email) => {
                debug!(?outcome, "refreshed pending registration");
                email
            }
            None => self.stage(registration).await?,
        };

        self.deliver(CodeMessage {
            to_email: recipient,
            subject_id,
            code,
            purpose: Purpose::Signup,
            valid_for: self.config.windows.challenge(),
        })
        .await?;

        info!("signup code sent");

        Ok(())
    }

    /// Reset the staging timestamp and return the staged address.
    ///
    /// `None` when no live staging record exists for the subject.
    async fn refresh_pending(&self, subject_id: &str) -> Result<Option<String>, ProvisionError> {
        let touched = self
            .bounded("staging touch", self.stores.staging.touch(subject_id))
            .await?;
        if !touched {
            return Ok(None);
        }
        let staged = self
            .bounded("staging lookup", self.stores.staging.find(subject_id))
            .await?;
        Ok(staged.map(|staged| staged.email))
    }

    /// Hash the credential and create the staging record.
    ///
    /// Returns the address the code must go to.
    async fn stage(&self, registration: Registration) -> Result<String, ProvisionError> {
        let Registration {
            subject_id,
            first_name,
            last_name,
            email,
            password,
            placement,
        } = registration;

        let credential_digest = self.hash(password).await?;
        let staging = Staging {
            subject_id,
            first_name,
            last_name,
            email,
            credential_digest,
            placement,
            created_at: Utc::now(),
        };

        match self
            .bounded("staging create", self.stores.staging.create(&staging))
            .await?
        {
            StagingOutcome::Created => Ok(staging.email),
            StagingOutcome::AlreadyPending => {
                // Lost a race with a concurrent signup for the same subject.
                self.refresh_pending(&staging.subject_id)
                    .await?
                    .ok_or_else(|| {
                        ProvisionError::Internal(anyhow!(
                            "pending registration disappeared during signup"
                        ))
                    })
            }
            StagingOutcome::EmailTaken | StagingOutcome::Registered => {
                // Registered: a concurrent verify promoted the subject after the
                // identity check above.
                if let Err(err) = self
                    .bounded(
                        "challenge discard",
                        self.stores.codes.discard(&staging.subject_id),
                    )
                    .await
                {
                    warn!("failed to discard challenge after registration conflict: {err}");
                }
                Err(ProvisionError::AlreadyRegistered)
            }
        }
    }

    /// Check the password of an existing identity and send a code.
    ///
    /// A wrong password never touches the challenge store.
    ///
    /// # Errors
    /// `InvalidInput`, `NotFound`, `BadCredential`, `DeliveryFailed` or `Internal`.
    #[instrument(skip(self, password))]
    pub async fn signin(&self, subject_id: &str, password: &str) -> Result<(), ProvisionError> {
        let subject_id = validate::signin(subject_id, password)?;

        let identity = self
            .bounded("identity lookup", self.stores.identities.find(&subject_id))
            .await?
            .ok_or(ProvisionError::NotFound)?;

        if !self
            .verify_credential(password.to_string(), identity.credential_digest.clone())
            .await?
        {
            return Err(ProvisionError::BadCredential);
        }

        let code = code::generate();
        self.bounded("challenge upsert", self.stores.codes.upsert(&subject_id, &code))
            .await?;

        self.deliver(CodeMessage {
            to_email: identity.email,
            subject_id,
            code,
            purpose: Purpose::Signin,
            valid_for: self.config.windows.challenge(),
        })
        .await?;

        info!("signin code sent");

        Ok(())
    }

    /// Consume a code and complete whichever flow issued it.
    ///
    /// # Errors
    /// `InvalidInput`, `CodeInvalid`, `NotFound`, `Conflict`, `AlreadyRegistered`
    /// or `Internal`.
    #[instrument(skip(self, code))]
    pub async fn verify(&self, subject_id: &str, code: &str) -> Result<Verified, ProvisionError> {
        let subject_id = subject_id.trim();
        if !validate::valid_subject_id(subject_id) {
            return Err(ProvisionError::InvalidInput("invalid subjectId".to_string()));
        }

        let code = code.trim();
        if !code::is_well_formed(code) {
            return Err(ProvisionError::CodeInvalid);
        }

        let consumed = self
            .bounded("challenge consume", self.stores.codes.consume(subject_id, code))
            .await?;
        if !consumed {
            return Err(ProvisionError::CodeInvalid);
        }

        let (identity, staged) = tokio::try_join!(
            self.bounded("identity lookup", self.stores.identities.find(subject_id)),
            self.bounded("staging lookup", self.stores.staging.find(subject_id)),
        )?;

        match (identity, staged) {
            (Some(identity), None) => {
                let token = self.mint(subject_id)?;
                info!("signin confirmed");
                Ok(Verified {
                    token,
                    identity,
                    path: VerifyPath::Signin,
                })
            }
            (None, Some(staged)) => self.promote(staged).await,
            (Some(_), Some(_)) => {
                error!("subject present in both identity and staging stores");
                Err(ProvisionError::Conflict)
            }
            (None, None) => Err(ProvisionError::NotFound),
        }
    }

    /// Identity is written before staging is removed.
    async fn promote(&self, staged: Staging) -> Result<Verified, ProvisionError> {
        let subject_id = staged.subject_id.clone();
        let identity = Identity::promote(staged, Utc::now());

        match self
            .bounded("identity insert", self.stores.identities.insert(&identity))
            .await?
        {
            InsertOutcome::Created => {}
            InsertOutcome::SubjectTaken => {
                error!("identity appeared for a subject that was still staged");
                return Err(ProvisionError::Conflict);
            }
            InsertOutcome::EmailTaken => return Err(ProvisionError::AlreadyRegistered),
        }

        let removed = self
            .bounded("staging delete", self.stores.staging.delete(&subject_id))
            .await?;
        if !removed {
            warn!("staging record was already gone after promotion");
        }

        let token = self.mint(&subject_id)?;
        info!("signup confirmed, identity created");

        Ok(Verified {
            token,
            identity,
            path: VerifyPath::Signup,
        })
    }

    /// Map a bearer token to the identity it was minted for.
    ///
    /// # Errors
    /// `Unauthorized` for a bad token, `NotFound` if the identity is gone.
    pub async fn resolve_token(&self, token: &str) -> Result<Identity, ProvisionError> {
        let subject_id = self.minter.subject(token).map_err(|err| {
            debug!("rejected session token: {err}");
            ProvisionError::Unauthorized
        })?;
        self.bounded("identity lookup", self.stores.identities.find(&subject_id))
            .await?
            .ok_or(ProvisionError::NotFound)
    }

    /// Placement hierarchy visible to the token's identity.
    ///
    /// # Errors
    /// `Unauthorized`, `NotFound` or `Internal`.
    pub async fn domains(&self, token: &str) -> Result<Domains, ProvisionError> {
        let identity = self.resolve_token(token).await?;
        self.bounded(
            "domain lookup",
            directory::domains_for(self.stores.directory.as_ref(), &identity.placement),
        )
        .await
    }

    /// Probe the identity store.
    ///
    /// # Errors
    /// `Internal` if the store is unreachable or slow.
    pub async fn ping(&self) -> Result<(), ProvisionError> {
        self.bounded("store ping", self.stores.identities.ping()).await
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        future: impl Future<Output = anyhow::Result<T>>,
    ) -> Result<T, ProvisionError> {
        match timeout(self.config.store_timeout, future).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(ProvisionError::Internal(err.context(operation))),
            Err(_) => Err(ProvisionError::Internal(anyhow!(
                "{operation} timed out after {}ms",
                self.config.store_timeout.as_millis()
            ))),
        }
    }

    async fn deliver(&self, message: CodeMessage) -> Result<(), ProvisionError> {
        match timeout(self.config.notifier_timeout, self.notifier.deliver(&message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(ProvisionError::DeliveryFailed(err)),
            Err(_) => Err(ProvisionError::DeliveryFailed(anyhow!(
                "notifier timed out after {}ms",
                self.config.notifier_timeout.as_millis()
            ))),
        }
    }

    async fn hash(&self, password: String) -> Result<String, ProvisionError> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|err| ProvisionError::Internal(anyhow!("hashing task failed: {err}")))?
            .map_err(ProvisionError::Internal)
    }

    async fn verify_credential(
        &self,
        password: String,
        digest: String,
    ) -> Result<bool, ProvisionError> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.verify(&password, &digest))
            .await
            .map_err(|err| ProvisionError::Internal(anyhow!("verify task failed: {err}")))?
            .map_err(ProvisionError::Internal)
    }

    fn mint(&self, subject_id: &str) -> Result<String, ProvisionError> {
        self.minter.mint(subject_id).map_err(ProvisionError::Internal)
    }
}

impl std::fmt::Debug for Provisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provisioner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
