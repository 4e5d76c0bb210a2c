//! Session tokens minted after a confirmed challenge.

use anyhow::{Result, anyhow};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Opaque bearer token issuance bound to a subject id.
pub trait TokenMinter: Send + Sync {
    /// Mint a token for `subject_id`.
    ///
    /// # Errors
    /// Returns an error if signing fails.
    fn mint(&self, subject_id: &str) -> Result<String>;

    /// Validate a token and return the subject it was minted for.
    ///
    /// # Errors
    /// Returns an error if the token is malformed, expired or not ours.
    fn subject(&self, token: &str) -> Result<String>;
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct Claims {
    sub: String,
    iat: i64,
    exp: i64,
    iss: String,
    jti: String,
}

/// HS256 JWT minter.
pub struct JwtMinter {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    ttl: Duration,
}

impl JwtMinter {
    #[must_use]
    pub fn new(secret: &SecretString, issuer: String, ttl: Duration) -> Self {
        let secret = secret.expose_secret().as_bytes();
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer,
            ttl,
        }
    }
}

impl std::fmt::Debug for JwtMinter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtMinter")
            .field("issuer", &self.issuer)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl TokenMinter for JwtMinter {
    fn mint(&self, subject_id: &str) -> Result<String> {
        let now = chrono::Utc::now().timestamp();
        let ttl = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);
        let claims = Claims {
            sub: subject_id.to_string(),
            iat: now,
            exp: now.saturating_add(ttl),
            iss: self.issuer.clone(),
            jti: Uuid::new_v4().to_string(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|err| anyhow!("failed to sign token: {err}"))
    }

    fn subject(&self, token: &str) -> Result<String> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        let data = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|err| anyhow!("invalid token: {err}"))?;
        Ok(data.claims.sub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minter(secret: &str) -> JwtMinter {
        JwtMinter::new(
            &SecretString::from(secret.to_string()),
            "provisio".to_string(),
            Duration::from_secs(3600),
        )
    }

    #[test]
    fn mint_then_resolve_subject() -> Result<()> {
        let minter = minter("secret");
        let token = minter.mint("alice")?;
        assert_eq!(minter.subject(&token)?, "alice");
        Ok(())
    }

    #[test]
    fn tokens_are_unique_per_mint() -> Result<()> {
        let minter = minter("secret");
        assert_ne!(minter.mint("alice")?, minter.mint("alice")?);
        Ok(())
    }

    #[test]
    fn wrong_secret_is_rejected() -> Result<()> {
        let token = minter("secret1").mint("alice")?;
        assert!(minter("secret2").subject(&token).is_err());
        Ok(())
    }

    #[test]
    fn wrong_issuer_is_rejected() -> Result<()> {
        let other = JwtMinter::new(
            &SecretString::from("secret".to_string()),
            "someone-else".to_string(),
            Duration::from_secs(3600),
        );
        let token = other.mint("alice")?;
        assert!(minter("secret").subject(&token).is_err());
        Ok(())
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(minter("secret").subject("not-a-token").is_err());
    }
}
