//! # Provisio (OTP-gated identity provisioning)
//!
//! `provisio` provisions user identities behind a one-time code delivered
//! out-of-band.
//!
//! ## Signup
//!
//! A new registrant is held in a time-limited **staging** record while a
//! six-digit **challenge** is delivered to their email address. Confirming the
//! code promotes the staging record into a permanent **identity** and returns a
//! session token.
//!
//! ## Signin
//!
//! An existing identity proves the password first, then confirms a freshly
//! issued challenge before a token is minted.
//!
//! ## Expiry
//!
//! Staging records and challenges carry a window (900s and 60s by default).
//! A record older than its window is never returned by a lookup, whether or
//! not the background sweeper has physically removed it yet.

pub mod api;
pub mod cli;
pub mod provision;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
