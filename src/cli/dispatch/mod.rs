//! Map parsed command-line arguments to the action the binary runs.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{self, expiry, notifier, token};
use anyhow::Result;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches
        .get_one::<u16>(commands::ARG_PORT)
        .copied()
        .unwrap_or(8080);

    let dsn = matches
        .get_one::<String>(commands::ARG_DSN)
        .cloned()
        .filter(|v| !v.trim().is_empty());

    let cors_origin = matches
        .get_one::<String>(commands::ARG_CORS_ORIGIN)
        .cloned()
        .filter(|v| !v.trim().is_empty());

    Ok(Action::Server(Args {
        port,
        dsn,
        apply_schema: matches.get_flag(commands::ARG_APPLY_SCHEMA),
        cors_origin,
        token: token::Options::parse(matches)?,
        expiry: expiry::Options::parse(matches)?,
        notifier: notifier::Options::parse(matches)?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn matches_from(args: &[&str]) -> clap::ArgMatches {
        let mut argv = vec!["provisio"];
        argv.extend_from_slice(args);
        commands::new().get_matches_from(argv)
    }

    fn with_no_env<F: FnOnce()>(f: F) {
        temp_env::with_vars(
            [
                ("PROVISIO_DSN", None::<&str>),
                ("PROVISIO_APPLY_SCHEMA", None),
                ("PROVISIO_CORS_ORIGIN", None),
                ("PROVISIO_JWT_SECRET", None),
                ("PROVISIO_NOTIFIER_URL", None),
                ("PROVISIO_NOTIFIER_TOKEN", None),
                ("PROVISIO_STORE_TIMEOUT_SECONDS", None),
                ("PROVISIO_NOTIFIER_TIMEOUT_SECONDS", None),
            ],
            f,
        );
    }

    #[test]
    fn server_action_with_defaults() {
        with_no_env(|| {
            let result = handler(&matches_from(&["--jwt-secret", "s3cret"]));
            assert!(result.is_ok());
            if let Ok(Action::Server(args)) = result {
                assert_eq!(args.port, 8080);
                assert_eq!(args.dsn, None);
                assert!(!args.apply_schema);
                assert_eq!(args.token.secret.expose_secret(), "s3cret");
                assert_eq!(args.token.issuer, "provisio");
                assert_eq!(args.expiry.challenge_ttl_seconds, 60);
                assert_eq!(args.expiry.staging_ttl_seconds, 900);
                assert!(args.notifier.url.is_none());
            }
        });
    }

    #[test]
    fn blank_values_are_treated_as_unset() {
        with_no_env(|| {
            temp_env::with_vars(
                [
                    ("PROVISIO_DSN", Some("")),
                    ("PROVISIO_NOTIFIER_URL", Some(" ")),
                ],
                || {
                    let result = handler(&matches_from(&["--jwt-secret", "s3cret"]));
                    assert!(result.is_ok());
                    if let Ok(Action::Server(args)) = result {
                        assert_eq!(args.dsn, None);
                        assert!(args.notifier.url.is_none());
                    }
                },
            );
        });
    }

    #[test]
    fn blank_jwt_secret_is_rejected() {
        with_no_env(|| {
            let result = handler(&matches_from(&["--jwt-secret", "  "]));
            assert!(result.is_err());
            if let Err(err) = result {
                assert!(
                    err.to_string()
                        .contains("missing required argument: --jwt-secret")
                );
            }
        });
    }

    #[test]
    fn invalid_notifier_url_is_rejected() {
        with_no_env(|| {
            let result = handler(&matches_from(&[
                "--jwt-secret",
                "s3cret",
                "--notifier-url",
                "not a url",
            ]));
            assert!(result.is_err());
        });
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        with_no_env(|| {
            let result = handler(&matches_from(&[
                "--jwt-secret",
                "s3cret",
                "--store-timeout-seconds",
                "0",
            ]));
            assert!(result.is_err());

            let result = handler(&matches_from(&[
                "--jwt-secret",
                "s3cret",
                "--notifier-timeout-seconds",
                "0",
            ]));
            assert!(result.is_err());
        });
    }

    #[test]
    fn secrets_are_redacted_in_debug() {
        with_no_env(|| {
            let result = handler(&matches_from(&[
                "--jwt-secret",
                "s3cret",
                "--notifier-token",
                "relay-token",
            ]));
            assert!(result.is_ok());
            if let Ok(action) = result {
                let debug = format!("{action:?}");
                assert!(!debug.contains("s3cret"));
                assert!(!debug.contains("relay-token"));
            }
        });
    }
}
