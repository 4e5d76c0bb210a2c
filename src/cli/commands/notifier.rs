use anyhow::Context;
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;
use std::fmt;
use url::Url;

pub const ARG_NOTIFIER_URL: &str = "notifier-url";
pub const ARG_NOTIFIER_TOKEN: &str = "notifier-token";
pub const ARG_NOTIFIER_TIMEOUT_SECONDS: &str = "notifier-timeout-seconds";
pub const ARG_MAIL_FROM: &str = "mail-from";

#[derive(Clone)]
pub struct Options {
    pub url: Option<Url>,
    pub token: Option<SecretString>,
    pub timeout_seconds: u64,
    pub from: String,
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("url", &self.url.as_ref().map(Url::as_str))
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("timeout_seconds", &self.timeout_seconds)
            .field("from", &self.from)
            .finish()
    }
}

impl Options {
    /// Parse code delivery arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the relay URL does not parse or the timeout is zero.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        // clap passes through empty strings when the env var is set to ""
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };

        let url = get_non_empty(ARG_NOTIFIER_URL)
            .map(|value| {
                Url::parse(&value).with_context(|| format!("invalid --{ARG_NOTIFIER_URL}: {value}"))
            })
            .transpose()?;

        let timeout_seconds = matches
            .get_one::<u64>(ARG_NOTIFIER_TIMEOUT_SECONDS)
            .copied()
            .unwrap_or(10);
        if timeout_seconds == 0 {
            anyhow::bail!("--{ARG_NOTIFIER_TIMEOUT_SECONDS} must be greater than zero");
        }

        Ok(Self {
            url,
            token: get_non_empty(ARG_NOTIFIER_TOKEN).map(SecretString::from),
            timeout_seconds,
            from: get_non_empty(ARG_MAIL_FROM)
                .unwrap_or_else(|| "no-reply@provisio.local".to_string()),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_NOTIFIER_URL)
                .long(ARG_NOTIFIER_URL)
                .help("Mail relay endpoint that receives one-time codes")
                .long_help(
                    "Mail relay endpoint that receives one-time codes as JSON. When unset, codes are written to the log instead (development only).",
                )
                .env("PROVISIO_NOTIFIER_URL"),
        )
        .arg(
            Arg::new(ARG_NOTIFIER_TOKEN)
                .long(ARG_NOTIFIER_TOKEN)
                .help("Bearer token sent to the mail relay")
                .env("PROVISIO_NOTIFIER_TOKEN")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_NOTIFIER_TIMEOUT_SECONDS)
                .long(ARG_NOTIFIER_TIMEOUT_SECONDS)
                .help("Upper bound for a single delivery attempt")
                .env("PROVISIO_NOTIFIER_TIMEOUT_SECONDS")
                .default_value("10")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_MAIL_FROM)
                .long(ARG_MAIL_FROM)
                .help("Sender address for code emails")
                .env("PROVISIO_MAIL_FROM")
                .default_value("no-reply@provisio.local"),
        )
}
