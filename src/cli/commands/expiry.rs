use clap::{Arg, ArgMatches, Command};

pub const ARG_CHALLENGE_TTL_SECONDS: &str = "challenge-ttl-seconds";
pub const ARG_STAGING_TTL_SECONDS: &str = "staging-ttl-seconds";
pub const ARG_SWEEP_INTERVAL_SECONDS: &str = "sweep-interval-seconds";
pub const ARG_STORE_TIMEOUT_SECONDS: &str = "store-timeout-seconds";

#[derive(Debug, Clone)]
pub struct Options {
    pub challenge_ttl_seconds: u64,
    pub staging_ttl_seconds: u64,
    pub sweep_interval_seconds: u64,
    pub store_timeout_seconds: u64,
}

impl Options {
    /// Parse expiry and timeout arguments from matches.
    ///
    /// Window ordering is checked later, when the windows are built.
    ///
    /// # Errors
    /// Returns an error if the store timeout is zero.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let get = |id: &str, default: u64| matches.get_one::<u64>(id).copied().unwrap_or(default);

        let store_timeout_seconds = get(ARG_STORE_TIMEOUT_SECONDS, 5);
        if store_timeout_seconds == 0 {
            anyhow::bail!("--{ARG_STORE_TIMEOUT_SECONDS} must be greater than zero");
        }

        Ok(Self {
            challenge_ttl_seconds: get(ARG_CHALLENGE_TTL_SECONDS, 60),
            staging_ttl_seconds: get(ARG_STAGING_TTL_SECONDS, 900),
            sweep_interval_seconds: get(ARG_SWEEP_INTERVAL_SECONDS, 30),
            store_timeout_seconds,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_CHALLENGE_TTL_SECONDS)
                .long(ARG_CHALLENGE_TTL_SECONDS)
                .help("Seconds a one-time code stays valid")
                .env("PROVISIO_CHALLENGE_TTL_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_STAGING_TTL_SECONDS)
                .long(ARG_STAGING_TTL_SECONDS)
                .help("Seconds a pending registration is kept")
                .long_help(
                    "Seconds a pending registration is kept. Must be longer than the code window, otherwise a registration could expire before its code.",
                )
                .env("PROVISIO_STAGING_TTL_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_SWEEP_INTERVAL_SECONDS)
                .long(ARG_SWEEP_INTERVAL_SECONDS)
                .help("Interval between purges of expired codes and registrations")
                .env("PROVISIO_SWEEP_INTERVAL_SECONDS")
                .default_value("30")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_STORE_TIMEOUT_SECONDS)
                .long(ARG_STORE_TIMEOUT_SECONDS)
                .help("Upper bound for a single store call, also used as the pool acquire timeout")
                .env("PROVISIO_STORE_TIMEOUT_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64)),
        )
}
