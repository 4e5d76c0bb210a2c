use crate::{
    api,
    cli::commands::{expiry, notifier, token},
    provision::{
        ProvisionConfig, Provisioner, Stores,
        hasher::Argon2Hasher,
        notifier::{LogNotifier, Notifier, WebhookNotifier},
        store::{MemoryStore, PgStore, SystemClock, Windows},
        sweeper,
        token::JwtMinter,
    },
};
use anyhow::{Context, Result};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<String>,
    pub apply_schema: bool,
    pub cors_origin: Option<String>,
    pub token: token::Options,
    pub expiry: expiry::Options,
    pub notifier: notifier::Options,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the configuration is inconsistent, the database is
/// unreachable, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let windows = Windows::new(
        Duration::from_secs(args.expiry.challenge_ttl_seconds),
        Duration::from_secs(args.expiry.staging_ttl_seconds),
    )
    .context("Invalid expiry windows")?;
    let store_timeout = Duration::from_secs(args.expiry.store_timeout_seconds);
    let notifier_timeout = Duration::from_secs(args.notifier.timeout_seconds);

    let cors_origin = args
        .cors_origin
        .as_deref()
        .map(api::cors_origin)
        .transpose()?;

    let stores = match args.dsn.as_deref() {
        Some(dsn) => {
            let store = PgStore::connect(dsn, store_timeout, windows)
                .await
                .context("Failed to connect to database")?;
            if args.apply_schema {
                store
                    .apply_schema()
                    .await
                    .context("Failed to apply database schema")?;
                info!("Database schema applied");
            }
            Stores::shared(Arc::new(store))
        }
        None => {
            if args.apply_schema {
                warn!("Ignoring --apply-schema: no DSN configured");
            }
            warn!("No DSN configured, using the in-memory store; state is lost on restart");
            Stores::shared(Arc::new(MemoryStore::new(windows, Arc::new(SystemClock))))
        }
    };

    let code_notifier: Arc<dyn Notifier> = match args.notifier.url {
        Some(url) => Arc::new(WebhookNotifier::new(
            url,
            args.notifier.token,
            args.notifier.from,
            notifier_timeout,
        )?),
        None => {
            warn!("No notifier URL configured, one-time codes are written to the log");
            Arc::new(LogNotifier)
        }
    };

    let minter = Arc::new(JwtMinter::new(
        &args.token.secret,
        args.token.issuer,
        Duration::from_secs(args.token.ttl_seconds),
    ));

    let config = ProvisionConfig::new(windows)
        .with_store_timeout(store_timeout)
        .with_notifier_timeout(notifier_timeout);
    debug!("Provisioning config: {:?}", config);

    let sweeper = sweeper::spawn(
        stores.staging.clone(),
        stores.codes.clone(),
        Duration::from_secs(args.expiry.sweep_interval_seconds),
    );

    let provisioner = Arc::new(Provisioner::new(
        stores,
        Arc::new(Argon2Hasher::new()),
        code_notifier,
        minter,
        config,
    ));

    let result = api::new(args.port, provisioner, cors_origin).await;
    sweeper.abort();
    result
}
