//! Background removal of stale challenges and staging records.
//!
//! Reads already ignore stale rows, so the sweeper only reclaims space.

use anyhow::Result;
use std::{sync::Arc, time::Duration};
use tokio::time::sleep;
use tracing::{debug, error};

use super::store::{CodeStore, StagingStore};

/// Run `sweep_once` forever on a fixed cadence.
pub fn spawn(
    staging: Arc<dyn StagingStore>,
    codes: Arc<dyn CodeStore>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let interval = if interval.is_zero() {
            Duration::from_secs(1)
        } else {
            interval
        };

        loop {
            sleep(interval).await;

            if let Err(err) = sweep_once(staging.as_ref(), codes.as_ref()).await {
                error!("expiry sweep failed: {err:#}");
            }
        }
    })
}

/// Purge both stores once, returning `(challenges, staging)` removed.
///
/// # Errors
/// Returns the first store error; the other store may already have been purged.
pub async fn sweep_once(staging: &dyn StagingStore, codes: &dyn CodeStore) -> Result<(u64, u64)> {
    let challenges = codes.purge_expired().await?;
    let registrations = staging.purge_expired().await?;
    if challenges > 0 || registrations > 0 {
        debug!(challenges, registrations, "purged expired records");
    }
    Ok((challenges, registrations))
}
