//! Idempotent expiry sweep for pending signals.

use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Mark `status=expired` where `expires_at < now` and `status=pending`,
/// every `interval_secs`, until `shutdown` flips true.
pub async fn run_expiry_sweep(
    pool: PgPool,
    interval_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(interval_secs, "signal expiry sweep starting");

    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("signal expiry sweep stopping");
                    return;
                }
                continue;
            }
        }

        match ata_db::signals::expire_pending(&pool, Utc::now()).await {
            Ok(0) => {}
            Ok(swept) => debug!(swept, "expired pending signals"),
            Err(e) => warn!(error = %e, "expiry sweep failed"),
        }
    }
}
