use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use deskmate_db::NudgeStore;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info};

const RETRY_AFTER_ERROR: Duration = Duration::from_secs(60);

/// Run one stale-claim scan and return how many reminders were created.
pub async fn scan_once(store: &Mutex<NudgeStore>, stale_after_days: i64) -> deskmate_common::Result<usize> {
    let created = store
        .lock()
        .await
        .scan_for_stale_claims(Utc::now(), stale_after_days)?;
    if !created.is_empty() {
        info!("created {} claim reminder(s)", created.len());
    }
    Ok(created.len())
}

/// Scan immediately, then every `interval`. A failed scan is retried after a minute.
pub fn spawn_nudge_scanner(
    store: Arc<Mutex<NudgeStore>>,
    interval: Duration,
    stale_after_days: i64,
) -> JoinHandle<()> {
    info!(
        "nudge scanner running every {}s (claims pending > {} days)",
        interval.as_secs(),
        stale_after_days
    );
    tokio::spawn(async move {
        loop {
            let wait = match scan_once(&store, stale_after_days).await {
                Ok(_) => interval,
                Err(e) => {
                    error!("nudge scan failed: {}", e);
                    RETRY_AFTER_ERROR.min(interval)
                }
            };
            tokio::time::sleep(wait).await;
        }
    })
}
