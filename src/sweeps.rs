//! Background sweeps that keep quote state honest over time.
//!
//! Expired pricing locks are reclaimed every few minutes so a crashed or
//! distracted manager cannot park a quote forever. Lapsed approvals are
//! swept daily; each flip uses the conversion guard, so a client converting
//! at the same moment wins or loses cleanly, never both.

use crate::services::{quote_locks::QuoteLockService, quotes::QuoteService};
use std::time::Duration;
use tracing::{error, info};

/// How often expired pricing locks are reclaimed.
pub const LOCK_REAPER_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// How often lapsed approvals are swept.
pub const QUOTE_EXPIRY_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Background worker that releases expired pricing locks.
pub fn start_lock_reaper(service: QuoteLockService) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(LOCK_REAPER_INTERVAL);
        info!(
            interval_secs = LOCK_REAPER_INTERVAL.as_secs(),
            "Lock reaper started"
        );
        loop {
            ticker.tick().await;
            if let Err(e) = service.cleanup_expired_locks().await {
                error!(error = %e, "Lock reaper sweep failed");
            }
        }
    });
}

/// Background worker that rejects approved quotes whose validity lapsed.
pub fn start_quote_expiry_sweep(service: QuoteService) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(QUOTE_EXPIRY_INTERVAL);
        info!(
            interval_secs = QUOTE_EXPIRY_INTERVAL.as_secs(),
            "Quote expiry sweep started"
        );
        loop {
            ticker.tick().await;
            if let Err(e) = service.expire_approved_quotes().await {
                error!(error = %e, "Quote expiry sweep failed");
            }
        }
    });
}
