//! Scheduled cleanup of expired blacklist entries.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::blacklist::TokenBlacklist;

/// Interval between cleanup runs.
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(10 * 60); // 10 minutes

/// Run cleanup once. Returns the number of entries removed.
pub fn run_cleanup(blacklist: &dyn TokenBlacklist) -> usize {
    match blacklist.cleanup() {
        Ok(count) => {
            if count > 0 {
                info!("Cleaned up {} expired blacklist entries", count);
            }
            count
        }
        Err(e) => {
            error!("Failed to clean up blacklist: {}", e);
            0
        }
    }
}

/// Spawn a background task that runs cleanup periodically.
/// The first run happens one full interval after spawning.
/// Returns a handle that can be used to abort the task.
pub fn spawn_cleanup_scheduler(
    blacklist: Arc<dyn TokenBlacklist>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            interval.tick().await;
            run_cleanup(blacklist.as_ref());
        }
    })
}
