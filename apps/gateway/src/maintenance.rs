//! Background pruning of expired blocks, idle counters and idle buckets.

use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::MaintenanceConfig;
use crate::state::AppState;

/// Spawn the pruning loop. It runs until the runtime shuts down.
pub fn spawn(state: AppState, config: MaintenanceConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval = config.prune_interval();
        let bucket_idle = config.bucket_idle();
        loop {
            tokio::time::sleep(interval).await;
            run_once(&state, bucket_idle);
        }
    })
}

/// One pruning pass. Returns `(abuse_entries, buckets)` removed.
pub fn run_once(state: &AppState, bucket_idle: Duration) -> (usize, usize) {
    let abuse = state.gateway.abuse().prune();
    let buckets = state.limiter.store().prune_idle(bucket_idle);
    if abuse + buckets > 0 {
        debug!(
            abuse_entries = abuse,
            buckets,
            "Pruned idle auth state"
        );
    }
    (abuse, buckets)
}
