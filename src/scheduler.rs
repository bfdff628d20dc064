use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::Engine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionPolicy {
    /// Appends since the last compaction that trigger the next one.
    pub threshold: u64,
    /// How often the threshold is checked.
    pub interval: Duration,
}

/// Periodic housekeeping for one tenant: WAL compaction and pruning of idle notify channels.
pub async fn run_compactor(engine: Arc<Engine>, policy: CompactionPolicy, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(policy.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("compactor stopped");
                return;
            }
            _ = ticker.tick() => {}
        }

        engine.notify.prune();
        let appends = engine.wal_appends_since_compact().await;
        if appends < policy.threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => {
                metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
                info!("compacted WAL after {appends} appends");
            }
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
    }
}
