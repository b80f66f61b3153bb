//! Background compaction of namespaces flagged by removals.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::debug;

use crate::Engine;

/// Compact flagged namespaces every `period` until the handle is aborted.
///
/// Must be called from within a tokio runtime.
pub fn spawn_reindex_sweeper(engine: Arc<Engine>, period: Duration) -> JoinHandle<()> {
    let period = period.max(Duration::from_millis(1));
    tokio::spawn(async move {
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let compacted = engine.reindex_pending();
            if compacted > 0 {
                debug!(compacted, "reindex sweep");
            }
        }
    })
}
