//! Periodic deadline sweeper.
//!
//! Expiry is also checked lazily inside every mutating operation; the
//! sweeper exists so bounties nobody touches still get cancelled and
//! refunded. Both paths run the same per-cell expiry logic under the same
//! ownership token, so a sweep racing a request cannot double-refund.

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::state::SharedHandle;

/// Spawns the sweeper task. It ticks at the configured interval and exits
/// on shutdown.
pub fn spawn(handle: SharedHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(handle.coordinator().config().sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let cancelled = handle.coordinator().sweep_expired().await;
                    if cancelled > 0 {
                        info!(cancelled, "deadline sweep cancelled expired bounties");
                    }
                }
                () = handle.shutdown_notified() => break,
            }
        }
    })
}
