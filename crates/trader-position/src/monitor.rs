//! The monitoring loop: one task per position manager.
//!
//! Each cycle updates every active position's price, advances trailing
//! stops, and closes anything whose stop-loss or take-profit has fired.
//! Connector faults are logged and the cycle moves on; a slow cycle skips
//! ticks rather than queueing them; a position already closing is never
//! re-entered.

use crate::manager::PositionManager;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use trader_persistence::ExitReason;

/// How long `stop` waits for the in-flight cycle before giving up.
const SHUTDOWN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Handle to the monitoring task; the owner cancels and awaits it.
pub struct MonitorHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Spawn the monitoring loop for `manager`.
    pub fn spawn(manager: Arc<PositionManager>) -> Self {
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            run_monitor(manager, task_cancel).await;
        });
        Self { cancel, task }
    }

    /// Cancel at the next suspension point and wait, bounded by the
    /// shutdown timeout.
    pub async fn stop(self) {
        self.cancel.cancel();
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, self.task).await.is_err() {
            warn!("position monitor did not stop within the shutdown timeout");
        }
    }
}

async fn run_monitor(manager: Arc<PositionManager>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(manager.update_interval());
    // Skip rather than queue when a cycle overruns.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        interval_ms = manager.update_interval().as_millis() as u64,
        "position monitor started"
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("position monitor stopped");
                return;
            }
            _ = ticker.tick() => {
                run_cycle(&manager).await;
            }
        }
    }
}

async fn run_cycle(manager: &Arc<PositionManager>) {
    for id in manager.active_ids() {
        let snapshot = match manager.update_position(id, None).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                // Tolerate faults: log and move to the next position; the
                // next cycle retries.
                warn!(position_id = %id, error = %e, "monitor price update failed");
                continue;
            }
        };

        let price = snapshot.position.current_price;
        let reason = if snapshot.stop_loss_triggered(price) {
            Some(ExitReason::StopLoss)
        } else if snapshot.take_profit_triggered(price) {
            Some(ExitReason::TakeProfit)
        } else {
            None
        };

        let Some(reason) = reason else { continue };
        debug!(position_id = %id, %price, %reason, "protective exit triggered");
        match manager.close_position(id, reason).await {
            Ok(realized) => {
                info!(position_id = %id, %reason, %realized, "monitor closed position");
            }
            Err(crate::PositionError::AlreadyClosing(_)) => {
                // Another path is closing it; fine.
            }
            Err(e) => {
                warn!(position_id = %id, error = %e, "monitor close failed");
            }
        }
    }
}
