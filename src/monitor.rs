use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use camsync_pipeline::{SyncedFrame, TickReport};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::blackboard::{Blackboard, raise_fault, record_synced, record_tick, snapshot};

/// Folds tick reports into the blackboard.
pub async fn record_reports(
    bb: Blackboard,
    mut report_rx: broadcast::Receiver<Arc<TickReport>>,
) -> anyhow::Result<()> {
    info!("Report recorder started.");
    loop {
        match report_rx.recv().await {
            Ok(report) => record_tick(&bb, &report),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Report receiver lagged by {} messages.", n);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => {
                tracing::error!("Tick report channel closed. Recorder cannot continue.");
                return Err(anyhow::anyhow!("Tick report channel closed"));
            }
        }
    }
}

/// Consumes the synced output topic.
pub async fn consume_synced(
    bb: Blackboard,
    mut synced_rx: broadcast::Receiver<Arc<SyncedFrame>>,
) -> anyhow::Result<()> {
    loop {
        match synced_rx.recv().await {
            Ok(frame) => {
                let center = frame.projection.camera_center();
                debug!(
                    stamp = frame.image.stamp(),
                    x = center.x,
                    y = center.y,
                    z = center.z,
                    "Synced frame received"
                );
                record_synced(&bb, frame.image.stamp());
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Synced frame receiver lagged by {} messages.", n);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => {
                return Err(anyhow::anyhow!("Synced frame channel closed"));
            }
        }
    }
}

/// Periodically logs run statistics and flags a stalled sync loop.
pub async fn watchdog(bb: Blackboard, period: Duration, stall_timeout: Duration) -> anyhow::Result<()> {
    info!("Watchdog task started.");
    let mut tick = tokio::time::interval(period);
    loop {
        tick.tick().await;
        let state = snapshot(&bb);
        let age = Instant::now() - state.last_tick_ts;
        if age > stall_timeout {
            warn!(?age, ticks = state.ticks, "Sync loop stalled!");
            raise_fault(&bb, "sync tick stalled");
        }
        info!(
            ticks = state.ticks,
            emitted = state.frames_emitted,
            skipped = state.frames_skipped,
            pending = state.pending_images,
            trajectory_nodes = state.trajectory_nodes,
            last_synced = ?state.last_synced_stamp,
            faults = state.faults.len(),
            "Sync statistics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_reports_until_closed() {
        let bb: Blackboard = Arc::default();
        let (tx, rx) = broadcast::channel(4);
        let task = tokio::spawn(record_reports(bb.clone(), rx));

        tx.send(Arc::new(TickReport {
            emitted: 3,
            ..TickReport::default()
        }))
        .unwrap();
        drop(tx);

        assert!(task.await.unwrap().is_err());
        let state = snapshot(&bb);
        assert_eq!(state.ticks, 1);
        assert_eq!(state.frames_emitted, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_raises_stall_fault() {
        let bb: Blackboard = Arc::default();
        bb.write().last_tick_ts = Instant::now() - Duration::from_secs(5);

        let task = tokio::spawn(watchdog(bb.clone(), Duration::from_millis(100), Duration::from_millis(500)));
        tokio::time::sleep(Duration::from_millis(10)).await;
        task.abort();

        assert_eq!(snapshot(&bb).faults, vec!["sync tick stalled".to_string()]);
    }
}
