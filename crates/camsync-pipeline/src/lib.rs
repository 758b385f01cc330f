//! Image/pose synchronization pipeline.
//!
//! Images, camera intrinsics and trajectory updates arrive on independent channels and
//! are written into a [`SyncNode`] by one handler task each. [`run_sync_task`] ticks the
//! node at a fixed period; every tick pairs the buffered images with poses interpolated
//! from the trajectory and publishes them through a [`SyncSink`].

pub mod buffer;
pub mod error;
pub mod markers;
pub mod messages;
pub mod node;
pub mod trajectory;

use std::{sync::Arc, time::Duration};

use tokio::sync::{broadcast, mpsc};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

pub use buffer::{BufferState, EmitPolicy, TemporalImageBuffer};
pub use error::PipelineError;
pub use markers::{CornerLayout, MarkerBackend, MarkerFamily, MarkerObservation, detect_markers};
pub use messages::{
    CameraInfo, GraphNode, Header, ImageFrame, LocalizationResponse, MapRequest, MapSnapshot,
    MapUpdate, SyncedFrame, TransformStamped,
};
pub use node::{FrameIds, MissingInput, SyncConfig, SyncNode, SyncSink, TickReport};
pub use trajectory::Trajectory;

/// Default tick period of [`run_sync_task`].
pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_millis(10);

/// Ticks `node` every `period` and publishes its outputs through `sink`.
///
/// # Arguments
/// * `node` - Shared node state, written concurrently by the handler tasks.
/// * `sink` - Output side for images, intrinsics, transforms and synced frames.
/// * `period` - Tick period.
/// * `report_tx` - Receives the report of every tick, if anyone is subscribed.
///
/// # Errors
///
/// Returns `PipelineError::InvalidConfig` for a zero `period`.
pub async fn run_sync_task(
    node: Arc<SyncNode>,
    sink: Arc<dyn SyncSink>,
    period: Duration,
    report_tx: broadcast::Sender<Arc<TickReport>>,
) -> anyhow::Result<()> {
    if period.is_zero() {
        return Err(PipelineError::InvalidConfig("tick period must be non-zero").into());
    }
    info!(period_ms = period.as_millis() as u64, "Sync task started");
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let report = node.tick(sink.as_ref());
        if report.emitted > 0 {
            debug!(
                emitted = report.emitted,
                skipped = report.skipped,
                pending = report.pending,
                "Tick published frames"
            );
        }
        if report_tx.receiver_count() > 0 {
            if let Err(e) = report_tx.send(Arc::new(report)) {
                warn!("Failed to publish tick report: {}", e);
            }
        }
    }
}

/// Feeds trajectory updates into `node` until the channel closes.
pub async fn run_map_update_handler(
    node: Arc<SyncNode>,
    mut rx: broadcast::Receiver<Arc<MapUpdate>>,
) -> anyhow::Result<()> {
    forward("mapData", &mut rx, |update| node.on_map_update(update)).await
}

/// Feeds images into `node` until the channel closes.
pub async fn run_image_handler(
    node: Arc<SyncNode>,
    mut rx: broadcast::Receiver<Arc<ImageFrame>>,
) -> anyhow::Result<()> {
    forward("image", &mut rx, |frame| {
        let stamp = frame.stamp();
        if !node.on_image(frame.as_ref().clone()) {
            debug!(stamp, "Image rejected by rate limit");
        }
    })
    .await
}

/// Feeds camera intrinsics into `node` until the channel closes.
pub async fn run_camera_info_handler(
    node: Arc<SyncNode>,
    mut rx: broadcast::Receiver<Arc<CameraInfo>>,
) -> anyhow::Result<()> {
    forward("camera_info", &mut rx, |info| {
        if let Err(e) = node.on_camera_info(info.as_ref().clone()) {
            warn!("Rejected camera info: {}", e);
        }
    })
    .await
}

/// Answers "get current map" requests until every requester is gone.
pub async fn run_map_service(
    node: Arc<SyncNode>,
    mut rx: mpsc::Receiver<MapRequest>,
) -> anyhow::Result<()> {
    info!("Map service started");
    while let Some(request) = rx.recv().await {
        let snapshot = node.current_map();
        debug!(poses = snapshot.poses.len(), "Answering map request");
        if request.reply.send(snapshot).is_err() {
            warn!("Map requester dropped before the reply was sent");
        }
    }
    info!("Map request channel closed, map service stopped");
    Ok(())
}

async fn forward<T>(
    topic: &'static str,
    rx: &mut broadcast::Receiver<Arc<T>>,
    mut handle: impl FnMut(Arc<T>),
) -> anyhow::Result<()> {
    loop {
        match rx.recv().await {
            Ok(message) => handle(message),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Receiver for {} lagged by {} messages.", topic, n);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => {
                tracing::error!("{} channel closed. Handler cannot continue.", topic);
                return Err(PipelineError::ChannelClosed(topic).into());
            }
        }
    }
}
