use std::sync::Arc;

use camsync_pipeline::{CameraInfo, ImageFrame, SyncSink, SyncedFrame, TransformStamped};
use tokio::sync::broadcast;
use tracing::trace;

/// Broadcast topic with bounded capacity.
/// `T` must be `Send + Sync` because we hop across threads.
#[derive(Debug, Clone)]
pub struct Topic<T> {
    name: Arc<str>,
    tx: broadcast::Sender<Arc<T>>,
}

impl<T: Send + Sync + 'static> Topic<T> {
    pub fn new(name: &str, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            name: Arc::from(name),
            tx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn publish(&self, msg: T) {
        if self.tx.send(Arc::new(msg)).is_err() {
            trace!(topic = %self.name, "No subscribers, message dropped");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<T>> {
        self.tx.subscribe()
    }
}

/// Output topics of the sync node.
#[derive(Debug, Clone)]
pub struct OutputTopics {
    pub image: Topic<ImageFrame>,
    pub camera_info: Topic<CameraInfo>,
    pub tf: Topic<TransformStamped>,
    pub synced: Topic<SyncedFrame>,
}

impl SyncSink for OutputTopics {
    fn publish_image(&self, image: ImageFrame) {
        self.image.publish(image);
    }

    fn publish_camera_info(&self, info: CameraInfo) {
        self.camera_info.publish(info);
    }

    fn send_transform(&self, transform: TransformStamped) {
        self.tf.publish(transform);
    }

    fn publish_synced(&self, frame: SyncedFrame) {
        self.synced.publish(frame);
    }
}
