//! The synchronization node: pairs buffered images with interpolated camera poses.

use std::sync::Arc;

use camsync_geometry::{CameraProjection, Pose, StampedPose};
use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::buffer::{DEFAULT_CAPACITY, DEFAULT_RATE_HZ, EmitPolicy, TemporalImageBuffer};
use crate::error::PipelineError;
use crate::messages::{
    CameraInfo, ImageFrame, MapSnapshot, MapUpdate, SyncedFrame, TransformStamped,
};
use crate::trajectory::{DEFAULT_RETENTION_SECS, Trajectory};

/// Rotation of the camera frame in the body frame, `[qx, qy, qz, qw]`.
///
/// Maps the optical convention (z forward, x right, y down) onto the body convention
/// (x forward, y left, z up).
pub const CAMERA_MOUNT_XYZW: [f64; 4] = [0.5, -0.5, 0.5, -0.5];

/// Static body-to-camera transform: no translation, [`CAMERA_MOUNT_XYZW`] rotation.
pub fn camera_mount() -> Pose {
    let [x, y, z, w] = CAMERA_MOUNT_XYZW;
    Pose::new(
        Vector3::zeros(),
        UnitQuaternion::new_normalize(Quaternion::new(w, x, y, z)),
    )
}

/// Names of the frames the node publishes transforms between.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FrameIds {
    pub map: String,
    pub odom: String,
    pub body: String,
    pub camera: String,
}

impl Default for FrameIds {
    fn default() -> Self {
        Self {
            map: "map".to_owned(),
            odom: "odom2".to_owned(),
            body: "asa_baselink".to_owned(),
            camera: "asa_camera".to_owned(),
        }
    }
}

/// Runtime parameters of a [`SyncNode`].
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    pub buffer_capacity: usize,
    pub buffer_rate_hz: f64,
    pub emit_policy: EmitPolicy,
    /// Trajectory retention window in seconds, `None` for unbounded
    pub retention_secs: Option<f64>,
    pub frames: FrameIds,
    /// Pose of the camera in the body frame
    pub camera_mount: Pose,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_CAPACITY,
            buffer_rate_hz: DEFAULT_RATE_HZ,
            emit_policy: EmitPolicy::default(),
            retention_secs: Some(DEFAULT_RETENTION_SECS),
            frames: FrameIds::default(),
            camera_mount: camera_mount(),
        }
    }
}

/// Output side of the node.
///
/// Implementations forward to whatever transport the deployment uses; they must not
/// block.
pub trait SyncSink: Send + Sync {
    fn publish_image(&self, image: ImageFrame);
    fn publish_camera_info(&self, info: CameraInfo);
    fn send_transform(&self, transform: TransformStamped);
    fn publish_synced(&self, frame: SyncedFrame);
}

/// Input that prevented a tick from emitting anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingInput {
    /// No map update received yet
    MapToOdom,
    /// No camera info received yet
    CameraInfo,
    /// The image buffer is empty
    Images,
}

/// Outcome of one [`SyncNode::tick`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    /// A new trajectory node was appended during this tick
    pub appended: bool,
    /// Frames published
    pub emitted: usize,
    /// Buffered frames without a valid pose
    pub skipped: usize,
    /// Frames still buffered after the tick
    pub pending: usize,
    pub missing: Option<MissingInput>,
}

/// Trajectory plus the latest map correction, updated together once per tick.
#[derive(Debug)]
struct MapState {
    trajectory: Trajectory,
    map_to_odom: Option<Pose>,
}

/// Per-loop state of the synchronization subsystem.
///
/// Each item is behind its own lock and written by exactly one handler; there is no
/// atomicity across items.
pub struct SyncNode {
    config: SyncConfig,
    /// Latest map update not yet folded into the trajectory
    latest_update: Mutex<Option<Arc<MapUpdate>>>,
    map: RwLock<MapState>,
    images: Mutex<TemporalImageBuffer>,
    camera_info: RwLock<Option<CameraInfo>>,
}

impl SyncNode {
    /// Creates a node with empty state.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::InvalidConfig` for a zero buffer capacity, a non-positive
    /// rate or a negative retention window.
    pub fn new(config: SyncConfig) -> Result<Self, PipelineError> {
        if config.retention_secs.is_some_and(|r| r.is_nan() || r < 0.0) {
            return Err(PipelineError::InvalidConfig(
                "retention window must be non-negative",
            ));
        }
        let images = TemporalImageBuffer::new(config.buffer_capacity, config.buffer_rate_hz)?;
        let trajectory =
            Trajectory::new(config.frames.odom.clone()).with_retention(config.retention_secs);
        info!(
            capacity = config.buffer_capacity,
            rate_hz = config.buffer_rate_hz,
            policy = ?config.emit_policy,
            "Sync node initialized"
        );
        Ok(Self {
            config,
            latest_update: Mutex::new(None),
            map: RwLock::new(MapState {
                trajectory,
                map_to_odom: None,
            }),
            images: Mutex::new(images),
            camera_info: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Stores the newest map update; it is folded into the trajectory by the next tick.
    pub fn on_map_update(&self, update: Arc<MapUpdate>) {
        if let Some(replaced) = self.latest_update.lock().replace(update) {
            debug!(nodes = replaced.nodes.len(), "Unconsumed map update replaced");
        }
    }

    /// Offers an image to the buffer; returns whether it was admitted.
    pub fn on_image(&self, frame: ImageFrame) -> bool {
        self.images.lock().offer(frame)
    }

    /// Replaces the camera intrinsics.
    ///
    /// # Errors
    ///
    /// Returns the geometry error if the intrinsics are singular; the previous intrinsics
    /// are kept in that case.
    pub fn on_camera_info(&self, info: CameraInfo) -> Result<(), PipelineError> {
        info.intrinsics.validate()?;
        *self.camera_info.write() = Some(info);
        Ok(())
    }

    /// Runs one synchronization step and publishes its outputs through `sink`.
    ///
    /// For every buffered frame covered by the trajectory this publishes, in order: the
    /// re-stamped image, the map-to-odom, odom-to-body and body-to-camera transforms,
    /// the re-stamped camera info and the synced frame. Frames the trajectory does not
    /// cover yet are skipped and stay buffered.
    pub fn tick(&self, sink: &dyn SyncSink) -> TickReport {
        let mut report = TickReport {
            appended: self.fold_map_update(),
            ..TickReport::default()
        };

        let map_to_odom = self.map.read().map_to_odom;
        let camera_info = self.camera_info.read().clone();
        let frames = self.images.lock().drain_all();

        let (map_to_odom, camera_info) = match (map_to_odom, camera_info) {
            (None, _) => return self.missing(report, MissingInput::MapToOdom),
            (_, None) => return self.missing(report, MissingInput::CameraInfo),
            (Some(_), Some(_)) if frames.is_empty() => {
                return self.missing(report, MissingInput::Images);
            }
            (Some(map_to_odom), Some(camera_info)) => (map_to_odom, camera_info),
        };

        let mut emitted = Vec::new();
        {
            let map = self.map.read();
            for frame in &frames {
                let Some(body_pose) = map.trajectory.interpolate(frame.stamp()) else {
                    report.skipped += 1;
                    continue;
                };
                match self.emit(sink, frame, body_pose, &map_to_odom, &camera_info) {
                    Ok(()) => emitted.push(frame.stamp()),
                    Err(e) => {
                        warn!(stamp = frame.stamp(), error = %e, "Failed to synchronize image");
                        report.skipped += 1;
                    }
                }
            }
        }

        report.emitted = emitted.len();
        let mut images = self.images.lock();
        if self.config.emit_policy == EmitPolicy::DropEmitted {
            images.remove_emitted(&emitted);
        }
        report.pending = images.len();
        report
    }

    /// Copy of the current trajectory and map correction.
    pub fn current_map(&self) -> MapSnapshot {
        let map = self.map.read();
        MapSnapshot {
            frame_id: map.trajectory.frame_id().to_owned(),
            poses: map.trajectory.poses().copied().collect(),
            map_to_odom: map.map_to_odom,
        }
    }

    pub fn pending_images(&self) -> usize {
        self.images.lock().len()
    }

    /// Appends the newest node of a pending map update; returns whether one was consumed.
    fn fold_map_update(&self) -> bool {
        let Some(update) = self.latest_update.lock().take() else {
            return false;
        };

        let mut map = self.map.write();
        map.map_to_odom = Some(update.map_to_odom);
        let Some(node) = update.newest() else {
            return false;
        };
        if map.trajectory.last_stamp().is_some_and(|last| node.stamp < last) {
            warn!(
                id = node.id,
                stamp = node.stamp,
                "Map node older than trajectory end, ignoring"
            );
            return false;
        }
        map.trajectory.append(StampedPose::new(node.stamp, node.pose));
        debug!(id = node.id, stamp = node.stamp, len = map.trajectory.len(), "Trajectory node appended");
        true
    }

    fn missing(&self, mut report: TickReport, missing: MissingInput) -> TickReport {
        report.missing = Some(missing);
        report.pending = self.images.lock().len();
        report
    }

    fn emit(
        &self,
        sink: &dyn SyncSink,
        frame: &ImageFrame,
        body_pose: StampedPose,
        map_to_odom: &Pose,
        camera_info: &CameraInfo,
    ) -> Result<(), PipelineError> {
        let frames = &self.config.frames;
        let stamp = body_pose.stamp;

        let camera_pose = map_to_odom
            .compose(&body_pose.pose)
            .compose(&self.config.camera_mount);
        let projection = CameraProjection::from_pose(&camera_pose, &camera_info.intrinsics)?;

        let image = frame.restamped(stamp, &frames.camera);
        let camera_info = camera_info.restamped(stamp);

        sink.publish_image(image.clone());
        sink.send_transform(TransformStamped::new(stamp, &frames.map, &frames.odom, *map_to_odom));
        sink.send_transform(TransformStamped::new(stamp, &frames.odom, &frames.body, body_pose.pose));
        sink.send_transform(TransformStamped::new(
            stamp,
            &frames.body,
            &frames.camera,
            self.config.camera_mount,
        ));
        sink.publish_camera_info(camera_info.clone());
        sink.publish_synced(SyncedFrame {
            image,
            body_pose,
            camera_pose,
            camera_info,
            projection,
        });

        debug!(stamp, camera_pose = %camera_pose, "Image synchronized");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::messages::{GraphNode, Header};
    use camsync_geometry::Intrinsics;
    use core::f64::consts::FRAC_PI_2;

    const EPSILON: f64 = 1e-9;

    /// Sink that records everything published.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub images: Mutex<Vec<ImageFrame>>,
        pub infos: Mutex<Vec<CameraInfo>>,
        pub transforms: Mutex<Vec<TransformStamped>>,
        pub synced: Mutex<Vec<SyncedFrame>>,
    }

    impl SyncSink for RecordingSink {
        fn publish_image(&self, image: ImageFrame) {
            self.images.lock().push(image);
        }
        fn publish_camera_info(&self, info: CameraInfo) {
            self.infos.lock().push(info);
        }
        fn send_transform(&self, transform: TransformStamped) {
            self.transforms.lock().push(transform);
        }
        fn publish_synced(&self, frame: SyncedFrame) {
            self.synced.lock().push(frame);
        }
    }

    pub(crate) fn frame(stamp: f64) -> ImageFrame {
        ImageFrame::new(Header::new(stamp, "camera"), 2, 2, "mono8", Arc::from(vec![0u8; 4]))
    }

    pub(crate) fn camera_info() -> CameraInfo {
        CameraInfo {
            header: Header::new(0.0, "camera"),
            width: 640,
            height: 480,
            intrinsics: Intrinsics::new(525.0, 525.0, 319.5, 239.5),
        }
    }

    pub(crate) fn update(id: i64, stamp: f64, x: f64) -> Arc<MapUpdate> {
        Arc::new(MapUpdate {
            nodes: vec![GraphNode {
                id,
                stamp,
                pose: Pose::new(Vector3::new(x, 0.0, 0.0), UnitQuaternion::identity()),
            }],
            map_to_odom: Pose::identity(),
        })
    }

    fn node(policy: EmitPolicy) -> SyncNode {
        SyncNode::new(SyncConfig {
            emit_policy: policy,
            ..SyncConfig::default()
        })
        .unwrap()
    }

    fn ready_node(policy: EmitPolicy, sink: &RecordingSink) -> SyncNode {
        let node = node(policy);
        node.on_camera_info(camera_info()).unwrap();
        node.on_map_update(update(1, 0.0, 0.0));
        node.tick(sink);
        node.on_map_update(update(2, 10.0, 10.0));
        node.tick(sink);
        node
    }

    #[test]
    fn test_camera_mount_rotation() {
        let mount = camera_mount();
        // camera z (optical axis) is body x, camera x is body -y
        let forward = mount.orientation() * Vector3::z();
        let right = mount.orientation() * Vector3::x();
        assert!((forward - Vector3::x()).norm() < EPSILON);
        assert!((right + Vector3::y()).norm() < EPSILON);
    }

    #[test]
    fn test_missing_inputs_emit_nothing() {
        let sink = RecordingSink::default();
        let node = node(EmitPolicy::Retain);
        node.on_image(frame(0.0));

        let report = node.tick(&sink);
        assert_eq!(report.missing, Some(MissingInput::MapToOdom));

        node.on_map_update(update(1, 0.0, 0.0));
        let report = node.tick(&sink);
        assert!(report.appended);
        assert_eq!(report.missing, Some(MissingInput::CameraInfo));

        assert!(sink.images.lock().is_empty());
        assert_eq!(node.pending_images(), 1);
    }

    #[test]
    fn test_empty_buffer_reports_missing_images() {
        let sink = RecordingSink::default();
        let node = ready_node(EmitPolicy::Retain, &sink);
        let report = node.tick(&sink);
        assert_eq!(report.missing, Some(MissingInput::Images));
        assert!(!report.appended);
    }

    #[test]
    fn test_tick_emits_interpolated_frame() {
        let sink = RecordingSink::default();
        let node = ready_node(EmitPolicy::Retain, &sink);
        assert!(node.on_image(frame(5.0)));

        let report = node.tick(&sink);
        assert_eq!(report.emitted, 1);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.pending, 1);

        let images = sink.images.lock();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].stamp(), 5.0);
        assert_eq!(images[0].header.frame_id, "asa_camera");

        let transforms = sink.transforms.lock();
        let chain: Vec<(&str, &str)> = transforms
            .iter()
            .map(|t| (t.header.frame_id.as_str(), t.child_frame_id.as_str()))
            .collect();
        assert_eq!(
            chain,
            vec![("map", "odom2"), ("odom2", "asa_baselink"), ("asa_baselink", "asa_camera")]
        );
        assert!(transforms.iter().all(|t| t.header.stamp == 5.0));
        assert!((transforms[1].transform.position() - Vector3::new(5.0, 0.0, 0.0)).norm() < EPSILON);

        let infos = sink.infos.lock();
        assert_eq!(infos[0].header.stamp, 5.0);

        let synced = sink.synced.lock();
        let frame = &synced[0];
        assert!((frame.camera_pose.position() - Vector3::new(5.0, 0.0, 0.0)).norm() < EPSILON);
        // the camera looks along body +x
        let axis = frame.projection.rotation().transpose() * Vector3::z();
        assert!((axis - Vector3::x()).norm() < EPSILON);
    }

    #[test]
    fn test_frames_outside_trajectory_stay_buffered() {
        let sink = RecordingSink::default();
        let node = ready_node(EmitPolicy::DropEmitted, &sink);
        node.on_image(frame(5.0));
        node.on_image(frame(12.0));

        let report = node.tick(&sink);
        assert_eq!(report.emitted, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.pending, 1);

        // the trajectory catches up with the second frame
        node.on_map_update(update(3, 20.0, 20.0));
        let report = node.tick(&sink);
        assert!(report.appended);
        assert_eq!(report.emitted, 1);
        assert_eq!(report.pending, 0);
        assert_eq!(sink.images.lock()[1].stamp(), 12.0);
    }

    #[test]
    fn test_retain_policy_republishes() {
        let sink = RecordingSink::default();
        let node = ready_node(EmitPolicy::Retain, &sink);
        node.on_image(frame(5.0));
        node.tick(&sink);
        node.tick(&sink);
        assert_eq!(sink.images.lock().len(), 2);
        assert_eq!(node.pending_images(), 1);
    }

    #[test]
    fn test_map_update_consumed_once() {
        let sink = RecordingSink::default();
        let node = ready_node(EmitPolicy::Retain, &sink);
        assert_eq!(node.current_map().poses.len(), 2);

        node.on_map_update(update(3, 11.0, 11.0));
        assert!(node.tick(&sink).appended);
        assert!(!node.tick(&sink).appended);
        assert_eq!(node.current_map().poses.len(), 3);
    }

    #[test]
    fn test_stale_map_node_ignored() {
        let sink = RecordingSink::default();
        let node = ready_node(EmitPolicy::Retain, &sink);
        node.on_map_update(update(3, 4.0, 4.0));
        assert!(!node.tick(&sink).appended);
        assert_eq!(node.current_map().poses.len(), 2);
    }

    #[test]
    fn test_current_map_snapshot() {
        let sink = RecordingSink::default();
        let node = node(EmitPolicy::Retain);
        let empty = node.current_map();
        assert!(empty.poses.is_empty());
        assert!(empty.map_to_odom.is_none());

        let mut update = (*update(1, 0.0, 1.0)).clone();
        update.map_to_odom = Pose::new(
            Vector3::new(0.0, 2.0, 0.0),
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), FRAC_PI_2),
        );
        node.on_map_update(Arc::new(update.clone()));
        node.tick(&sink);

        let snapshot = node.current_map();
        assert_eq!(snapshot.frame_id, "odom2");
        assert_eq!(snapshot.poses[0].stamp, 0.0);
        assert_eq!(snapshot.map_to_odom, Some(update.map_to_odom));
    }

    #[test]
    fn test_map_to_odom_applied_to_camera_pose() {
        let sink = RecordingSink::default();
        let node = node(EmitPolicy::Retain);
        node.on_camera_info(camera_info()).unwrap();
        let correction = Pose::new(Vector3::new(0.0, 0.0, 1.0), UnitQuaternion::identity());
        for (id, stamp) in [(1, 0.0), (2, 2.0)] {
            let mut update = (*update(id, stamp, stamp)).clone();
            update.map_to_odom = correction;
            node.on_map_update(Arc::new(update));
            node.tick(&sink);
        }
        node.on_image(frame(1.0));
        node.tick(&sink);

        let synced = sink.synced.lock();
        assert!((synced[0].camera_pose.position() - Vector3::new(1.0, 0.0, 1.0)).norm() < EPSILON);
        assert_eq!(synced[0].body_pose.stamp, 1.0);
    }

    #[test]
    fn test_singular_camera_info_rejected() {
        let node = node(EmitPolicy::Retain);
        let mut info = camera_info();
        info.intrinsics.fx = 0.0;
        assert!(matches!(
            node.on_camera_info(info),
            Err(PipelineError::Geometry(_))
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = SyncConfig {
            retention_secs: Some(-1.0),
            ..SyncConfig::default()
        };
        assert!(matches!(SyncNode::new(config), Err(PipelineError::InvalidConfig(_))));
        let config = SyncConfig {
            buffer_capacity: 0,
            ..SyncConfig::default()
        };
        assert!(matches!(SyncNode::new(config), Err(PipelineError::InvalidConfig(_))));
    }
}
