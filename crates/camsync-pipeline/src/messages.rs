//! Messages exchanged between the synchronization node and its collaborators.

use std::sync::Arc;

use camsync_geometry::{CameraProjection, GeometryError, Intrinsics, Pose, StampedPose};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// Timestamp and coordinate frame of a message.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    /// Seconds since an arbitrary epoch shared by all producers
    pub stamp: f64,
    /// Coordinate frame the payload is expressed in
    pub frame_id: String,
}

impl Header {
    /// Creates a header.
    pub fn new(stamp: f64, frame_id: impl Into<String>) -> Self {
        Self {
            stamp,
            frame_id: frame_id.into(),
        }
    }
}

/// A camera image.
///
/// The pixel payload is shared, so cloning a frame (buffer snapshots, re-stamping)
/// never copies image data.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageFrame {
    pub header: Header,
    pub width: u32,
    pub height: u32,
    /// Pixel encoding, e.g. `rgb8` or `mono8`
    pub encoding: String,
    pub data: Arc<[u8]>,
}

impl ImageFrame {
    pub fn new(
        header: Header,
        width: u32,
        height: u32,
        encoding: impl Into<String>,
        data: Arc<[u8]>,
    ) -> Self {
        Self {
            header,
            width,
            height,
            encoding: encoding.into(),
            data,
        }
    }

    pub fn stamp(&self) -> f64 {
        self.header.stamp
    }

    /// Returns a copy of this frame with a new header.
    pub fn restamped(&self, stamp: f64, frame_id: &str) -> Self {
        Self {
            header: Header::new(stamp, frame_id),
            ..self.clone()
        }
    }
}

/// Camera calibration message.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraInfo {
    pub header: Header,
    pub width: u32,
    pub height: u32,
    pub intrinsics: Intrinsics,
}

impl CameraInfo {
    /// Returns a copy with a new stamp; the frame id is kept.
    pub fn restamped(&self, stamp: f64) -> Self {
        let mut info = self.clone();
        info.header.stamp = stamp;
        info
    }
}

/// A transform between two named frames at a given time.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformStamped {
    /// Stamp and parent frame
    pub header: Header,
    pub child_frame_id: String,
    /// Pose of the child frame in the parent frame
    pub transform: Pose,
}

impl TransformStamped {
    pub fn new(stamp: f64, parent: &str, child: &str, transform: Pose) -> Self {
        Self {
            header: Header::new(stamp, parent),
            child_frame_id: child.to_owned(),
            transform,
        }
    }
}

/// One optimized node of the mapping graph.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GraphNode {
    pub id: i64,
    pub stamp: f64,
    /// Pose in the odometry frame
    pub pose: Pose,
}

/// Trajectory/map update published by the mapping collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct MapUpdate {
    /// Graph nodes, newest first
    pub nodes: Vec<GraphNode>,
    /// Correction from the odometry frame into the map frame
    pub map_to_odom: Pose,
}

impl MapUpdate {
    /// The most recent graph node, if the update carries any.
    pub fn newest(&self) -> Option<&GraphNode> {
        self.nodes.first()
    }
}

/// An image paired with the camera pose at its capture time.
#[derive(Debug, Clone)]
pub struct SyncedFrame {
    /// The image, re-stamped with the interpolation time and the camera frame id
    pub image: ImageFrame,
    /// Interpolated body pose in the odometry frame
    pub body_pose: StampedPose,
    /// Camera pose in the map frame
    pub camera_pose: Pose,
    pub camera_info: CameraInfo,
    /// Projection model of `camera_pose`
    pub projection: CameraProjection,
}

/// Answer to a "get current map" request.
#[derive(Debug, Clone, PartialEq)]
pub struct MapSnapshot {
    /// Frame the trajectory poses are expressed in
    pub frame_id: String,
    pub poses: Vec<StampedPose>,
    pub map_to_odom: Option<Pose>,
}

/// On-demand map request, answered through a oneshot channel.
#[derive(Debug)]
pub struct MapRequest {
    pub reply: oneshot::Sender<MapSnapshot>,
}

/// Result of a localization query, in the JSON shape of the HTTP boundary.
///
/// A successful result serializes as `{"pose": [tx, ty, tz, qx, qy, qz, qw],
/// "inliers": n, "success": true}`, a failed one as `{"success": false}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalizationResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pose: Option<[f64; 7]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inliers: Option<u32>,
    pub success: bool,
}

impl LocalizationResponse {
    pub fn located(pose: &Pose, inliers: u32) -> Self {
        Self {
            pose: Some(pose.to_flat()),
            inliers: Some(inliers),
            success: true,
        }
    }

    pub fn failed() -> Self {
        Self {
            pose: None,
            inliers: None,
            success: false,
        }
    }

    /// Decodes the pose of a successful response.
    ///
    /// Returns `Ok(None)` for a failed response and an error if the 7-tuple holds a
    /// non-finite or zero-norm quaternion.
    pub fn pose(&self) -> Result<Option<Pose>, GeometryError> {
        match (self.success, self.pose) {
            (true, Some(flat)) => Pose::from_flat(flat).map(Some),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{UnitQuaternion, Vector3};

    #[test]
    fn test_localization_response_success_shape() {
        let pose = Pose::new(Vector3::new(1.0, 2.0, 3.0), UnitQuaternion::identity());
        let response = LocalizationResponse::located(&pose, 42);

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "pose": [1.0, 2.0, 3.0, 0.0, 0.0, 0.0, 1.0],
                "inliers": 42,
                "success": true
            })
        );
        assert_eq!(response.pose().unwrap(), Some(pose));
    }

    #[test]
    fn test_localization_response_failure_shape() {
        let json = serde_json::to_string(&LocalizationResponse::failed()).unwrap();
        assert_eq!(json, r#"{"success":false}"#);

        let parsed: LocalizationResponse = serde_json::from_str(r#"{"success": false}"#).unwrap();
        assert_eq!(parsed, LocalizationResponse::failed());
        assert_eq!(parsed.pose().unwrap(), None);
    }

    #[test]
    fn test_localization_response_rejects_degenerate_pose() {
        let parsed: LocalizationResponse = serde_json::from_str(
            r#"{"pose": [0, 0, 0, 0, 0, 0, 0], "inliers": 3, "success": true}"#,
        )
        .unwrap();
        assert!(matches!(
            parsed.pose(),
            Err(GeometryError::DegenerateQuaternion(_))
        ));
    }

    #[test]
    fn test_restamp_keeps_payload() {
        let frame = ImageFrame::new(Header::new(1.0, "camera"), 2, 1, "mono8", Arc::from(vec![1u8, 2]));
        let restamped = frame.restamped(1.5, "asa_camera");
        assert_eq!(restamped.stamp(), 1.5);
        assert_eq!(restamped.header.frame_id, "asa_camera");
        assert!(Arc::ptr_eq(&frame.data, &restamped.data));
    }
}
