//! 6-DoF poses and timestamped poses.

use core::fmt;

use nalgebra::{Isometry3, Matrix3, Matrix4, Quaternion, Translation3, UnitQuaternion, Vector3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{BodyPoint, GeometryError, WorldPoint};

/// Quaternions with a norm below this are rejected as degenerate.
const MIN_QUATERNION_NORM: f64 = 1e-9;

/// Pose of a body frame relative to a parent frame (SE3 transformation).
///
/// The translation is the position of the body origin in the parent frame, the rotation
/// maps body axes into the parent frame. Poses are immutable values: every operation
/// returns a new pose.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    /// SE3 transformation from body to parent frame
    pub isometry: Isometry3<f64>,
}

impl Pose {
    /// Creates an identity pose (no rotation, no translation).
    ///
    /// # Examples
    ///
    /// ```
    /// use camsync_geometry::Pose;
    /// use nalgebra::Vector3;
    ///
    /// let identity = Pose::identity();
    /// assert_eq!(identity.position(), Vector3::new(0.0, 0.0, 0.0));
    /// ```
    pub fn identity() -> Self {
        Self {
            isometry: Isometry3::identity(),
        }
    }

    /// Creates a pose from an already normalized orientation.
    pub fn new(position: Vector3<f64>, orientation: UnitQuaternion<f64>) -> Self {
        Self {
            isometry: Isometry3::from_parts(Translation3::from(position), orientation),
        }
    }

    /// Creates a pose from a position and a raw `[qx, qy, qz, qw]` quaternion.
    ///
    /// The quaternion is re-normalized, so inputs that drifted slightly off the unit
    /// sphere are accepted.
    ///
    /// # Errors
    ///
    /// Returns `GeometryError::NonFinitePosition` or `GeometryError::NonFiniteQuaternion`
    /// for NaN/infinite components and `GeometryError::DegenerateQuaternion` if the
    /// quaternion norm is zero.
    ///
    /// # Examples
    ///
    /// ```
    /// use camsync_geometry::Pose;
    /// use nalgebra::Vector3;
    ///
    /// let pose = Pose::from_parts(Vector3::new(1.0, 2.0, 3.0), [0.0, 0.0, 0.0, 2.0]).unwrap();
    /// assert!((pose.orientation().w - 1.0).abs() < 1e-12);
    ///
    /// assert!(Pose::from_parts(Vector3::zeros(), [f64::NAN, 0.0, 0.0, 1.0]).is_err());
    /// ```
    pub fn from_parts(position: Vector3<f64>, xyzw: [f64; 4]) -> Result<Self, GeometryError> {
        if position.iter().any(|v| !v.is_finite()) {
            return Err(GeometryError::NonFinitePosition(
                "position components must be finite",
            ));
        }
        let [x, y, z, w] = xyzw;
        let quaternion = Quaternion::new(w, x, y, z);
        if quaternion.coords.iter().any(|v| !v.is_finite()) {
            return Err(GeometryError::NonFiniteQuaternion(
                "quaternion components must be finite",
            ));
        }
        if quaternion.norm() < MIN_QUATERNION_NORM {
            return Err(GeometryError::DegenerateQuaternion(
                "quaternion norm must be non-zero",
            ));
        }
        Ok(Self::new(position, UnitQuaternion::from_quaternion(quaternion)))
    }

    /// Creates a pose from the flattened `[tx, ty, tz, qx, qy, qz, qw]` layout.
    pub fn from_flat(flat: [f64; 7]) -> Result<Self, GeometryError> {
        let [tx, ty, tz, qx, qy, qz, qw] = flat;
        Self::from_parts(Vector3::new(tx, ty, tz), [qx, qy, qz, qw])
    }

    /// Flattens the pose into `[tx, ty, tz, qx, qy, qz, qw]`.
    ///
    /// This is the layout used by the localization response of the web API.
    pub fn to_flat(&self) -> [f64; 7] {
        let t = self.position();
        let q = self.orientation();
        [t.x, t.y, t.z, q.i, q.j, q.k, q.w]
    }

    /// Returns the orientation as `[qx, qy, qz, qw]`.
    pub fn quaternion_xyzw(&self) -> [f64; 4] {
        let q = self.orientation();
        [q.i, q.j, q.k, q.w]
    }

    /// Position of the body origin in the parent frame.
    pub fn position(&self) -> Vector3<f64> {
        self.isometry.translation.vector
    }

    /// Orientation of the body frame.
    pub fn orientation(&self) -> UnitQuaternion<f64> {
        self.isometry.rotation
    }

    /// Returns the rotation component as a 3x3 matrix (body axes expressed in the parent frame).
    pub fn rotation(&self) -> Matrix3<f64> {
        *self.isometry.rotation.to_rotation_matrix().matrix()
    }

    /// Composes this pose with another pose.
    ///
    /// Performs `self * other`: `other` is expressed in the body frame of `self`.
    ///
    /// # Examples
    ///
    /// ```
    /// use camsync_geometry::Pose;
    /// use nalgebra::{UnitQuaternion, Vector3};
    ///
    /// let map_to_odom = Pose::new(Vector3::new(1.0, 0.0, 0.0), UnitQuaternion::identity());
    /// let odom_to_body = Pose::new(Vector3::new(0.0, 2.0, 0.0), UnitQuaternion::identity());
    /// let map_to_body = map_to_odom.compose(&odom_to_body);
    /// assert_eq!(map_to_body.position(), Vector3::new(1.0, 2.0, 0.0));
    /// ```
    pub fn compose(&self, other: &Pose) -> Pose {
        Self {
            isometry: self.isometry * other.isometry,
        }
    }

    /// Returns the inverse of this pose.
    pub fn inverse(&self) -> Pose {
        Self {
            isometry: self.isometry.inverse(),
        }
    }

    /// Converts the pose to a 4x4 homogeneous transformation matrix.
    pub fn to_matrix(&self) -> Matrix4<f64> {
        self.isometry.to_homogeneous()
    }

    /// Maps a point expressed in the body frame into the parent frame.
    pub fn transform_point(&self, point: &BodyPoint) -> WorldPoint {
        self.isometry * point
    }

    /// Interpolates between this pose and another pose.
    ///
    /// The position is interpolated linearly per axis, the orientation with a
    /// shortest-arc, constant angular velocity SLERP. The resulting quaternion is
    /// re-normalized. `w = 0` returns `self` and `w = 1` returns `other` exactly.
    ///
    /// # Arguments
    ///
    /// * `other` - The pose to interpolate towards.
    /// * `w` - Interpolation weight, clamped to `[0, 1]`.
    ///
    /// # Examples
    ///
    /// ```
    /// use camsync_geometry::Pose;
    /// use nalgebra::{UnitQuaternion, Vector3};
    ///
    /// let a = Pose::identity();
    /// let b = Pose::new(Vector3::new(2.0, 0.0, 0.0), UnitQuaternion::identity());
    /// let mid = a.interpolate(&b, 0.5);
    /// assert!((mid.position() - Vector3::new(1.0, 0.0, 0.0)).norm() < 1e-12);
    /// ```
    pub fn interpolate(&self, other: &Pose, w: f64) -> Pose {
        let w = w.clamp(0.0, 1.0);
        if w == 0.0 {
            return *self;
        }
        if w == 1.0 {
            return *other;
        }

        let position = self.position().lerp(&other.position(), w);

        let q1 = self.orientation();
        let q2 = other.orientation();
        // try_slerp already flips `q2` onto the hemisphere of `q1`
        let rotation = q1
            .try_slerp(&q2, w, f64::EPSILON)
            .map(|q| q.into_inner())
            .unwrap_or_else(|| {
                let q2 = if q1.coords.dot(&q2.coords) < 0.0 {
                    -q2.into_inner()
                } else {
                    q2.into_inner()
                };
                q1.into_inner().lerp(&q2, w)
            });

        Self::new(position, UnitQuaternion::new_normalize(rotation))
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

impl fmt::Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = self.position();
        let [qx, qy, qz, qw] = self.quaternion_xyzw();
        write!(
            f,
            "Pose(t=[{:.3}, {:.3}, {:.3}], q=[{:.3}, {:.3}, {:.3}, {:.3}])",
            t.x, t.y, t.z, qx, qy, qz, qw
        )
    }
}

/// A pose with the time (seconds) at which it was observed.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StampedPose {
    /// Timestamp in seconds.
    pub stamp: f64,
    /// Pose at `stamp`.
    pub pose: Pose,
}

impl StampedPose {
    /// Construct a new stamped pose.
    pub const fn new(stamp: f64, pose: Pose) -> Self {
        Self { stamp, pose }
    }
}

impl fmt::Display for StampedPose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {:.3}s", self.pose, self.stamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::f64::consts::{FRAC_PI_2, PI};
    use nalgebra::Point3;

    const EPSILON: f64 = 1e-9;

    #[test]
    fn test_from_parts_normalizes() {
        let pose = Pose::from_parts(Vector3::new(1.0, 2.0, 3.0), [0.0, 0.0, 3.0, 4.0]).unwrap();
        let q = pose.orientation();
        assert!((q.norm() - 1.0).abs() < EPSILON);
        assert!((q.k - 0.6).abs() < EPSILON);
        assert!((q.w - 0.8).abs() < EPSILON);
    }

    #[test]
    fn test_from_parts_rejects_malformed_input() {
        let nan = Pose::from_parts(Vector3::zeros(), [0.0, f64::NAN, 0.0, 1.0]);
        assert!(matches!(nan, Err(GeometryError::NonFiniteQuaternion(_))));

        let inf = Pose::from_parts(Vector3::zeros(), [0.0, 0.0, f64::INFINITY, 1.0]);
        assert!(matches!(inf, Err(GeometryError::NonFiniteQuaternion(_))));

        let zero = Pose::from_parts(Vector3::zeros(), [0.0, 0.0, 0.0, 0.0]);
        assert!(matches!(zero, Err(GeometryError::DegenerateQuaternion(_))));

        let position = Pose::from_parts(Vector3::new(f64::NAN, 0.0, 0.0), [0.0, 0.0, 0.0, 1.0]);
        assert!(matches!(position, Err(GeometryError::NonFinitePosition(_))));
    }

    #[test]
    fn test_flat_layout() {
        let flat = [1.0, 2.0, 3.0, 0.0, 0.0, (PI / 4.0).sin(), (PI / 4.0).cos()];
        let pose = Pose::from_flat(flat).unwrap();
        let back = pose.to_flat();
        for (a, b) in flat.iter().zip(back.iter()) {
            assert!((a - b).abs() < EPSILON);
        }
        assert!((pose.orientation().angle() - FRAC_PI_2).abs() < EPSILON);
    }

    #[test]
    fn test_compose_and_inverse() {
        let yaw = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), FRAC_PI_2);
        let pose = Pose::new(Vector3::new(1.0, 0.0, 0.0), yaw);
        let point = pose.transform_point(&Point3::new(1.0, 0.0, 0.0));
        assert!((point - Point3::new(1.0, 1.0, 0.0)).norm() < EPSILON);

        let identity = pose.compose(&pose.inverse());
        assert!(identity.position().norm() < EPSILON);
        assert!(identity.orientation().angle() < EPSILON);
    }

    #[test]
    fn test_interpolation_endpoints_are_exact() {
        let a = Pose::from_parts(Vector3::new(0.1, 0.2, 0.3), [0.1, 0.2, 0.3, 0.9]).unwrap();
        let b = Pose::from_parts(Vector3::new(1.0, -2.0, 4.0), [0.3, -0.1, 0.2, 0.7]).unwrap();
        assert_eq!(a.interpolate(&b, 0.0), a);
        assert_eq!(a.interpolate(&b, 1.0), b);
    }

    #[test]
    fn test_interpolation_half_turn_about_z() {
        let a = Pose::identity();
        let b = Pose::from_parts(Vector3::new(2.0, 0.0, 0.0), [0.0, 0.0, 1.0, 0.0]).unwrap();
        let mid = a.interpolate(&b, 0.5);

        assert!((mid.position() - Vector3::new(1.0, 0.0, 0.0)).norm() < EPSILON);
        let expected = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), FRAC_PI_2);
        assert!(mid.orientation().angle_to(&expected) < EPSILON);
        assert!((mid.orientation().norm() - 1.0).abs() < EPSILON);
    }

    #[test]
    fn test_interpolation_takes_shortest_arc() {
        // q and -q describe the same rotation, the midpoint must stay on that rotation
        let a = Pose::from_parts(Vector3::zeros(), [0.0, 0.0, 0.0, 1.0]).unwrap();
        let b = Pose::from_parts(Vector3::zeros(), [0.0, 0.0, -(0.1f64).sin(), -(0.1f64).cos()])
            .unwrap();
        let mid = a.interpolate(&b, 0.5);
        assert!((mid.orientation().angle() - 0.1).abs() < EPSILON);
    }
}
