#![warn(missing_docs)]
//! Pinhole camera geometry for camera/pose synchronization.
//!
//! This crate wraps nalgebra types to provide the geometric primitives the
//! synchronization pipeline hands to downstream consumers: 6-DoF poses with
//! shortest-arc interpolation, pinhole intrinsics, projection matrices, point
//! projection, ray back-projection and depth-assisted unprojection.
//!
//! # Coordinate Systems
//!
//! - **World Frame**: map or odometry frame the poses are expressed in
//! - **Body Frame**: camera-local frame, +z along the optical axis
//! - **Pixel Frame**: 2D image coordinates, `u` to the right and `v` down

use nalgebra::{Point2, Point3};

pub mod camera;
pub mod depth;
pub mod error;
pub mod intrinsics;
pub mod pose;

pub use camera::{CameraProjection, build_projection, project, unproject_ray};
pub use depth::{DepthMap, DepthSampling, pixels_to_points};
pub use error::GeometryError;
pub use intrinsics::Intrinsics;
pub use pose::{Pose, StampedPose};

/// A 3D point in world coordinates.
pub type WorldPoint = Point3<f64>;

/// A 3D point in the camera (body) frame.
pub type BodyPoint = Point3<f64>;

/// A 2D point in pixel coordinates.
pub type PixelPoint = Point2<f64>;
