//! Pinhole camera intrinsics.

use core::fmt;

use nalgebra::{Matrix3, Point2, Point3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::GeometryError;

/// Focal lengths below this magnitude make the intrinsic matrix singular.
const MIN_FOCAL_LENGTH: f64 = 1e-9;
/// Tolerance on the fixed entries of a pinhole matrix.
const STRUCTURE_TOLERANCE: f64 = 1e-9;

/// Pinhole intrinsic parameters with zero skew.
///
/// ```text
/// K = [fx  0  cx]
///     [ 0 fy  cy]
///     [ 0  0   1]
/// ```
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intrinsics {
    /// Focal length in x direction (pixels)
    pub fx: f64,
    /// Focal length in y direction (pixels)
    pub fy: f64,
    /// Principal point x coordinate (pixels)
    pub cx: f64,
    /// Principal point y coordinate (pixels)
    pub cy: f64,
}

impl Intrinsics {
    /// Creates intrinsics from focal lengths and principal point.
    ///
    /// No validation happens here; [`Intrinsics::validate`] is run by every consumer
    /// that needs an invertible matrix.
    pub const fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// Reads intrinsics from a 3x3 pinhole matrix.
    ///
    /// # Errors
    ///
    /// Returns `GeometryError::InvalidIntrinsics` if the matrix has non-zero skew, a bottom
    /// row other than `[0 0 1]` or non-finite entries, and `GeometryError::SingularIntrinsics`
    /// if a focal length is zero.
    ///
    /// # Examples
    ///
    /// ```
    /// use camsync_geometry::Intrinsics;
    /// use nalgebra::Matrix3;
    ///
    /// let k = Matrix3::new(525.0, 0.0, 319.5, 0.0, 525.0, 239.5, 0.0, 0.0, 1.0);
    /// let intrinsics = Intrinsics::from_matrix(&k).unwrap();
    /// assert_eq!(intrinsics.fx, 525.0);
    /// assert_eq!(intrinsics.matrix(), k);
    /// ```
    pub fn from_matrix(k: &Matrix3<f64>) -> Result<Self, GeometryError> {
        if k.iter().any(|v| !v.is_finite()) {
            return Err(GeometryError::InvalidIntrinsics("entries must be finite"));
        }
        if k[(0, 1)].abs() > STRUCTURE_TOLERANCE || k[(1, 0)].abs() > STRUCTURE_TOLERANCE {
            return Err(GeometryError::InvalidIntrinsics("skew must be zero"));
        }
        if k[(2, 0)].abs() > STRUCTURE_TOLERANCE
            || k[(2, 1)].abs() > STRUCTURE_TOLERANCE
            || (k[(2, 2)] - 1.0).abs() > STRUCTURE_TOLERANCE
        {
            return Err(GeometryError::InvalidIntrinsics("bottom row must be [0 0 1]"));
        }

        let intrinsics = Self::new(k[(0, 0)], k[(1, 1)], k[(0, 2)], k[(1, 2)]);
        intrinsics.validate()?;
        Ok(intrinsics)
    }

    /// Reads intrinsics from a row-major 9 element array, the layout of camera info messages.
    pub fn from_row_major(k: [f64; 9]) -> Result<Self, GeometryError> {
        Self::from_matrix(&Matrix3::from_row_slice(&k))
    }

    /// Checks that the parameters describe an invertible pinhole matrix.
    pub fn validate(&self) -> Result<(), GeometryError> {
        if ![self.fx, self.fy, self.cx, self.cy].iter().all(|v| v.is_finite()) {
            return Err(GeometryError::InvalidIntrinsics("entries must be finite"));
        }
        if self.fx.abs() < MIN_FOCAL_LENGTH || self.fy.abs() < MIN_FOCAL_LENGTH {
            return Err(GeometryError::SingularIntrinsics(
                "focal lengths must be non-zero",
            ));
        }
        Ok(())
    }

    /// Returns the 3x3 intrinsic matrix K.
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(self.fx, 0.0, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0)
    }

    /// Returns K in row-major order.
    pub fn to_row_major(&self) -> [f64; 9] {
        [self.fx, 0.0, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0]
    }

    /// Back-projects a pixel at a metric depth into the camera frame.
    ///
    /// `Z = depth`, `X = Z (u - cx) / fx`, `Y = Z (v - cy) / fy`.
    pub fn unproject(&self, pixel: &Point2<f64>, depth: f64) -> Point3<f64> {
        let x = depth * (pixel.x - self.cx) / self.fx;
        let y = depth * (pixel.y - self.cy) / self.fy;
        Point3::new(x, y, depth)
    }
}

impl fmt::Display for Intrinsics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Intrinsics(fx: {:.2}, fy: {:.2}, cx: {:.2}, cy: {:.2})",
            self.fx, self.fy, self.cx, self.cy
        )
    }
}
