//! Pinhole projection model.
//!
//! A camera with world pose `(C, q)` and intrinsics `K` maps homogeneous world points
//! to homogeneous pixels with
//!
//! ```text
//! R = Rot(q)^T        world-to-camera rotation
//! t = -R C            world origin in camera coordinates
//! P = K [R | t]       3x4 projection matrix
//! ```
//!
//! The projection model is cheap to build and is recomputed for every pose; nothing
//! here caches state across pose updates.

use nalgebra::{Matrix2xX, Matrix3, Matrix3x4, Matrix3xX, Matrix4x3, Point2, Vector2, Vector3, Vector4};

use crate::{GeometryError, Intrinsics, Pose, WorldPoint};

/// Singular values below this are treated as zero by the pseudo-inverse.
const PSEUDO_INVERSE_EPSILON: f64 = 1e-12;

/// Projection matrix together with the extrinsics it was built from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraProjection {
    p: Matrix3x4<f64>,
    r: Matrix3<f64>,
    c: Vector3<f64>,
}

impl CameraProjection {
    /// Builds the projection model of a camera with the given world pose.
    ///
    /// See [`build_projection`].
    pub fn from_pose(pose: &Pose, intrinsics: &Intrinsics) -> Result<Self, GeometryError> {
        build_projection(pose, intrinsics)
    }

    /// The 3x4 projection matrix `P = K [R | t]`.
    pub fn matrix(&self) -> &Matrix3x4<f64> {
        &self.p
    }

    /// World-to-camera rotation `R`.
    pub fn rotation(&self) -> &Matrix3<f64> {
        &self.r
    }

    /// Camera centre `C` in world coordinates.
    pub fn camera_center(&self) -> &Vector3<f64> {
        &self.c
    }

    /// Projects a 3xN set of world points. See [`project`].
    pub fn project(&self, points: &Matrix3xX<f64>) -> Matrix2xX<f64> {
        project(&self.p, points)
    }

    /// Projects a single world point.
    ///
    /// Points behind the camera are not filtered.
    pub fn project_point(&self, point: &WorldPoint) -> Point2<f64> {
        let uvw = self.p * point.to_homogeneous();
        Point2::new(uvw.x / uvw.z, uvw.y / uvw.z)
    }

    /// Back-projects a 2xN set of pixels to unit rays. See [`unproject_ray`].
    pub fn unproject_rays(&self, uv: &Matrix2xX<f64>) -> Result<Matrix3xX<f64>, GeometryError> {
        unproject_ray(&self.p, uv, &self.r, &self.c)
    }
}

/// Builds the pinhole projection model for a camera pose.
///
/// # Arguments
///
/// * `pose` - Camera pose in the world frame: position is the camera centre `C`,
///   orientation maps camera axes into the world.
/// * `intrinsics` - Pinhole intrinsics `K`.
///
/// # Errors
///
/// Returns `GeometryError::NonFiniteQuaternion` if the orientation is not finite and
/// `GeometryError::SingularIntrinsics` / `GeometryError::InvalidIntrinsics` if `K`
/// cannot be inverted.
///
/// # Examples
///
/// ```
/// use camsync_geometry::{build_projection, Intrinsics, Pose};
/// use nalgebra::{Point3, UnitQuaternion, Vector3};
///
/// let intrinsics = Intrinsics::new(500.0, 500.0, 320.0, 240.0);
/// let pose = Pose::new(Vector3::new(0.0, 0.0, -1.0), UnitQuaternion::identity());
/// let projection = build_projection(&pose, &intrinsics).unwrap();
///
/// let pixel = projection.project_point(&Point3::new(0.0, 0.0, 1.0));
/// assert!((pixel.x - 320.0).abs() < 1e-9);
/// assert!((pixel.y - 240.0).abs() < 1e-9);
/// ```
pub fn build_projection(
    pose: &Pose,
    intrinsics: &Intrinsics,
) -> Result<CameraProjection, GeometryError> {
    if pose.orientation().coords.iter().any(|v| !v.is_finite()) {
        return Err(GeometryError::NonFiniteQuaternion(
            "camera orientation must be finite",
        ));
    }
    if pose.position().iter().any(|v| !v.is_finite()) {
        return Err(GeometryError::NonFinitePosition(
            "camera centre must be finite",
        ));
    }
    intrinsics.validate()?;

    let c = pose.position();
    let r = pose.rotation().transpose();
    let t = -(r * c);

    let mut extrinsics = Matrix3x4::zeros();
    extrinsics.fixed_view_mut::<3, 3>(0, 0).copy_from(&r);
    extrinsics.set_column(3, &t);

    Ok(CameraProjection {
        p: intrinsics.matrix() * extrinsics,
        r,
        c,
    })
}

/// Projects 3D world points to pixels.
///
/// Every column of `points` is extended to `[X; 1]`, multiplied by `P` and divided by
/// its homogeneous coordinate. The division is not guarded: points with zero or
/// negative depth produce infinite or mirrored pixels, callers filter points behind
/// the camera themselves.
pub fn project(p: &Matrix3x4<f64>, points: &Matrix3xX<f64>) -> Matrix2xX<f64> {
    let mut uv = Matrix2xX::zeros(points.ncols());
    for (i, point) in points.column_iter().enumerate() {
        let uvw = p * Vector4::new(point[0], point[1], point[2], 1.0);
        uv.set_column(i, &Vector2::new(uvw.x / uvw.z, uvw.y / uvw.z));
    }
    uv
}

/// Back-projects pixels to unit rays in world coordinates.
///
/// Each pixel `[u; v; 1]` is mapped through the Moore-Penrose pseudo-inverse of `P`,
/// de-homogenized, and turned into a direction from the camera centre. Rays whose
/// camera-local z component is negative are flipped so every ray points in front of
/// the camera, then each column is normalized.
///
/// A de-homogenizing scale of exactly zero is replaced by 1. That keeps the division
/// finite but the resulting direction is only an approximation.
///
/// # Arguments
///
/// * `p` - Projection matrix.
/// * `uv` - 2xN pixel coordinates.
/// * `r` - World-to-camera rotation used to build `p`.
/// * `c` - Camera centre used to build `p`.
pub fn unproject_ray(
    p: &Matrix3x4<f64>,
    uv: &Matrix2xX<f64>,
    r: &Matrix3<f64>,
    c: &Vector3<f64>,
) -> Result<Matrix3xX<f64>, GeometryError> {
    let p_inv: Matrix4x3<f64> = p
        .pseudo_inverse(PSEUDO_INVERSE_EPSILON)
        .map_err(GeometryError::PseudoInverse)?;

    let mut rays = Matrix3xX::zeros(uv.ncols());
    for (i, pixel) in uv.column_iter().enumerate() {
        let mut x = p_inv * Vector3::new(pixel[0], pixel[1], 1.0);
        if x.w == 0.0 {
            x.w = 1.0;
        }

        let mut ray = x.xyz() / x.w - c;
        if (r * ray).z < 0.0 {
            ray = -ray;
        }
        rays.set_column(i, &ray.normalize());
    }
    Ok(rays)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::f64::consts::FRAC_PI_2;
    use nalgebra::{Point3, UnitQuaternion};

    const EPSILON: f64 = 1e-9;

    fn intrinsics() -> Intrinsics {
        Intrinsics::new(525.0, 520.0, 319.5, 239.5)
    }

    fn tilted_pose() -> Pose {
        let rotation = UnitQuaternion::from_euler_angles(0.3, -0.2, 1.1);
        Pose::new(Vector3::new(1.5, -0.5, 2.0), rotation)
    }

    #[test]
    fn test_projection_matrix_structure() {
        let pose = tilted_pose();
        let projection = build_projection(&pose, &intrinsics()).unwrap();

        let r = projection.rotation();
        assert!((r * r.transpose() - Matrix3::identity()).norm() < EPSILON);
        assert!((r - pose.rotation().transpose()).norm() < EPSILON);

        // P C_h = 0: the camera centre is the null space of P
        let center = projection.camera_center().push(1.0);
        assert!((projection.matrix() * center).norm() < 1e-6);
    }

    #[test]
    fn test_project_point_in_front() {
        // camera at the origin looking down +z
        let projection = build_projection(&Pose::identity(), &intrinsics()).unwrap();
        let points = Matrix3xX::from_columns(&[Vector3::new(0.1, 0.2, 1.0), Vector3::new(0.0, 0.0, 4.0)]);
        let uv = projection.project(&points);

        assert!((uv[(0, 0)] - (525.0 * 0.1 + 319.5)).abs() < EPSILON);
        assert!((uv[(1, 0)] - (520.0 * 0.2 + 239.5)).abs() < EPSILON);
        assert!((uv[(0, 1)] - 319.5).abs() < EPSILON);
        assert!((uv[(1, 1)] - 239.5).abs() < EPSILON);
    }

    #[test]
    fn test_project_behind_camera_is_not_guarded() {
        let projection = build_projection(&Pose::identity(), &intrinsics()).unwrap();
        let behind = Matrix3xX::from_columns(&[Vector3::new(0.1, 0.0, -1.0)]);
        let uv = projection.project(&behind);
        // mirrored to the other side of the principal point
        assert!(uv[(0, 0)] < 319.5);

        let on_plane = Matrix3xX::from_columns(&[Vector3::new(0.1, 0.0, 0.0)]);
        assert!(!projection.project(&on_plane)[(0, 0)].is_finite());
    }

    #[test]
    fn test_projection_unprojection_roundtrip() {
        let pose = tilted_pose();
        let projection = build_projection(&pose, &intrinsics()).unwrap();

        // points placed in front of the camera through its own frame
        let local = [
            Point3::new(0.0, 0.0, 2.0),
            Point3::new(0.5, -0.3, 3.0),
            Point3::new(-1.0, 0.8, 5.0),
            Point3::new(0.2, 0.1, 0.5),
        ];
        let world: Vec<Vector3<f64>> = local
            .iter()
            .map(|p| pose.transform_point(p).coords)
            .collect();
        let points = Matrix3xX::from_columns(&world);

        let uv = projection.project(&points);
        let rays = projection.unproject_rays(&uv).unwrap();

        for (i, point) in world.iter().enumerate() {
            let expected = (point - projection.camera_center()).normalize();
            let ray = rays.column(i);
            assert!((ray.norm() - 1.0).abs() < EPSILON);
            assert!(
                (ray - expected).norm() < 1e-6,
                "ray {} = {:?}, expected {:?}",
                i,
                ray,
                expected
            );
        }
    }

    #[test]
    fn test_unprojected_rays_point_forward() {
        let yaw = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), FRAC_PI_2);
        let pose = Pose::new(Vector3::new(0.0, 1.0, 0.0), yaw);
        let projection = build_projection(&pose, &intrinsics()).unwrap();

        let uv = Matrix2xX::from_columns(&[
            Vector2::new(0.0, 0.0),
            Vector2::new(319.5, 239.5),
            Vector2::new(640.0, 480.0),
        ]);
        let rays = projection.unproject_rays(&uv).unwrap();
        for ray in rays.column_iter() {
            let local = projection.rotation() * ray;
            assert!(local.z > 0.0);
        }

        // the principal point looks along the camera z axis, which is world +x here
        assert!((rays.column(1) - Vector3::new(1.0, 0.0, 0.0)).norm() < 1e-6);
    }

    #[test]
    fn test_unproject_from_world_origin() {
        // P = [K | 0] has a zero bottom row in its pseudo-inverse, so w falls back to 1
        let k = intrinsics();
        let projection = build_projection(&Pose::identity(), &k).unwrap();
        let uv = Matrix2xX::from_columns(&[Vector2::new(319.5, 239.5), Vector2::new(100.0, 400.0)]);
        let rays = projection.unproject_rays(&uv).unwrap();

        assert!((rays.column(0) - Vector3::z()).norm() < 1e-6);

        let expected = Vector3::new((100.0 - 319.5) / 525.0, (400.0 - 239.5) / 520.0, 1.0).normalize();
        assert!((rays.column(1) - expected).norm() < 1e-6);
        for ray in rays.column_iter() {
            assert!(ray.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn test_build_projection_rejects_singular_intrinsics() {
        let result = build_projection(&Pose::identity(), &Intrinsics::new(0.0, 500.0, 1.0, 1.0));
        assert!(matches!(result, Err(GeometryError::SingularIntrinsics(_))));
    }

    #[test]
    fn test_build_projection_rejects_non_finite_orientation() {
        let mut pose = Pose::identity();
        pose.isometry.rotation = UnitQuaternion::new_unchecked(nalgebra::Quaternion::new(
            f64::NAN,
            0.0,
            0.0,
            0.0,
        ));
        let result = build_projection(&pose, &intrinsics());
        assert!(matches!(result, Err(GeometryError::NonFiniteQuaternion(_))));
    }
}
