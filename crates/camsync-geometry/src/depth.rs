//! Depth-assisted unprojection of pixels into the camera frame.

use nalgebra::{Matrix2xX, Point2};

use crate::{BodyPoint, GeometryError, Intrinsics};

/// Default depth scale: raw depth in millimetres, points in metres.
pub const MILLIMETRES_TO_METRES: f64 = 1.0 / 1000.0;

/// A row-major raw depth image.
///
/// Raw samples are integers (typically millimetres); a sample of `0` means "no depth".
#[derive(Debug, Clone, PartialEq)]
pub struct DepthMap {
    width: usize,
    height: usize,
    data: Vec<u16>,
    /// Raw-to-metres factor: `depth_m = raw * scale`
    scale: f64,
}

impl DepthMap {
    /// Wraps a raw depth buffer recorded in millimetres.
    ///
    /// # Errors
    ///
    /// Returns `GeometryError::InvalidDepthMap` if the map is empty or the buffer length
    /// is not `width * height`.
    pub fn new(width: usize, height: usize, data: Vec<u16>) -> Result<Self, GeometryError> {
        if width == 0 || height == 0 {
            return Err(GeometryError::InvalidDepthMap(
                "width and height must be non-zero",
            ));
        }
        if width.checked_mul(height) != Some(data.len()) {
            return Err(GeometryError::InvalidDepthMap(
                "buffer length must equal width * height",
            ));
        }
        Ok(Self {
            width,
            height,
            data,
            scale: MILLIMETRES_TO_METRES,
        })
    }

    /// Replaces the raw-to-metres factor.
    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    /// Width in pixels.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Raw-to-metres factor.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Raw sample at column `u`, row `v`.
    pub fn get(&self, u: usize, v: usize) -> Option<u16> {
        if u < self.width && v < self.height {
            Some(self.data[v * self.width + u])
        } else {
            None
        }
    }

    /// Maps a continuous pixel coordinate to the integer cell that contains it.
    fn cell(&self, u: f64, v: f64) -> Result<(usize, usize), GeometryError> {
        let out_of_bounds = GeometryError::PixelOutOfBounds {
            u,
            v,
            width: self.width,
            height: self.height,
        };
        if !u.is_finite() || !v.is_finite() || u < 0.0 || v < 0.0 {
            return Err(out_of_bounds);
        }
        let (col, row) = (u.floor() as usize, v.floor() as usize);
        if col >= self.width || row >= self.height {
            return Err(out_of_bounds);
        }
        Ok((col, row))
    }

    /// Mean of the strictly positive raw samples in the window around `(col, row)`,
    /// clipped to the map borders.
    fn window_mean(&self, col: usize, row: usize, radius: usize) -> Option<f64> {
        let rows = row.saturating_sub(radius)..=row.saturating_add(radius).min(self.height - 1);
        let cols = col.saturating_sub(radius)..=col.saturating_add(radius).min(self.width - 1);

        let (sum, count) = rows
            .flat_map(|v| cols.clone().map(move |u| (u, v)))
            .map(|(u, v)| self.data[v * self.width + u])
            .filter(|&raw| raw > 0)
            .fold((0.0, 0usize), |(sum, count), raw| (sum + raw as f64, count + 1));

        (count > 0).then(|| sum / count as f64)
    }
}

/// Where depth is sampled for each pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthSampling {
    /// One sample at the centroid of all input pixels, shared by every point.
    Centroid,
    /// Average of positive samples in the `(2 radius + 1)^2` window around each pixel.
    Window {
        /// Half-size of the window in pixels; `0` samples the pixel itself.
        radius: usize,
    },
}

/// Converts pixels plus a depth map into camera-frame 3D points.
///
/// Depth is read as described by `sampling` and scaled to metres; every pixel `(u, v)`
/// is then back-projected with the pinhole model:
/// `Z = depth`, `X = Z (u - cx) / fx`, `Y = Z (v - cy) / fy`.
///
/// # Returns
///
/// One entry per input column. `None` marks a missing depth (no strictly positive
/// sample available), which is distinct from a point at `Z = 0`.
///
/// # Errors
///
/// Returns `GeometryError::PixelOutOfBounds` if a sampling centre is non-finite or lies
/// outside the depth map, and an intrinsics error if `intrinsics` is singular.
///
/// # Examples
///
/// ```
/// use camsync_geometry::{pixels_to_points, DepthMap, DepthSampling, Intrinsics};
/// use nalgebra::{Matrix2xX, Vector2};
///
/// let depth = DepthMap::new(4, 4, vec![2000; 16]).unwrap();
/// let intrinsics = Intrinsics::new(100.0, 100.0, 2.0, 2.0);
/// let uv = Matrix2xX::from_columns(&[Vector2::new(2.0, 2.0)]);
///
/// let points = pixels_to_points(&uv, &intrinsics, &depth, DepthSampling::Window { radius: 1 }).unwrap();
/// assert_eq!(points[0].unwrap().z, 2.0);
/// ```
pub fn pixels_to_points(
    uv: &Matrix2xX<f64>,
    intrinsics: &Intrinsics,
    depth: &DepthMap,
    sampling: DepthSampling,
) -> Result<Vec<Option<BodyPoint>>, GeometryError> {
    intrinsics.validate()?;
    if uv.ncols() == 0 {
        return Ok(Vec::new());
    }

    let depths: Vec<Option<f64>> = match sampling {
        DepthSampling::Centroid => {
            let mean = uv.column_mean();
            let (col, row) = depth.cell(mean.x, mean.y)?;
            let raw = depth.get(col, row).filter(|&raw| raw > 0).map(f64::from);
            vec![raw; uv.ncols()]
        }
        DepthSampling::Window { radius } => uv
            .column_iter()
            .map(|pixel| {
                let (col, row) = depth.cell(pixel[0], pixel[1])?;
                Ok(depth.window_mean(col, row, radius))
            })
            .collect::<Result<_, GeometryError>>()?,
    };

    Ok(uv
        .column_iter()
        .zip(depths)
        .map(|(pixel, raw)| {
            raw.map(|raw| intrinsics.unproject(&Point2::new(pixel[0], pixel[1]), raw * depth.scale()))
        })
        .collect())
}
