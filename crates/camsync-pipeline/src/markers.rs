//! Fiducial marker detection on top of a pluggable detector back end.
//!
//! The back end only has to find markers of one dictionary family in a grayscale image.
//! [`detect_markers`] adds the search policy: families are tried in the fixed
//! [`MarkerFamily::SEARCH_ORDER`] and the first family with at least one detection wins.

use core::fmt;
use std::sync::Arc;

use nalgebra::{Matrix2xX, Point2, Vector2};

use crate::error::PipelineError;

/// An 8-bit single channel image.
#[derive(Debug, Clone, PartialEq)]
pub struct GrayImage {
    width: u32,
    height: u32,
    data: Arc<[u8]>,
}

impl GrayImage {
    /// Wraps a row-major 8-bit buffer.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::InvalidImage` if the buffer length is not `width * height`.
    pub fn new(width: u32, height: u32, data: Arc<[u8]>) -> Result<Self, PipelineError> {
        if width as usize * height as usize != data.len() {
            return Err(PipelineError::InvalidImage(
                "buffer length must equal width * height",
            ));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Predefined ArUco dictionary families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerFamily {
    Dict4x4_50,
    Dict4x4_100,
    Dict4x4_250,
    Dict4x4_1000,
    Dict5x5_50,
    Dict5x5_100,
    Dict5x5_250,
    Dict5x5_1000,
    Dict6x6_50,
    Dict6x6_100,
    Dict6x6_250,
    Dict6x6_1000,
    Dict7x7_50,
    Dict7x7_100,
    Dict7x7_250,
    Dict7x7_1000,
    ArucoOriginal,
}

impl MarkerFamily {
    /// Order in which [`detect_markers`] tries the families.
    pub const SEARCH_ORDER: [MarkerFamily; 17] = [
        MarkerFamily::Dict4x4_50,
        MarkerFamily::Dict4x4_100,
        MarkerFamily::Dict4x4_250,
        MarkerFamily::Dict4x4_1000,
        MarkerFamily::Dict5x5_50,
        MarkerFamily::Dict5x5_100,
        MarkerFamily::Dict5x5_250,
        MarkerFamily::Dict5x5_1000,
        MarkerFamily::Dict6x6_50,
        MarkerFamily::Dict6x6_100,
        MarkerFamily::Dict6x6_250,
        MarkerFamily::Dict6x6_1000,
        MarkerFamily::Dict7x7_50,
        MarkerFamily::Dict7x7_100,
        MarkerFamily::Dict7x7_250,
        MarkerFamily::Dict7x7_1000,
        MarkerFamily::ArucoOriginal,
    ];

    /// Conventional dictionary name, e.g. `DICT_4X4_50`.
    pub fn name(&self) -> &'static str {
        match self {
            MarkerFamily::Dict4x4_50 => "DICT_4X4_50",
            MarkerFamily::Dict4x4_100 => "DICT_4X4_100",
            MarkerFamily::Dict4x4_250 => "DICT_4X4_250",
            MarkerFamily::Dict4x4_1000 => "DICT_4X4_1000",
            MarkerFamily::Dict5x5_50 => "DICT_5X5_50",
            MarkerFamily::Dict5x5_100 => "DICT_5X5_100",
            MarkerFamily::Dict5x5_250 => "DICT_5X5_250",
            MarkerFamily::Dict5x5_1000 => "DICT_5X5_1000",
            MarkerFamily::Dict6x6_50 => "DICT_6X6_50",
            MarkerFamily::Dict6x6_100 => "DICT_6X6_100",
            MarkerFamily::Dict6x6_250 => "DICT_6X6_250",
            MarkerFamily::Dict6x6_1000 => "DICT_6X6_1000",
            MarkerFamily::Dict7x7_50 => "DICT_7X7_50",
            MarkerFamily::Dict7x7_100 => "DICT_7X7_100",
            MarkerFamily::Dict7x7_250 => "DICT_7X7_250",
            MarkerFamily::Dict7x7_1000 => "DICT_7X7_1000",
            MarkerFamily::ArucoOriginal => "DICT_ARUCO_ORIGINAL",
        }
    }
}

impl fmt::Display for MarkerFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A detection as reported by the back end.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMarker {
    pub id: i32,
    /// Polygon corners in pixel coordinates
    pub corners: Vec<Point2<f64>>,
}

/// Detector back end for a single dictionary family.
pub trait MarkerBackend {
    /// Finds all markers of `family` in `image`; an empty result means none were found.
    fn detect(&self, image: &GrayImage, family: MarkerFamily) -> Result<Vec<RawMarker>, PipelineError>;
}

/// Shape in which marker corners are returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CornerLayout {
    /// One `(x, y)` record per corner
    #[default]
    Points,
    /// A 2xK matrix, row 0 holding x and row 1 holding y
    Matrix,
}

/// Marker corners in the requested [`CornerLayout`].
#[derive(Debug, Clone, PartialEq)]
pub enum Corners {
    Points(Vec<Point2<f64>>),
    Matrix(Matrix2xX<f64>),
}

impl Corners {
    fn with_layout(points: Vec<Point2<f64>>, layout: CornerLayout) -> Self {
        match layout {
            CornerLayout::Points => Corners::Points(points),
            CornerLayout::Matrix => {
                let columns: Vec<Vector2<f64>> = points.iter().map(|p| p.coords).collect();
                Corners::Matrix(Matrix2xX::from_columns(&columns))
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Corners::Points(points) => points.len(),
            Corners::Matrix(matrix) => matrix.ncols(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A detected marker.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerObservation {
    pub id: i32,
    pub family: MarkerFamily,
    pub corners: Corners,
}

impl MarkerObservation {
    /// Display label, `ID:<id>`.
    pub fn label(&self) -> String {
        format!("ID:{}", self.id)
    }
}

impl fmt::Display for MarkerObservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ID:{} ({}, {} corners)", self.id, self.family, self.corners.len())
    }
}

/// Detects fiducial markers, trying every family of [`MarkerFamily::SEARCH_ORDER`].
///
/// The search stops at the first family that yields at least one detection; later
/// families are not consulted even if they would match more markers.
///
/// # Arguments
///
/// * `backend` - Detector for a single family.
/// * `image` - Grayscale input image.
/// * `filter` - If given, only markers whose id is in this list are returned.
/// * `layout` - Corner output shape.
///
/// # Returns
///
/// `Ok(None)` if no family detects anything. Otherwise the detections of the winning
/// family, filtered by id, without polygons of fewer than 3 corners. The list may be
/// empty if the filter removed every detection.
///
/// # Errors
///
/// Back end failures are returned as-is and end the search.
pub fn detect_markers<B>(
    backend: &B,
    image: &GrayImage,
    filter: Option<&[i32]>,
    layout: CornerLayout,
) -> Result<Option<Vec<MarkerObservation>>, PipelineError>
where
    B: MarkerBackend + ?Sized,
{
    for family in MarkerFamily::SEARCH_ORDER {
        let detections = backend.detect(image, family)?;
        if detections.is_empty() {
            continue;
        }

        let observations = detections
            .into_iter()
            .filter(|marker| filter.is_none_or(|ids| ids.contains(&marker.id)))
            .filter(|marker| marker.corners.len() >= 3)
            .map(|marker| MarkerObservation {
                id: marker.id,
                family,
                corners: Corners::with_layout(marker.corners, layout),
            })
            .collect();
        return Ok(Some(observations));
    }
    Ok(None)
}
