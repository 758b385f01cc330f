#![warn(missing_docs)]

//! Error types for the geometry library.
//!
//! Every variant here describes malformed input handed over by a caller. Missing data
//! (no depth sample, no pose coverage) is never an error and is reported with `Option`.

use thiserror::Error;

/// Errors that can occur while building poses, projection models or sampling depth.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    /// A quaternion component is NaN or infinite.
    #[error("Non-finite quaternion: {0}")]
    NonFiniteQuaternion(&'static str),
    /// A quaternion has (numerically) zero norm and cannot describe a rotation.
    #[error("Degenerate quaternion: {0}")]
    DegenerateQuaternion(&'static str),
    /// A position component is NaN or infinite.
    #[error("Non-finite position: {0}")]
    NonFinitePosition(&'static str),
    /// The intrinsic matrix cannot be inverted.
    #[error("Singular intrinsics: {0}")]
    SingularIntrinsics(&'static str),
    /// The intrinsic matrix is not of the pinhole form `[fx 0 cx; 0 fy cy; 0 0 1]`.
    #[error("Invalid intrinsics: {0}")]
    InvalidIntrinsics(&'static str),
    /// The Moore-Penrose pseudo-inverse of a projection matrix could not be computed.
    #[error("Pseudo-inverse failed: {0}")]
    PseudoInverse(&'static str),
    /// A pixel used as a depth sampling centre lies outside the depth map.
    #[error("Pixel ({u:.2}, {v:.2}) outside depth map of {width}x{height}")]
    PixelOutOfBounds {
        /// Column coordinate of the offending pixel.
        u: f64,
        /// Row coordinate of the offending pixel.
        v: f64,
        /// Depth map width in pixels.
        width: usize,
        /// Depth map height in pixels.
        height: usize,
    },
    /// The depth map buffer does not match its declared dimensions.
    #[error("Invalid depth map: {0}")]
    InvalidDepthMap(&'static str),
}
