//! This module defines the error types used by the `camsync-pipeline` crate.

#![warn(missing_docs)]

use camsync_geometry::GeometryError;
use thiserror::Error;

/// Error type for pipeline operations.
///
/// Missing inputs (no intrinsics yet, no pose covering an image) are not errors; they
/// are reported through `Option` values and tick reports.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A geometric operation rejected its input.
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    /// A configuration value is out of range.
    /// This variant is returned when a buffer capacity or rate is not positive.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// An image does not match its declared dimensions.
    #[error("Invalid image: {0}")]
    InvalidImage(&'static str),
    /// The marker detection back end failed.
    #[error("Marker backend failed: {0}")]
    MarkerBackend(String),
    /// An input channel was closed by its producer.
    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),
}
