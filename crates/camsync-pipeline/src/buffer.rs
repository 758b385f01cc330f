//! Bounded, rate-limited buffer of images waiting for a pose.

use std::collections::VecDeque;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::messages::ImageFrame;

/// Default number of frames kept.
pub const DEFAULT_CAPACITY: usize = 100;
/// Default admission rate (frames per second).
pub const DEFAULT_RATE_HZ: f64 = 1.0;

/// Fill level of a [`TemporalImageBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    Empty,
    Filling,
    Full,
}

/// What happens to buffered frames once they have been published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmitPolicy {
    /// Published frames stay buffered until capacity pushes them out.
    #[default]
    Retain,
    /// Published frames are removed at the end of the tick.
    DropEmitted,
}

/// FIFO of images admitted at most once per `min_spacing` seconds.
///
/// Never blocks: when full, admitting a new frame evicts the oldest one.
#[derive(Debug, Clone)]
pub struct TemporalImageBuffer {
    frames: VecDeque<ImageFrame>,
    capacity: usize,
    min_spacing: f64,
    /// Stamp of the last admitted frame, kept even after that frame is evicted or emitted
    last_accepted: Option<f64>,
}

impl TemporalImageBuffer {
    /// Creates an empty buffer.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum number of frames kept.
    /// * `rate_hz` - Admission rate; frames closer than `1 / rate_hz` seconds to the
    ///   previously admitted frame are rejected.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::InvalidConfig` if `capacity` is zero or `rate_hz` is not a
    /// positive finite number.
    pub fn new(capacity: usize, rate_hz: f64) -> Result<Self, PipelineError> {
        if capacity == 0 {
            return Err(PipelineError::InvalidConfig(
                "buffer capacity must be positive",
            ));
        }
        if !rate_hz.is_finite() || rate_hz <= 0.0 {
            return Err(PipelineError::InvalidConfig(
                "buffer rate must be positive and finite",
            ));
        }
        Ok(Self {
            frames: VecDeque::with_capacity(capacity + 1),
            capacity,
            min_spacing: 1.0 / rate_hz,
            last_accepted: None,
        })
    }

    /// Offers a frame to the buffer; returns whether it was admitted.
    pub fn offer(&mut self, frame: ImageFrame) -> bool {
        let stamp = frame.stamp();
        if !stamp.is_finite() {
            warn!(stamp, "Rejected image with non-finite stamp");
            return false;
        }
        if let Some(last) = self.last_accepted {
            if stamp - last < self.min_spacing {
                return false;
            }
        }

        self.last_accepted = Some(stamp);
        self.frames.push_back(frame);
        if self.frames.len() > self.capacity {
            if let Some(evicted) = self.frames.pop_front() {
                debug!(stamp = evicted.stamp(), "Evicted oldest buffered image");
            }
        }
        true
    }

    /// Frames currently waiting, oldest first.
    pub fn pending(&self) -> impl Iterator<Item = &ImageFrame> {
        self.frames.iter()
    }

    /// Snapshot of all pending frames.
    ///
    /// The buffer itself is left untouched; frames are removed only by
    /// [`TemporalImageBuffer::remove_emitted`] or by eviction.
    pub fn drain_all(&self) -> Vec<ImageFrame> {
        self.frames.iter().cloned().collect()
    }

    /// Removes the frames with the given stamps; returns how many were removed.
    pub fn remove_emitted(&mut self, stamps: &[f64]) -> usize {
        let before = self.frames.len();
        self.frames.retain(|frame| !stamps.contains(&frame.stamp()));
        before - self.frames.len()
    }

    pub fn state(&self) -> BufferState {
        match self.frames.len() {
            0 => BufferState::Empty,
            n if n >= self.capacity => BufferState::Full,
            _ => BufferState::Filling,
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Minimum time between admitted frames (seconds).
    pub fn min_spacing(&self) -> f64 {
        self.min_spacing
    }
}

impl Default for TemporalImageBuffer {
    fn default() -> Self {
        Self {
            frames: VecDeque::with_capacity(DEFAULT_CAPACITY + 1),
            capacity: DEFAULT_CAPACITY,
            min_spacing: 1.0 / DEFAULT_RATE_HZ,
            last_accepted: None,
        }
    }
}
