//! Time-ordered pose trajectory with pose-at-time queries.

use std::collections::VecDeque;

use camsync_geometry::StampedPose;
use tracing::debug;

/// Default retention window of the trajectory (seconds).
pub const DEFAULT_RETENTION_SECS: f64 = 300.0;

/// Number of poses always kept by retention, so interpolation stays possible.
const MIN_RETAINED_POSES: usize = 2;

/// Append-only sequence of stamped poses produced by the mapping collaborator.
///
/// Stamps are expected to be non-decreasing. Duplicate stamps are kept; the
/// zero-length segments they form are skipped by [`Trajectory::interpolate`].
#[derive(Debug, Clone)]
pub struct Trajectory {
    poses: VecDeque<StampedPose>,
    frame_id: String,
    /// Poses older than `last_stamp - retention` are dropped; `None` keeps everything
    retention: Option<f64>,
}

impl Trajectory {
    /// Creates an unbounded trajectory expressed in `frame_id`.
    pub fn new(frame_id: impl Into<String>) -> Self {
        Self {
            poses: VecDeque::new(),
            frame_id: frame_id.into(),
            retention: None,
        }
    }

    /// Sets the retention window in seconds. `None` disables retention.
    pub fn with_retention(mut self, retention: Option<f64>) -> Self {
        self.retention = retention;
        self
    }

    /// Appends a pose and applies the retention window.
    pub fn append(&mut self, pose: StampedPose) {
        let newest = pose.stamp;
        self.poses.push_back(pose);

        let Some(window) = self.retention else {
            return;
        };
        let mut dropped = 0;
        while self.poses.len() > MIN_RETAINED_POSES
            && self.poses.front().is_some_and(|p| newest - p.stamp > window)
        {
            self.poses.pop_front();
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, window, "Dropped poses outside the retention window");
        }
    }

    /// Pose at time `t`.
    ///
    /// Scans for the first segment `[t1, t2]` with `t2 > t1` that contains `t`, then
    /// interpolates with `w = (t - t1) / (t2 - t1)`: positions linearly, orientations
    /// along the shortest arc. The result is stamped `t`.
    ///
    /// Returns `None` when `t` is outside `[first_stamp, last_stamp]`, when fewer than
    /// two poses are stored, or when only zero-length segments cover `t`.
    pub fn interpolate(&self, t: f64) -> Option<StampedPose> {
        if self.poses.len() < 2 || !t.is_finite() {
            return None;
        }
        let (first, last) = (self.first_stamp()?, self.last_stamp()?);
        if t < first || t > last {
            return None;
        }

        for i in 0..self.poses.len() - 1 {
            let (a, b) = (&self.poses[i], &self.poses[i + 1]);
            let dt = b.stamp - a.stamp;
            if dt <= 0.0 {
                continue;
            }
            if a.stamp <= t && t <= b.stamp {
                let w = (t - a.stamp) / dt;
                return Some(StampedPose::new(t, a.pose.interpolate(&b.pose, w)));
            }
        }
        None
    }

    pub fn first_stamp(&self) -> Option<f64> {
        self.poses.front().map(|p| p.stamp)
    }

    pub fn last_stamp(&self) -> Option<f64> {
        self.poses.back().map(|p| p.stamp)
    }

    pub fn len(&self) -> usize {
        self.poses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }

    /// Stored poses, oldest first.
    pub fn poses(&self) -> impl Iterator<Item = &StampedPose> {
        self.poses.iter()
    }

    /// Frame the poses (and interpolation results) are expressed in.
    pub fn frame_id(&self) -> &str {
        &self.frame_id
    }
}
