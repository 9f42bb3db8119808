//! Coefficient-of-variation thresholds mapped to XYZ segments.

use crate::models::{GroupStats, Segment, SegmentationConfig};

/// CV reported for a group whose mean demand is exactly zero.
pub const ZERO_MEAN_CV_SENTINEL: f64 = 999.0;

/// Ordered threshold rules: `cv <= x` is X, `cv <= y` is Y, otherwise Z.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentClassifier {
    x_threshold: f64,
    y_threshold: f64,
}

impl SegmentClassifier {
    /// Thresholds are expected to be validated (`x < y`) by the caller.
    pub fn new(x_threshold: f64, y_threshold: f64) -> Self {
        Self {
            x_threshold,
            y_threshold,
        }
    }

    pub fn from_config(config: &SegmentationConfig) -> Self {
        Self::new(config.x_threshold, config.y_threshold)
    }

    /// CV as a percentage.
    ///
    /// An undefined std (single observation) gives 0, a zero mean gives
    /// [`ZERO_MEAN_CV_SENTINEL`].
    pub fn coefficient_of_variation(stats: &GroupStats) -> f64 {
        match stats.std {
            None => 0.0,
            Some(_) if stats.mean == 0.0 => ZERO_MEAN_CV_SENTINEL,
            Some(std) => std / stats.mean * 100.0,
        }
    }

    pub fn classify(&self, cv: f64) -> Segment {
        if cv.is_nan() {
            Segment::Unknown
        } else if cv <= self.x_threshold {
            Segment::X
        } else if cv <= self.y_threshold {
            Segment::Y
        } else {
            Segment::Z
        }
    }

    /// CV and segment in one step.
    pub fn evaluate(&self, stats: &GroupStats) -> (f64, Segment) {
        let cv = Self::coefficient_of_variation(stats);
        (cv, self.classify(cv))
    }
}

impl Default for SegmentClassifier {
    fn default() -> Self {
        Self::new(
            crate::models::DEFAULT_X_THRESHOLD,
            crate::models::DEFAULT_Y_THRESHOLD,
        )
    }
}
