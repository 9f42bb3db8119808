//! Segmentation configuration and result types.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use super::observation::GroupKey;
use crate::error::{SegmentationError, SegmentationResult};

pub const DEFAULT_X_THRESHOLD: f64 = 10.0;
pub const DEFAULT_Y_THRESHOLD: f64 = 25.0;
pub const DEFAULT_MIN_PERIODS: usize = 6;
pub const MIN_PERIODS_FLOOR: usize = 3;
pub const DEFAULT_OUTLIER_THRESHOLD: f64 = 3.0;
pub const OUTLIER_THRESHOLD_RANGE: (f64, f64) = (1.5, 5.0);

/// Method for turning a group's history into a variability measure.
///
/// Only `MeanStd` is implemented; the others are accepted by the parser so
/// requests that name them get a clear configuration error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMethod {
    #[default]
    MeanStd,
    WeightedMean,
    RollingWindow,
}

impl AggregationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MeanStd => "mean_std",
            Self::WeightedMean => "weighted_mean",
            Self::RollingWindow => "rolling_window",
        }
    }
}

/// Validated analysis parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentationConfig {
    pub primary_key: String,
    pub groupby_attributes: Vec<String>,
    pub x_threshold: f64,
    pub y_threshold: f64,
    pub min_periods: usize,
    pub aggregation_method: AggregationMethod,
    pub remove_outliers: bool,
    pub outlier_threshold: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<String>,
}

impl SegmentationConfig {
    /// Config with default thresholds, anchored on the first attribute.
    pub fn new(groupby_attributes: Vec<String>) -> Self {
        let primary_key = groupby_attributes.first().cloned().unwrap_or_default();
        Self {
            primary_key,
            groupby_attributes,
            x_threshold: DEFAULT_X_THRESHOLD,
            y_threshold: DEFAULT_Y_THRESHOLD,
            min_periods: DEFAULT_MIN_PERIODS,
            aggregation_method: AggregationMethod::MeanStd,
            remove_outliers: false,
            outlier_threshold: DEFAULT_OUTLIER_THRESHOLD,
            filters: None,
        }
    }

    pub fn with_primary_key(mut self, primary_key: impl Into<String>) -> Self {
        self.primary_key = primary_key.into();
        self
    }

    pub fn with_thresholds(mut self, x_threshold: f64, y_threshold: f64) -> Self {
        self.x_threshold = x_threshold;
        self.y_threshold = y_threshold;
        self
    }

    pub fn with_min_periods(mut self, min_periods: usize) -> Self {
        self.min_periods = min_periods;
        self
    }

    pub fn with_outlier_removal(mut self, threshold: f64) -> Self {
        self.remove_outliers = true;
        self.outlier_threshold = threshold;
        self
    }

    pub fn with_aggregation_method(mut self, method: AggregationMethod) -> Self {
        self.aggregation_method = method;
        self
    }

    pub fn with_filters(mut self, filters: Option<String>) -> Self {
        self.filters = filters.filter(|f| !f.trim().is_empty());
        self
    }

    /// Check every invariant. Called before any data is fetched.
    pub fn validate(&self) -> SegmentationResult<()> {
        if self.groupby_attributes.is_empty() {
            return Err(SegmentationError::configuration(
                "groupby_attributes must contain at least one attribute",
            ));
        }

        let mut seen = HashSet::new();
        for attr in &self.groupby_attributes {
            if attr.trim().is_empty() {
                return Err(SegmentationError::configuration(
                    "groupby_attributes must not contain empty names",
                ));
            }
            if !seen.insert(attr.as_str()) {
                return Err(SegmentationError::configuration(format!(
                    "Duplicate attribute in groupby_attributes: {}",
                    attr
                )));
            }
        }

        if !self.groupby_attributes.contains(&self.primary_key) {
            return Err(SegmentationError::configuration(format!(
                "{} must be included in groupby_attributes",
                self.primary_key
            )));
        }

        for (name, value) in [("x_threshold", self.x_threshold), ("y_threshold", self.y_threshold)] {
            if !(0.0..=100.0).contains(&value) {
                return Err(SegmentationError::configuration(format!(
                    "{} must be between 0 and 100, got {}",
                    name, value
                )));
            }
        }

        if self.y_threshold <= self.x_threshold {
            return Err(SegmentationError::configuration(
                "y_threshold must be greater than x_threshold",
            ));
        }

        if self.min_periods < MIN_PERIODS_FLOOR {
            return Err(SegmentationError::configuration(format!(
                "min_periods must be at least {}, got {}",
                MIN_PERIODS_FLOOR, self.min_periods
            )));
        }

        let (low, high) = OUTLIER_THRESHOLD_RANGE;
        if !(low..=high).contains(&self.outlier_threshold) {
            return Err(SegmentationError::configuration(format!(
                "outlier_threshold must be between {} and {}, got {}",
                low, high, self.outlier_threshold
            )));
        }

        if self.aggregation_method != AggregationMethod::MeanStd {
            return Err(SegmentationError::configuration(format!(
                "Unsupported aggregation method: {}",
                self.aggregation_method.as_str()
            )));
        }

        Ok(())
    }

    /// Grouping attributes other than the primary key, in configured order.
    pub fn secondary_attributes(&self) -> Vec<String> {
        self.groupby_attributes
            .iter()
            .filter(|a| **a != self.primary_key)
            .cloned()
            .collect()
    }
}

/// XYZ variability band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Segment {
    X,
    Y,
    Z,
    Unknown,
}

impl Segment {
    pub const CLASSIFIED: [Segment; 3] = [Segment::X, Segment::Y, Segment::Z];

    pub fn as_str(&self) -> &'static str {
        match self {
            Segment::X => "X",
            Segment::Y => "Y",
            Segment::Z => "Z",
            Segment::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Segment {
    type Err = String;

    /// Parses a writable segment letter. `Unknown` is never writable.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "X" => Ok(Segment::X),
            "Y" => Ok(Segment::Y),
            "Z" => Ok(Segment::Z),
            other => Err(format!("Invalid segment value: {}. Must be X, Y, or Z", other)),
        }
    }
}

/// Aggregate statistics for one group.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GroupStats {
    pub mean: f64,
    /// Sample standard deviation; `None` for a single observation.
    pub std: Option<f64>,
    pub count: usize,
}

/// One classified group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentResult {
    pub key: GroupKey,
    pub stats: GroupStats,
    pub cv: f64,
    pub segment: Segment,
}

/// Summary over one analysis run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DataQualityReport {
    pub total_records_analyzed: usize,
    pub outliers_removed: usize,
    pub unique_segments: usize,
    pub records_with_sufficient_history: usize,
    pub records_excluded: usize,
    pub avg_periods_per_segment: f64,
    pub min_periods_per_segment: usize,
    pub max_periods_per_segment: usize,
    pub segment_distribution: BTreeMap<Segment, usize>,
    pub avg_cv_by_segment: BTreeMap<Segment, f64>,
}

/// Results and quality report of one analysis run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SegmentationOutcome {
    pub results: Vec<SegmentResult>,
    pub quality: DataQualityReport,
}

impl SegmentationOutcome {
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn segment_distribution(&self) -> BTreeMap<Segment, usize> {
        let mut counts = BTreeMap::new();
        for result in &self.results {
            *counts.entry(result.segment).or_insert(0) += 1;
        }
        counts
    }
}

/// Row-count coverage of a grouping.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DataCoverage {
    pub total_records: usize,
    pub unique_segments: usize,
    pub avg_periods_per_segment: f64,
    pub min_periods_per_segment: usize,
    pub max_periods_per_segment: usize,
    pub segments_with_sufficient_data: usize,
}

/// Row count of one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSize {
    pub key: GroupKey,
    pub rows: usize,
}

/// Dry-run estimate of a segmentation configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PreviewReport {
    pub estimated_segments: usize,
    pub groups_below_min_periods: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_coverage: Option<DataCoverage>,
    pub group_sizes: Vec<GroupSize>,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-segment breakdown of a result table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentDetail {
    pub count: usize,
    pub avg_cv: f64,
    pub avg_mean_demand: f64,
    pub avg_std_demand: f64,
    pub min_cv: f64,
    pub max_cv: f64,
    pub sample_records: Vec<GroupKey>,
}
