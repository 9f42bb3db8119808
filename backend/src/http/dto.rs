//! Data Transfer Objects for the HTTP API.
//!
//! Result rows are shaped as JSON objects whose keys are the grouping
//! attribute names, so the column order of a response follows the request.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use crate::config::{AnalysisSettings, ConfigValidation};
use crate::models::{
    AggregationMethod, DataCoverage, DataQualityReport, GroupKey, Segment, SegmentDetail,
    SegmentResult, SegmentationConfig,
};
use crate::services::AttributeDiscovery;

pub use crate::models::{CustomWriteRequest, TransactionStatus, WriteRequest, WriteSummary};
pub use crate::services::DebugPayload;

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub backend: String,
    pub timestamp: String,
}

/// Body of the analysis, preview, export and segment-details endpoints.
///
/// Unset thresholds fall back to the configured analysis defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeRequest {
    pub groupby_attributes: Vec<String>,
    #[serde(default)]
    pub primary_key: Option<String>,
    #[serde(default)]
    pub x_threshold: Option<f64>,
    #[serde(default)]
    pub y_threshold: Option<f64>,
    #[serde(default)]
    pub min_periods: Option<usize>,
    #[serde(default)]
    pub aggregation_method: AggregationMethod,
    #[serde(default)]
    pub remove_outliers: bool,
    #[serde(default)]
    pub outlier_threshold: Option<f64>,
    #[serde(default)]
    pub filters: Option<String>,
}

impl AnalyzeRequest {
    pub fn into_config(self, defaults: &AnalysisSettings) -> SegmentationConfig {
        let mut config = SegmentationConfig::new(self.groupby_attributes)
            .with_thresholds(
                self.x_threshold.unwrap_or(defaults.x_threshold),
                self.y_threshold.unwrap_or(defaults.y_threshold),
            )
            .with_min_periods(self.min_periods.unwrap_or(defaults.min_periods))
            .with_aggregation_method(self.aggregation_method)
            .with_filters(self.filters);
        if let Some(primary_key) = self.primary_key {
            config = config.with_primary_key(primary_key);
        }
        let threshold = self.outlier_threshold.unwrap_or(config.outlier_threshold);
        if self.remove_outliers {
            config = config.with_outlier_removal(threshold);
        } else {
            config.outlier_threshold = threshold;
        }
        config
    }
}

/// Query of `GET /v1/dynamic-segmentation/attributes`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AttributesQuery {
    /// Comma-separated attribute names
    pub attributes: Option<String>,
    pub filters: Option<String>,
}

impl AttributesQuery {
    /// Requested attributes with the catalog's required ones in front.
    pub fn attribute_list(&self, required: &[&str]) -> Vec<String> {
        let mut list: Vec<String> = self
            .attributes
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .collect();
        for (i, attr) in required.iter().enumerate() {
            if !list.iter().any(|a| a == attr) {
                list.insert(i.min(list.len()), attr.to_string());
            }
        }
        list
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeSummary {
    pub attribute: String,
    pub description: String,
}

/// Static attribute catalog listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailableAttributesResponse {
    pub available_attributes: Vec<String>,
    pub detailed_info: Vec<AttributeSummary>,
    pub usage_example: BTreeMap<String, Vec<String>>,
    pub required: Vec<String>,
    pub primary_keys: Vec<String>,
    pub timestamp: String,
}

/// Attributes present in fetched data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributesResponse {
    #[serde(flatten)]
    pub discovery: AttributeDiscovery,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreviewResponse {
    pub config: SegmentationConfig,
    pub estimated_segments: usize,
    pub groups_below_min_periods: usize,
    pub data_coverage: Option<DataCoverage>,
    pub warnings: Vec<String>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeResponse {
    pub total_records: usize,
    pub unique_segments: usize,
    pub segmentation_level: Vec<String>,
    pub segment_distribution: BTreeMap<Segment, usize>,
    pub analysis_params: Value,
    pub data: Vec<Map<String, Value>>,
    pub data_quality: DataQualityReport,
    pub timestamp: String,
}

/// Query of the export endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExportQuery {
    pub format: Option<String>,
}

/// [`SegmentDetail`] with labelled sample keys.
#[derive(Debug, Clone, Serialize)]
pub struct SegmentDetailDto {
    pub count: usize,
    pub avg_cv: f64,
    pub avg_mean_demand: f64,
    pub avg_std_demand: f64,
    pub min_cv: f64,
    pub max_cv: f64,
    pub sample_records: Vec<Map<String, Value>>,
}

impl SegmentDetailDto {
    pub fn from_detail(detail: SegmentDetail, attributes: &[String]) -> Self {
        Self {
            count: detail.count,
            avg_cv: detail.avg_cv,
            avg_mean_demand: detail.avg_mean_demand,
            avg_std_demand: detail.avg_std_demand,
            min_cv: detail.min_cv,
            max_cv: detail.max_cv,
            sample_records: detail
                .sample_records
                .iter()
                .map(|key| labelled_key(key, attributes))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SegmentDetailsResponse {
    pub segment_details: BTreeMap<Segment, SegmentDetailDto>,
    pub total_segments: usize,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidateConfigResponse {
    #[serde(flatten)]
    pub validation: ConfigValidation,
    pub timestamp: String,
}

/// Group key as `{attribute: value}`; null dimensions stay `null`.
pub fn labelled_key(key: &GroupKey, attributes: &[String]) -> Map<String, Value> {
    key.labelled(attributes)
        .into_iter()
        .map(|(attr, value)| (attr.to_string(), value.map_or(Value::Null, |v| json!(v))))
        .collect()
}

/// One result row: the group's attributes, then its statistics and segment.
pub fn segment_row(result: &SegmentResult, attributes: &[String]) -> Map<String, Value> {
    let mut row = labelled_key(&result.key, attributes);
    row.insert("mean".into(), json!(result.stats.mean));
    row.insert("std".into(), json!(result.stats.std));
    row.insert("count".into(), json!(result.stats.count));
    row.insert("CV".into(), json!(result.cv));
    row.insert("XYZ_Segment".into(), json!(result.segment));
    row
}

pub fn analysis_params(config: &SegmentationConfig) -> Value {
    json!({
        "x_threshold": config.x_threshold,
        "y_threshold": config.y_threshold,
        "min_periods": config.min_periods,
        "groupby_attributes": config.groupby_attributes,
        "primary_key": config.primary_key,
        "aggregation_method": config.aggregation_method.as_str(),
        "outliers_removed": config.remove_outliers,
    })
}
