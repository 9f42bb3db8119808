//! Analyze-and-write orchestration.
//!
//! Request values left unset fall back to configured defaults in exactly one
//! place, [`WriteDefaults::resolve`]; everything downstream receives fully
//! resolved parameters.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::algorithms::first_period_by_group;
use crate::config::{AppConfig, SapSettings};
use crate::error::{SegmentationError, SegmentationResult, WriteError, WriteFailure};
use crate::models::{
    AttributeCatalog, CustomWriteRequest, GroupKey, Segment, SegmentationConfig,
    SegmentationOutcome, TransactionId, TransactionStatus, WriteMode, WritePayload, WriteRecord,
    WriteRequest, WriteSummary, WriteTransaction, DEFAULT_PERIOD_FIELD,
};
use crate::sap::{DataSink, DataSource};
use crate::services::analysis::run_analysis;
use crate::services::dispatcher::{BatchDispatcher, DispatchOptions};
use crate::services::payload::PayloadBuilder;
use crate::services::segmentation::check_catalog;

/// Column carrying the segment letter in caller-supplied assignments.
pub const SEGMENT_FIELD: &str = "XYZ_Segment";
/// Grouping used when a request names none.
pub const DEFAULT_GROUPBY: &str = "PRDID";
/// Records included in a debug payload preview.
pub const DEBUG_SAMPLE_RECORDS: usize = 3;
const STAT_COLUMNS: [&str; 4] = ["mean", "std", "CV", "count"];

/// Configured fallbacks for write requests.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteDefaults {
    pub x_threshold: f64,
    pub y_threshold: f64,
    pub min_periods: usize,
    pub batch_size: usize,
    pub max_workers: usize,
    pub period_field: String,
}

impl WriteDefaults {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            x_threshold: config.analysis.x_threshold,
            y_threshold: config.analysis.y_threshold,
            min_periods: config.analysis.min_periods,
            batch_size: config.write.batch_size,
            max_workers: config.write.max_workers,
            period_field: config.write.period_field.clone(),
        }
    }

    /// Fill every unset request field and validate the result.
    pub fn resolve(&self, request: &WriteRequest) -> SegmentationResult<ResolvedWrite> {
        let groupby = request
            .groupby_attributes
            .clone()
            .filter(|g| !g.is_empty())
            .unwrap_or_else(|| vec![DEFAULT_GROUPBY.to_string()]);
        let primary_key = request
            .primary_key
            .clone()
            .or_else(|| groupby.first().cloned())
            .unwrap_or_else(|| DEFAULT_GROUPBY.to_string());

        let config = SegmentationConfig::new(groupby)
            .with_primary_key(primary_key)
            .with_thresholds(
                request.x_threshold.unwrap_or(self.x_threshold),
                request.y_threshold.unwrap_or(self.y_threshold),
            )
            .with_min_periods(request.min_periods.unwrap_or(self.min_periods))
            .with_filters(request.filters.clone());
        config.validate()?;

        let options = self.options(request.write_mode, request.batch_size, request.max_workers)?;

        Ok(ResolvedWrite {
            config,
            options,
            version_id: request.version_id.clone(),
            scenario_id: request.scenario_id.clone(),
            period_field: self.period_field(request.period_field.as_deref()),
        })
    }

    fn options(
        &self,
        mode: WriteMode,
        batch_size: Option<usize>,
        max_workers: Option<usize>,
    ) -> SegmentationResult<DispatchOptions> {
        let options = DispatchOptions::new(mode)
            .with_batch_size(batch_size.unwrap_or(self.batch_size))
            .with_max_workers(max_workers.unwrap_or(self.max_workers));
        options.validate()?;
        Ok(options)
    }

    fn period_field(&self, requested: Option<&str>) -> String {
        requested
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(&self.period_field)
            .to_string()
    }
}

/// A write request with every default applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedWrite {
    pub config: SegmentationConfig,
    pub options: DispatchOptions,
    pub version_id: Option<String>,
    pub scenario_id: Option<String>,
    pub period_field: String,
}

impl ResolvedWrite {
    fn analysis_params(&self) -> Value {
        json!({
            "primary_key": self.config.primary_key,
            "groupby_attributes": self.config.groupby_attributes,
            "x_threshold": self.config.x_threshold,
            "y_threshold": self.config.y_threshold,
            "min_periods": self.config.min_periods,
        })
    }
}

/// What a write would send, without sending it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugPayload {
    pub status: String,
    pub message: String,
    pub transaction_id: TransactionId,
    pub payload_structure: Value,
    pub sample_records: Vec<Value>,
    pub data_analysis: Value,
    pub timestamp: String,
}

/// Analysis outcome as typed write records.
///
/// The primary key value is taken from its position in the grouping; the
/// other grouping values follow in configured order. Each group's period is
/// the first period observed for it. Groups with no primary key value cannot
/// be addressed in the sink; they are left out and counted in the second
/// element of the returned pair.
pub fn records_from_outcome(
    outcome: &SegmentationOutcome,
    config: &SegmentationConfig,
    periods: &BTreeMap<GroupKey, String>,
) -> SegmentationResult<(Vec<WriteRecord>, usize)> {
    let position = |attr: &str| {
        config
            .groupby_attributes
            .iter()
            .position(|a| a == attr)
            .ok_or_else(|| SegmentationError::configuration(format!("{} is not a grouping attribute", attr)))
    };
    let primary = position(config.primary_key.as_str())?;
    let secondary = config
        .secondary_attributes()
        .iter()
        .map(|a| position(a.as_str()))
        .collect::<SegmentationResult<Vec<_>>>()?;

    let mut skipped = 0;
    let mut records = Vec::with_capacity(outcome.results.len());
    for result in &outcome.results {
        let Some(primary_value) = result.key.get(primary) else {
            log::warn!(
                "Skipping group {} with no {} value",
                result.key,
                config.primary_key
            );
            skipped += 1;
            continue;
        };
        records.push(WriteRecord {
            primary_value: Some(primary_value.to_string()),
            dimension_values: secondary
                .iter()
                .map(|i| result.key.get(*i).map(str::to_string))
                .collect(),
            segment: result.segment,
            period: periods.get(&result.key).cloned(),
        });
    }
    Ok((records, skipped))
}

fn cell(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Caller-supplied assignments as typed records.
///
/// Returns the extra dimension columns (first-seen order) and the records.
/// Every assignment must name the primary key and a segment of X, Y or Z.
pub fn records_from_assignments(
    segments: &[Map<String, Value>],
    primary_key: &str,
    period_field: &str,
) -> SegmentationResult<(Vec<String>, Vec<WriteRecord>)> {
    if segments.is_empty() {
        return Err(SegmentationError::DataValidation {
            message: "No segment assignments provided".to_string(),
            missing: Vec::new(),
        });
    }

    let mut dimensions: Vec<String> = Vec::new();
    for entry in segments {
        for field in entry.keys() {
            let reserved = field == primary_key
                || field == SEGMENT_FIELD
                || field == period_field
                || STAT_COLUMNS.contains(&field.as_str());
            if !reserved && !dimensions.contains(field) {
                dimensions.push(field.clone());
            }
        }
    }

    let mut invalid = Vec::new();
    let mut records = Vec::with_capacity(segments.len());
    for entry in segments {
        let primary_value = entry.get(primary_key).and_then(cell);
        let segment_value = entry.get(SEGMENT_FIELD).and_then(cell);
        let (Some(primary_value), Some(segment_value)) = (primary_value, segment_value) else {
            return Err(SegmentationError::DataValidation {
                message: format!(
                    "Each segment must have '{}' and '{}' fields",
                    primary_key, SEGMENT_FIELD
                ),
                missing: vec![primary_key.to_string(), SEGMENT_FIELD.to_string()],
            });
        };
        let segment = match segment_value.parse::<Segment>() {
            Ok(segment) => segment,
            Err(_) => {
                if !invalid.contains(&segment_value) {
                    invalid.push(segment_value);
                }
                continue;
            }
        };
        records.push(WriteRecord {
            primary_value: Some(primary_value),
            dimension_values: dimensions.iter().map(|d| entry.get(d).and_then(cell)).collect(),
            segment,
            period: entry.get(period_field).and_then(cell),
        });
    }

    if !invalid.is_empty() {
        return Err(SegmentationError::DataValidation {
            message: format!("Invalid segment values: {:?}. Must be X, Y, or Z", invalid),
            missing: Vec::new(),
        });
    }
    Ok((dimensions, records))
}

fn distribution(records: &[WriteRecord]) -> BTreeMap<Segment, usize> {
    let mut counts = BTreeMap::new();
    for record in records {
        *counts.entry(record.segment).or_insert(0) += 1;
    }
    counts
}

/// Fetch, analyze, build and dispatch.
pub struct WritebackService {
    source: Arc<dyn DataSource>,
    sink: Arc<dyn DataSink>,
    catalog: Arc<AttributeCatalog>,
    settings: SapSettings,
    defaults: WriteDefaults,
    timeout: Duration,
}

impl WritebackService {
    pub fn new(
        source: Arc<dyn DataSource>,
        sink: Arc<dyn DataSink>,
        catalog: Arc<AttributeCatalog>,
        config: &AppConfig,
    ) -> Self {
        Self {
            source,
            sink,
            catalog,
            settings: config.sap.clone(),
            defaults: WriteDefaults::from_config(config),
            timeout: config.sap.timeout(),
        }
    }

    pub fn defaults(&self) -> &WriteDefaults {
        &self.defaults
    }

    fn builder(&self) -> SegmentationResult<PayloadBuilder> {
        PayloadBuilder::from_settings(&self.settings)
    }

    fn dispatcher(&self) -> BatchDispatcher {
        BatchDispatcher::new(Arc::clone(&self.sink), self.timeout)
    }

    /// Resolve, analyze and turn the outcome into a transaction.
    async fn prepare(&self, request: &WriteRequest) -> SegmentationResult<Prepared> {
        let resolved = self.defaults.resolve(request)?;
        check_catalog(&resolved.config, &self.catalog)?;
        log::info!(
            "XYZ write-back requested: mode={}, primary_key={}, groupby={:?}, version={:?}",
            resolved.options.mode,
            resolved.config.primary_key,
            resolved.config.groupby_attributes,
            resolved.version_id
        );

        let (observations, outcome) = run_analysis(self.source.as_ref(), &resolved.config).await?;
        if outcome.is_empty() {
            return Err(SegmentationError::InsufficientData(
                "No segments produced. Try adjusting thresholds or filters.".to_string(),
            ));
        }

        // Observed periods belong to the column the source reads; any other
        // target column is stamped with the write time.
        let periods = if resolved.period_field == DEFAULT_PERIOD_FIELD {
            first_period_by_group(&observations, &resolved.config.groupby_attributes)
        } else {
            log::info!(
                "Period field {} not present in source data, using current time",
                resolved.period_field
            );
            BTreeMap::new()
        };
        let (records, skipped_groups) = records_from_outcome(&outcome, &resolved.config, &periods)?;
        if records.is_empty() {
            return Err(SegmentationError::InsufficientData(format!(
                "No segments with a {} value to write",
                resolved.config.primary_key
            )));
        }
        let transaction = WriteTransaction::new(
            resolved.config.primary_key.clone(),
            resolved.config.secondary_attributes(),
        )
        .with_records(records)
        .with_target(resolved.version_id.clone(), resolved.scenario_id.clone())
        .with_period_field(resolved.period_field.clone());

        Ok(Prepared {
            resolved,
            outcome,
            transaction,
            skipped_groups,
        })
    }

    /// Analyze the source data and write the segments back.
    pub async fn write_segments(&self, request: &WriteRequest) -> Result<WriteSummary, WriteError> {
        let builder = self.builder()?;
        let Prepared {
            resolved,
            outcome,
            transaction,
            skipped_groups,
        } = self.prepare(request).await?;
        let payload = build_payload(&builder, &transaction)?;

        let result = self.dispatcher().dispatch(payload, &resolved.options).await?;
        log::info!("Write operation completed: {}", result.transaction_id);

        Ok(WriteSummary {
            status: result.status,
            transaction_id: result.transaction_id,
            total_products: outcome.results.len(),
            segments_written: distribution(&transaction.records),
            skipped_groups,
            analysis_params: resolved.analysis_params(),
            write_mode: resolved.options.mode,
            version_id: resolved.version_id,
            scenario_id: resolved.scenario_id,
            records_sent: result.records_sent,
            batch_count: result.batch_count,
            export_result: result.export_result,
            message: result.message,
            timestamp: Utc::now().to_rfc3339(),
        })
    }

    /// Write caller-supplied segment assignments.
    pub async fn write_custom(&self, request: &CustomWriteRequest) -> Result<WriteSummary, WriteError> {
        let builder = self.builder()?;
        let primary_key = request
            .primary_key
            .clone()
            .unwrap_or_else(|| DEFAULT_GROUPBY.to_string());
        let period_field = self.defaults.period_field(request.period_field.as_deref());
        let options = self
            .defaults
            .options(request.write_mode, request.batch_size, request.max_workers)?;
        log::info!(
            "Custom segment write requested: {} segments, primary_key={}",
            request.segments.len(),
            primary_key
        );

        let (dimensions, records) =
            records_from_assignments(&request.segments, &primary_key, &period_field)?;
        let segments_written = distribution(&records);
        let total = records.len();
        let transaction = WriteTransaction::new(primary_key.clone(), dimensions)
            .with_records(records)
            .with_target(request.version_id.clone(), request.scenario_id.clone())
            .with_period_field(period_field);
        let payload = build_payload(&builder, &transaction)?;

        let result = self.dispatcher().dispatch(payload, &options).await?;

        Ok(WriteSummary {
            status: result.status,
            transaction_id: result.transaction_id,
            total_products: total,
            segments_written,
            skipped_groups: 0,
            analysis_params: json!({ "primary_key": primary_key }),
            write_mode: options.mode,
            version_id: request.version_id.clone(),
            scenario_id: request.scenario_id.clone(),
            records_sent: result.records_sent,
            batch_count: result.batch_count,
            export_result: result.export_result,
            message: result.message,
            timestamp: Utc::now().to_rfc3339(),
        })
    }

    /// The payload a write would send, with commit set as in simple mode.
    pub async fn debug_payload(&self, request: &WriteRequest) -> SegmentationResult<DebugPayload> {
        let builder = self.builder()?;
        let Prepared {
            resolved,
            outcome,
            mut transaction,
            ..
        } = self.prepare(request).await?;
        transaction.do_commit = true;
        let payload = builder.build(&transaction)?;

        Ok(DebugPayload {
            status: "debug".to_string(),
            message: "This is what would be sent to SAP (not actually sent)".to_string(),
            transaction_id: payload.transaction_id.clone(),
            payload_structure: payload_structure(&payload),
            sample_records: payload
                .records
                .iter()
                .take(DEBUG_SAMPLE_RECORDS)
                .cloned()
                .map(Value::Object)
                .collect(),
            data_analysis: json!({
                "total_segments": outcome.results.len(),
                "segment_distribution": outcome.segment_distribution(),
                "primary_key": resolved.config.primary_key,
                "dimensions_included": payload.fields,
                "write_mode": resolved.options.mode,
            }),
            timestamp: Utc::now().to_rfc3339(),
        })
    }

    /// Export result and messages of a transaction. Lookup failures are
    /// reported in the body, not raised.
    pub async fn transaction_status(&self, transaction_id: &TransactionId) -> Result<TransactionStatus, WriteError> {
        let session = self
            .sink
            .begin_session()
            .await
            .map_err(|e| WriteError::new(Some(transaction_id.clone()), WriteFailure::Session(e)))?;

        let (status, export_result) = match self.sink.get_result(&session, transaction_id).await {
            Ok(result) => ("completed", result),
            Err(e) => {
                log::warn!("Failed to get export result for {}: {}", transaction_id, e);
                ("unknown", json!({ "status": "unknown", "error": e.to_string() }))
            }
        };
        let messages = match self.sink.get_messages(&session, transaction_id).await {
            Ok(messages) => messages,
            Err(e) => {
                log::warn!("Could not fetch messages for {}: {}", transaction_id, e);
                Vec::new()
            }
        };

        Ok(TransactionStatus {
            transaction_id: transaction_id.clone(),
            status: status.to_string(),
            export_result,
            messages,
            timestamp: Utc::now().to_rfc3339(),
        })
    }
}

struct Prepared {
    resolved: ResolvedWrite,
    outcome: SegmentationOutcome,
    transaction: WriteTransaction,
    skipped_groups: usize,
}

/// Build errors surface with the id the transaction was given.
fn build_payload(builder: &PayloadBuilder, transaction: &WriteTransaction) -> Result<WritePayload, WriteError> {
    builder.build(transaction).map_err(|e| {
        WriteError::new(
            Some(transaction.transaction_id.clone()),
            WriteFailure::Segmentation(e),
        )
    })
}

fn payload_structure(payload: &WritePayload) -> Value {
    json!({
        "Transactionid": payload.transaction_id,
        "AggregationLevelFieldsString": payload.field_descriptor(),
        "VersionID": payload.version_id,
        "ScenarioID": payload.scenario_id,
        "DoCommit": payload.do_commit,
        "NavigationProperty": payload.navigation_property,
        "RecordCount": payload.record_count(),
    })
}
