//! Write-back transaction and payload types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use uuid::Uuid;

use super::segmentation::Segment;

pub const DEFAULT_BATCH_SIZE: usize = 5000;
pub const MAX_BATCH_SIZE: usize = 10_000;
/// Above this record count a simple-mode write logs an advisory warning.
pub const SIMPLE_MODE_SOFT_LIMIT: usize = 5000;
pub const DEFAULT_MAX_WORKERS: usize = 4;
pub const MAX_WORKERS_CAP: usize = 10;
pub const DEFAULT_PERIOD_FIELD: &str = "PERIODID3_TSTAMP";
pub const TRANSACTION_ID_LEN: usize = 32;

/// How a transaction's records reach the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// One request carrying every record and the commit flag.
    #[default]
    Simple,
    /// Sequential batches followed by an explicit commit.
    Batched,
    /// Concurrent batches under a sink-assigned transaction, then commit.
    Parallel,
}

impl WriteMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Batched => "batched",
            Self::Parallel => "parallel",
        }
    }
}

impl FromStr for WriteMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "simple" => Ok(Self::Simple),
            "batched" | "batch" => Ok(Self::Batched),
            "parallel" => Ok(Self::Parallel),
            _ => Err(format!("Unknown write mode: {}", s)),
        }
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque transaction token shared by every batch of one write.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    /// Client-generated id: 32 uppercase hex characters.
    pub fn generate() -> Self {
        let mut hex = Uuid::new_v4().simple().to_string().to_uppercase();
        hex.truncate(TRANSACTION_ID_LEN);
        TransactionId(hex)
    }

    /// Id assigned by the sink (parallel mode) or supplied by a caller.
    pub fn from_sink(id: impl Into<String>) -> Self {
        TransactionId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One output row of a write transaction.
///
/// `dimension_values` is positional and aligned with
/// [`WriteTransaction::dimensions`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteRecord {
    pub primary_value: Option<String>,
    pub dimension_values: Vec<Option<String>>,
    pub segment: Segment,
    pub period: Option<String>,
}

impl WriteRecord {
    pub fn new(primary_value: impl Into<String>, segment: Segment) -> Self {
        Self {
            primary_value: Some(primary_value.into()),
            dimension_values: Vec::new(),
            segment,
            period: None,
        }
    }

    pub fn with_dimension_value(mut self, value: Option<String>) -> Self {
        self.dimension_values.push(value);
        self
    }

    pub fn with_period(mut self, period: impl Into<String>) -> Self {
        self.period = Some(period.into());
        self
    }
}

/// One write-back unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteTransaction {
    pub transaction_id: TransactionId,
    pub primary_key: String,
    /// Extra dimension columns after the primary key, in configured order.
    pub dimensions: Vec<String>,
    pub version_id: Option<String>,
    pub scenario_id: Option<String>,
    pub period_field: String,
    pub records: Vec<WriteRecord>,
    pub do_commit: bool,
}

impl WriteTransaction {
    pub fn new(primary_key: impl Into<String>, dimensions: Vec<String>) -> Self {
        Self {
            transaction_id: TransactionId::generate(),
            primary_key: primary_key.into(),
            dimensions,
            version_id: None,
            scenario_id: None,
            period_field: DEFAULT_PERIOD_FIELD.to_string(),
            records: Vec::new(),
            do_commit: false,
        }
    }

    pub fn with_records(mut self, records: Vec<WriteRecord>) -> Self {
        self.records = records;
        self
    }

    pub fn with_target(mut self, version_id: Option<String>, scenario_id: Option<String>) -> Self {
        self.version_id = version_id;
        self.scenario_id = scenario_id;
        self
    }

    pub fn with_period_field(mut self, period_field: impl Into<String>) -> Self {
        self.period_field = period_field.into();
        self
    }

    pub fn segment_distribution(&self) -> BTreeMap<Segment, usize> {
        let mut counts = BTreeMap::new();
        for record in &self.records {
            *counts.entry(record.segment).or_insert(0) += 1;
        }
        counts
    }
}

/// Field-ordered import payload, ready for the sink.
#[derive(Debug, Clone, PartialEq)]
pub struct WritePayload {
    pub transaction_id: TransactionId,
    /// Field order shared by the descriptor string and every record.
    pub fields: Vec<String>,
    pub navigation_property: String,
    pub records: Vec<Map<String, Value>>,
    pub version_id: Option<String>,
    pub scenario_id: Option<String>,
    pub do_commit: bool,
}

impl WritePayload {
    /// The comma-joined `AggregationLevelFieldsString`.
    pub fn field_descriptor(&self) -> String {
        self.fields.join(",")
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn with_transaction_id(mut self, transaction_id: TransactionId) -> Self {
        self.transaction_id = transaction_id;
        self
    }

    pub fn with_commit(mut self, do_commit: bool) -> Self {
        self.do_commit = do_commit;
        self
    }

    /// A copy restricted to `range`, never carrying the commit flag.
    pub fn slice(&self, range: Range<usize>) -> WritePayload {
        WritePayload {
            transaction_id: self.transaction_id.clone(),
            fields: self.fields.clone(),
            navigation_property: self.navigation_property.clone(),
            records: self.records[range].to_vec(),
            version_id: self.version_id.clone(),
            scenario_id: self.scenario_id.clone(),
            do_commit: false,
        }
    }

    /// Wire body as SAP's import service expects it.
    pub fn to_json(&self) -> Value {
        let mut body = Map::new();
        body.insert(
            "Transactionid".to_string(),
            Value::String(self.transaction_id.to_string()),
        );
        body.insert(
            "AggregationLevelFieldsString".to_string(),
            Value::String(self.field_descriptor()),
        );
        if let Some(version) = &self.version_id {
            body.insert("VersionID".to_string(), Value::String(version.clone()));
        }
        if let Some(scenario) = &self.scenario_id {
            body.insert("ScenarioID".to_string(), Value::String(scenario.clone()));
        }
        if self.do_commit {
            body.insert("DoCommit".to_string(), Value::Bool(true));
        }
        body.insert(
            self.navigation_property.clone(),
            Value::Array(self.records.iter().cloned().map(Value::Object).collect()),
        );
        Value::Object(body)
    }
}

/// Write-back request as accepted from callers. Unset fields fall back to
/// configured defaults exactly once, in the write-back service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteRequest {
    #[serde(default)]
    pub primary_key: Option<String>,
    #[serde(default)]
    pub groupby_attributes: Option<Vec<String>>,
    #[serde(default)]
    pub x_threshold: Option<f64>,
    #[serde(default)]
    pub y_threshold: Option<f64>,
    #[serde(default)]
    pub min_periods: Option<usize>,
    #[serde(default)]
    pub filters: Option<String>,
    #[serde(default)]
    pub write_mode: WriteMode,
    #[serde(default)]
    pub version_id: Option<String>,
    #[serde(default)]
    pub scenario_id: Option<String>,
    #[serde(default)]
    pub period_field: Option<String>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub max_workers: Option<usize>,
}

/// Caller-supplied segment assignments for a custom write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomWriteRequest {
    /// Each entry maps field names to values and must contain the primary
    /// key and `XYZ_Segment`.
    pub segments: Vec<Map<String, Value>>,
    #[serde(default)]
    pub primary_key: Option<String>,
    #[serde(default)]
    pub version_id: Option<String>,
    #[serde(default)]
    pub scenario_id: Option<String>,
    #[serde(default)]
    pub period_field: Option<String>,
    #[serde(default)]
    pub write_mode: WriteMode,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub max_workers: Option<usize>,
}

/// Commit acknowledgement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitStatus {
    pub status: String,
    pub transaction_id: TransactionId,
}

/// Result of a completed dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub status: String,
    pub mode: WriteMode,
    pub transaction_id: TransactionId,
    pub records_sent: usize,
    pub primary_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel_workers: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_status: Option<CommitStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export_result: Option<Value>,
    pub message: String,
}

/// Response of an analyze-and-write operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteSummary {
    pub status: String,
    pub transaction_id: TransactionId,
    pub total_products: usize,
    pub segments_written: BTreeMap<Segment, usize>,
    /// Analyzed groups left out because their primary key value was null.
    #[serde(default)]
    pub skipped_groups: usize,
    pub analysis_params: Value,
    pub write_mode: WriteMode,
    pub version_id: Option<String>,
    pub scenario_id: Option<String>,
    pub records_sent: usize,
    pub batch_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export_result: Option<Value>,
    pub message: String,
    pub timestamp: String,
}

/// Sink-side state of a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionStatus {
    pub transaction_id: TransactionId,
    pub status: String,
    pub export_result: Value,
    pub messages: Vec<Value>,
    pub timestamp: String,
}
