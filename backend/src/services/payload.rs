//! Classified records to the field-ordered import payload.
//!
//! Field order is fixed: primary key, the other dimensions in configured
//! order, the key figure, the optional `<key figure>_isNull` flag, and the
//! period field last. Every record follows the same order.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::config::SapSettings;
use crate::error::{SegmentationError, SegmentationResult};
use crate::models::{Segment, WritePayload, WriteRecord, WriteTransaction};

pub const PERIOD_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Full timestamp for a period value. Bare dates get midnight appended and a
/// missing period becomes `now`.
pub fn normalize_period(value: Option<&str>, now: DateTime<Utc>) -> String {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) if v.contains('T') => v.to_string(),
        Some(v) => format!("{}T00:00:00", v),
        None => now.format(PERIOD_FORMAT).to_string(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PayloadBuilder {
    key_figure: String,
    planning_area: String,
    null_flag_enabled: bool,
}

impl PayloadBuilder {
    pub fn new(key_figure: impl Into<String>, planning_area: impl Into<String>) -> Self {
        Self {
            key_figure: key_figure.into(),
            planning_area: planning_area.into(),
            null_flag_enabled: false,
        }
    }

    pub fn with_null_flag(mut self, enabled: bool) -> Self {
        self.null_flag_enabled = enabled;
        self
    }

    pub fn from_settings(settings: &SapSettings) -> SegmentationResult<Self> {
        let key_figure = settings
            .key_figure
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| SegmentationError::configuration("SAP_XYZ_KEY_FIGURE is not configured"))?;
        let planning_area = settings
            .planning_area
            .clone()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| SegmentationError::configuration("SAP_PLANNING_AREA is not configured"))?;
        Ok(Self::new(key_figure, planning_area).with_null_flag(settings.enable_null_handling))
    }

    pub fn key_figure(&self) -> &str {
        &self.key_figure
    }

    pub fn null_flag_field(&self) -> String {
        format!("{}_isNull", self.key_figure)
    }

    pub fn navigation_property(&self) -> String {
        format!("Nav{}", self.planning_area)
    }

    /// Field order shared by the descriptor and every record.
    pub fn field_order(&self, transaction: &WriteTransaction) -> Vec<String> {
        let mut fields = Vec::with_capacity(transaction.dimensions.len() + 4);
        fields.push(transaction.primary_key.clone());
        fields.extend(transaction.dimensions.iter().cloned());
        fields.push(self.key_figure.clone());
        if self.null_flag_enabled {
            fields.push(self.null_flag_field());
        }
        fields.push(transaction.period_field.clone());
        fields
    }

    pub fn build(&self, transaction: &WriteTransaction) -> SegmentationResult<WritePayload> {
        self.build_at(transaction, Utc::now())
    }

    /// Build with an explicit timestamp for records without a period.
    pub fn build_at(&self, transaction: &WriteTransaction, now: DateTime<Utc>) -> SegmentationResult<WritePayload> {
        let fields = self.field_order(transaction);
        log::info!("AggregationLevelFieldsString: {}", fields.join(","));

        let records = transaction
            .records
            .iter()
            .enumerate()
            .map(|(index, record)| self.record(transaction, index, record, now))
            .collect::<SegmentationResult<Vec<_>>>()?;

        if let Some(first) = records.first() {
            log::debug!("First record: {}", Value::Object(first.clone()));
        }

        Ok(WritePayload {
            transaction_id: transaction.transaction_id.clone(),
            fields,
            navigation_property: self.navigation_property(),
            records,
            version_id: transaction.version_id.clone(),
            scenario_id: transaction.scenario_id.clone(),
            do_commit: transaction.do_commit,
        })
    }

    fn record(
        &self,
        transaction: &WriteTransaction,
        index: usize,
        record: &WriteRecord,
        now: DateTime<Utc>,
    ) -> SegmentationResult<Map<String, Value>> {
        let primary = record
            .primary_value
            .as_deref()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                SegmentationError::PayloadIntegrity(format!(
                    "Record {} has no value for primary key {}",
                    index, transaction.primary_key
                ))
            })?;
        if record.dimension_values.len() != transaction.dimensions.len() {
            return Err(SegmentationError::PayloadIntegrity(format!(
                "Record {} has {} dimension values, expected {}",
                index,
                record.dimension_values.len(),
                transaction.dimensions.len()
            )));
        }
        if record.segment == Segment::Unknown {
            return Err(SegmentationError::PayloadIntegrity(format!(
                "Record {} has no XYZ segment",
                index
            )));
        }

        let mut map = Map::new();
        map.insert(transaction.primary_key.clone(), Value::String(primary.to_string()));
        for (name, value) in transaction.dimensions.iter().zip(&record.dimension_values) {
            if let Some(value) = value {
                map.insert(name.clone(), Value::String(value.clone()));
            }
        }
        map.insert(
            self.key_figure.clone(),
            Value::String(record.segment.as_str().to_string()),
        );
        if self.null_flag_enabled {
            map.insert(self.null_flag_field(), Value::Bool(false));
        }
        map.insert(
            transaction.period_field.clone(),
            Value::String(normalize_period(record.period.as_deref(), now)),
        );
        Ok(map)
    }
}

/// Read payload records back into typed records, following the descriptor.
pub fn parse_records(
    payload: &WritePayload,
    primary_key: &str,
    dimensions: &[String],
    key_figure: &str,
    period_field: &str,
) -> SegmentationResult<Vec<WriteRecord>> {
    let text = |record: &Map<String, Value>, field: &str| {
        record.get(field).and_then(Value::as_str).map(str::to_string)
    };

    payload
        .records
        .iter()
        .enumerate()
        .map(|(index, record)| {
            let segment = text(record, key_figure)
                .ok_or_else(|| {
                    SegmentationError::PayloadIntegrity(format!("Record {} has no {}", index, key_figure))
                })?
                .parse::<Segment>()
                .map_err(SegmentationError::PayloadIntegrity)?;
            Ok(WriteRecord {
                primary_value: text(record, primary_key),
                dimension_values: dimensions.iter().map(|d| text(record, d)).collect(),
                segment,
                period: text(record, period_field),
            })
        })
        .collect()
}
