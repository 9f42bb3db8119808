//! SAP IBP OData transport.
//!
//! Reads go to the planning area's extraction entity set with `$format=json`.
//! Writes go to the planning data import service: every POST carries the
//! CSRF token obtained by [`ODataSink::begin_session`] on a cookie-holding
//! client.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::{json, Value};
use std::time::Duration;

use super::error::{TransportError, TransportResult};
use super::{DataSink, DataSource, SinkSession};
use crate::config::SapSettings;
use crate::models::{RawObservation, TransactionId, WritePayload, DEFAULT_PERIOD_FIELD};

pub const QUANTITY_FIELD: &str = "ACTUALSQTY";
pub const BASE_FILTER: &str = "UOMTOID eq 'EA' and ACTUALSQTY gt 0";
const CSRF_HEADER: &str = "X-CSRF-Token";
const JSON: &str = "application/json";

fn required(value: &Option<String>, name: &str) -> TransportResult<String> {
    value
        .as_ref()
        .filter(|v| !v.is_empty())
        .cloned()
        .ok_or_else(|| TransportError::configuration(format!("{} is not configured", name)))
}

async fn ensure_success(
    response: reqwest::Response,
    operation: &str,
    endpoint: &str,
) -> TransportResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    log::error!("{} failed with HTTP {}: {}", operation, status.as_u16(), body);
    Err(TransportError::http(status.as_u16(), body)
        .with_operation(operation)
        .with_endpoint(endpoint))
}

async fn read_json(response: reqwest::Response, operation: &str) -> TransportResult<Value> {
    let text = response
        .text()
        .await
        .map_err(|e| TransportError::from(e).with_operation(operation))?;
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&text)
        .map_err(|e| TransportError::decode(e.to_string()).with_operation(operation))
}

/// Filter sent with every read, extended by the caller's filter.
pub fn build_filter(filter: Option<&str>) -> String {
    match filter.map(str::trim).filter(|f| !f.is_empty()) {
        Some(extra) => format!("{} and {}", BASE_FILTER, extra),
        None => BASE_FILTER.to_string(),
    }
}

/// Primary key first, then the other dimensions, then quantity and period.
pub fn select_fields(primary_key: &str, dimensions: &[String]) -> Vec<String> {
    let mut fields = vec![primary_key.to_string()];
    for dim in dimensions {
        if !fields.contains(dim) {
            fields.push(dim.clone());
        }
    }
    fields.push(QUANTITY_FIELD.to_string());
    fields.push(DEFAULT_PERIOD_FIELD.to_string());
    fields
}

fn entries(body: &Value) -> TransportResult<&Vec<Value>> {
    body.pointer("/d/results")
        .or_else(|| body.get("value"))
        .or_else(|| body.get("d"))
        .and_then(Value::as_array)
        .ok_or_else(|| TransportError::decode("Response carries no result collection"))
}

fn text_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn quantity(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.filter(|q| q.is_finite())
}

/// Normalise an OData v2 `/Date(ms)/` literal to `%Y-%m-%dT%H:%M:%S`.
pub fn period(value: &Value) -> Option<String> {
    let raw = text_value(value)?;
    let millis = raw
        .strip_prefix("/Date(")
        .and_then(|r| r.strip_suffix(")/"))
        .and_then(|r| {
            // Pre-epoch literals carry a leading sign before the optional offset.
            let (sign, digits) = match r.strip_prefix('-') {
                Some(rest) => (-1, rest),
                None => (1, r),
            };
            digits
                .split(['+', '-'])
                .next()
                .filter(|s| !s.is_empty())
                .and_then(|s| s.parse::<i64>().ok())
                .map(|ms| sign * ms)
        });
    match millis.and_then(DateTime::<Utc>::from_timestamp_millis) {
        Some(ts) => Some(ts.format("%Y-%m-%dT%H:%M:%S").to_string()),
        None => Some(raw),
    }
}

/// Turn an OData JSON body into observations.
///
/// Rows whose quantity is missing or non-numeric are dropped. Dimensions the
/// entity did not return are left absent so missing attributes can be
/// reported by name.
pub fn parse_observations(body: &Value, dimensions: &[String]) -> TransportResult<Vec<RawObservation>> {
    let rows = entries(body)?;
    let mut observations = Vec::with_capacity(rows.len());
    let mut dropped = 0;

    for row in rows {
        let Some(qty) = row.get(QUANTITY_FIELD).and_then(quantity) else {
            dropped += 1;
            continue;
        };
        let mut obs = RawObservation::new(qty);
        obs.period = row.get(DEFAULT_PERIOD_FIELD).and_then(period);
        for dim in dimensions {
            if let Some(value) = row.get(dim) {
                obs.dimensions.insert(dim.clone(), text_value(value));
            }
        }
        observations.push(obs);
    }

    if dropped > 0 {
        log::warn!("Dropped {} rows with non-numeric {}", dropped, QUANTITY_FIELD);
    }
    Ok(observations)
}

/// Read side of the OData transport.
pub struct ODataSource {
    client: reqwest::Client,
    url: String,
    username: String,
    password: String,
    timeout: Duration,
}

impl ODataSource {
    pub fn new(settings: &SapSettings) -> TransportResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(TransportError::from)?;
        Ok(Self {
            client,
            url: required(&settings.api_url, "SAP_API_URL")?,
            username: required(&settings.username, "SAP_USERNAME")?,
            password: required(&settings.password, "SAP_PASSWORD")?,
            timeout: settings.timeout(),
        })
    }
}

#[async_trait]
impl DataSource for ODataSource {
    async fn fetch(
        &self,
        primary_key: &str,
        dimensions: &[String],
        filter: Option<&str>,
    ) -> TransportResult<Vec<RawObservation>> {
        let fields = select_fields(primary_key, dimensions);
        let select = fields.join(",");
        let filter = build_filter(filter);
        log::info!("Fetching {} with $filter={}", select, filter);

        let response = self
            .client
            .get(&self.url)
            .query(&[
                ("$select", select.as_str()),
                ("$filter", filter.as_str()),
                ("$format", "json"),
            ])
            .basic_auth(&self.username, Some(&self.password))
            .header(ACCEPT, JSON)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| TransportError::from(e).with_operation("fetch"))?;
        let response = ensure_success(response, "fetch", &self.url).await?;
        let body = read_json(response, "fetch").await?;

        let dims = &fields[..fields.len() - 2];
        let observations = parse_observations(&body, dims)?;
        log::info!("Fetched {} observations", observations.len());
        Ok(observations)
    }
}

/// Write side of the OData transport.
pub struct ODataSink {
    base_url: String,
    username: String,
    password: String,
    planning_area: String,
    timeout: Duration,
}

impl ODataSink {
    pub fn new(settings: &SapSettings) -> TransportResult<Self> {
        let base_url = required(&settings.write_api_url, "SAP_WRITE_API_URL")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            username: required(&settings.username, "SAP_USERNAME")?,
            password: required(&settings.password, "SAP_PASSWORD")?,
            planning_area: required(&settings.planning_area, "SAP_PLANNING_AREA")?,
            timeout: settings.timeout(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn client<'a>(&self, session: &'a SinkSession) -> TransportResult<&'a reqwest::Client> {
        session
            .http
            .as_ref()
            .ok_or_else(|| TransportError::configuration("Session was not opened by the OData sink"))
    }

    async fn post(
        &self,
        session: &SinkSession,
        path: &str,
        body: &Value,
        timeout: Duration,
        operation: &str,
    ) -> TransportResult<Value> {
        let url = self.endpoint(path);
        let response = self
            .client(session)?
            .post(&url)
            .basic_auth(&self.username, Some(&self.password))
            .header(CSRF_HEADER, &session.token)
            .header(CONTENT_TYPE, JSON)
            .header(ACCEPT, JSON)
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| TransportError::from(e).with_operation(operation))?;
        let response = ensure_success(response, operation, &url).await?;
        read_json(response, operation).await
    }

    async fn get(
        &self,
        session: &SinkSession,
        path: &str,
        transaction_id: &TransactionId,
        operation: &str,
    ) -> TransportResult<Value> {
        let url = self.endpoint(path);
        let response = self
            .client(session)?
            .get(&url)
            .query(&[("Transactionid", transaction_id.as_str())])
            .basic_auth(&self.username, Some(&self.password))
            .header(CSRF_HEADER, &session.token)
            .header(ACCEPT, JSON)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| TransportError::from(e).with_operation(operation))?;
        let response = ensure_success(response, operation, &url).await?;
        read_json(response, operation).await
    }
}

#[async_trait]
impl DataSink for ODataSink {
    async fn begin_session(&self) -> TransportResult<SinkSession> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(self.timeout)
            .build()
            .map_err(TransportError::from)?;

        let response = client
            .get(&self.base_url)
            .basic_auth(&self.username, Some(&self.password))
            .header(CSRF_HEADER, "Fetch")
            .header(ACCEPT, JSON)
            .send()
            .await
            .map_err(|e| TransportError::from(e).with_operation("begin_session"))?;
        let response = ensure_success(response, "begin_session", &self.base_url).await?;

        let token = response
            .headers()
            .get(CSRF_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                TransportError::authentication("CSRF token not found in response headers")
                    .with_operation("begin_session")
                    .with_endpoint(&self.base_url)
            })?;
        log::debug!("CSRF token obtained");

        Ok(SinkSession {
            token,
            opened_at: Utc::now(),
            http: Some(client),
        })
    }

    async fn send(
        &self,
        session: &SinkSession,
        payload: &WritePayload,
        timeout: Duration,
    ) -> TransportResult<Value> {
        let path = format!("{}Trans", self.planning_area);
        self.post(session, &path, &payload.to_json(), timeout, "send").await
    }

    async fn initiate_parallel(
        &self,
        session: &SinkSession,
        version_id: Option<&str>,
        scenario_id: Option<&str>,
    ) -> TransportResult<TransactionId> {
        let mut body = json!({ "PlanningArea": self.planning_area });
        if let Some(version) = version_id {
            body["VersionID"] = json!(version);
        }
        if let Some(scenario) = scenario_id {
            body["ScenarioID"] = json!(scenario);
        }
        let response = self
            .post(session, "InitiateParallelProcess", &body, self.timeout, "initiate_parallel")
            .await?;
        response
            .pointer("/d/TransactionID")
            .and_then(Value::as_str)
            .map(TransactionId::from_sink)
            .ok_or_else(|| {
                TransportError::decode("Transaction ID not found in response")
                    .with_operation("initiate_parallel")
            })
    }

    async fn commit(&self, session: &SinkSession, transaction_id: &TransactionId) -> TransportResult<()> {
        let body = json!({ "Transactionid": transaction_id.as_str() });
        self.post(session, "commit", &body, self.timeout, "commit").await?;
        Ok(())
    }

    async fn get_result(&self, session: &SinkSession, transaction_id: &TransactionId) -> TransportResult<Value> {
        self.get(session, "GetExportResult", transaction_id, "get_result").await
    }

    async fn get_messages(
        &self,
        session: &SinkSession,
        transaction_id: &TransactionId,
    ) -> TransportResult<Vec<Value>> {
        let body = self.get(session, "Message", transaction_id, "get_messages").await?;
        Ok(match body {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => {
                let nested = entries(&other).ok().cloned();
                nested.unwrap_or_else(|| vec![other])
            }
        })
    }
}
