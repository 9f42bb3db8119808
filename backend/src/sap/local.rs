//! In-memory source and sink for local development and tests.
//!
//! [`LocalSink`] stages records per transaction the way the planning system
//! does, records every call it receives, and can be told to fail specific
//! calls.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use super::error::{TransportError, TransportResult};
use super::{DataSink, DataSource, SinkSession};
use crate::models::{RawObservation, TransactionId, WritePayload};

/// Parse a conjunction of `FIELD eq 'value'` clauses.
pub fn parse_eq_filter(filter: &str) -> TransportResult<Vec<(String, String)>> {
    let mut clauses = Vec::new();
    for clause in filter.split(" and ") {
        let clause = clause.trim();
        if clause.is_empty() {
            continue;
        }
        let (field, value) = clause
            .split_once(" eq ")
            .ok_or_else(|| TransportError::decode(format!("Unsupported filter clause: {}", clause)))?;
        let value = value.trim();
        let value = value
            .strip_prefix('\'')
            .and_then(|v| v.strip_suffix('\''))
            .unwrap_or(value);
        clauses.push((field.trim().to_string(), value.to_string()));
    }
    Ok(clauses)
}

/// Observations held in memory.
#[derive(Default)]
pub struct LocalSource {
    observations: RwLock<Vec<RawObservation>>,
}

impl LocalSource {
    pub fn new(observations: Vec<RawObservation>) -> Self {
        Self {
            observations: RwLock::new(observations),
        }
    }

    pub fn replace(&self, observations: Vec<RawObservation>) {
        *self.observations.write() = observations;
    }

    pub fn len(&self) -> usize {
        self.observations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.read().is_empty()
    }
}

#[async_trait]
impl DataSource for LocalSource {
    async fn fetch(
        &self,
        primary_key: &str,
        dimensions: &[String],
        filter: Option<&str>,
    ) -> TransportResult<Vec<RawObservation>> {
        let clauses = match filter {
            Some(f) => parse_eq_filter(f).map_err(|e| e.with_operation("fetch"))?,
            None => Vec::new(),
        };

        let mut selected: Vec<&str> = vec![primary_key];
        selected.extend(dimensions.iter().map(String::as_str).filter(|d| *d != primary_key));

        let rows = self
            .observations
            .read()
            .iter()
            .filter(|obs| {
                clauses
                    .iter()
                    .all(|(field, value)| obs.dimension(field) == Some(value.as_str()))
            })
            .map(|obs| {
                let mut projected = RawObservation::new(obs.quantity);
                projected.period = obs.period.clone();
                for name in &selected {
                    if let Some(value) = obs.dimensions.get(*name) {
                        projected.dimensions.insert(name.to_string(), value.clone());
                    }
                }
                projected
            })
            .collect::<Vec<_>>();

        log::debug!("Local source returned {} rows", rows.len());
        Ok(rows)
    }
}

/// One call received by [`LocalSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    BeginSession,
    Send {
        transaction_id: TransactionId,
        fields: String,
        records: usize,
        do_commit: bool,
    },
    InitiateParallel {
        transaction_id: TransactionId,
    },
    Commit {
        transaction_id: TransactionId,
    },
    GetResult {
        transaction_id: TransactionId,
    },
    GetMessages {
        transaction_id: TransactionId,
    },
}

#[derive(Default)]
struct SinkState {
    calls: Vec<SinkCall>,
    staged: HashMap<TransactionId, Vec<Map<String, Value>>>,
    committed: HashMap<TransactionId, Vec<Map<String, Value>>>,
    initiated: HashSet<TransactionId>,
    messages: HashMap<TransactionId, Vec<Value>>,
    sends: usize,
}

/// Recording sink with failure injection.
#[derive(Default)]
pub struct LocalSink {
    state: Mutex<SinkState>,
    fail_sends: Mutex<HashSet<usize>>,
    fail_marker: Mutex<Option<(String, String)>>,
    fail_session: AtomicBool,
    fail_commit: AtomicBool,
    fail_result: AtomicBool,
    send_delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl LocalSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the n-th send (1-based, counted across all transactions).
    pub fn fail_send(self, n: usize) -> Self {
        self.fail_sends.lock().insert(n);
        self
    }

    /// Fail every send whose records contain `field == value`.
    pub fn fail_sends_containing(self, field: impl Into<String>, value: impl Into<String>) -> Self {
        *self.fail_marker.lock() = Some((field.into(), value.into()));
        self
    }

    pub fn fail_session(self) -> Self {
        self.fail_session.store(true, Ordering::SeqCst);
        self
    }

    pub fn fail_commit(self) -> Self {
        self.fail_commit.store(true, Ordering::SeqCst);
        self
    }

    pub fn fail_result(self) -> Self {
        self.fail_result.store(true, Ordering::SeqCst);
        self
    }

    /// Hold every send for `delay` before acknowledging it.
    pub fn with_send_delay(self, delay: Duration) -> Self {
        *self.send_delay.lock() = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.state.lock().calls.clone()
    }

    pub fn sends(&self) -> Vec<SinkCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, SinkCall::Send { .. }))
            .collect()
    }

    pub fn commit_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, SinkCall::Commit { .. }))
            .count()
    }

    pub fn committed_records(&self, transaction_id: &TransactionId) -> Vec<Map<String, Value>> {
        self.state
            .lock()
            .committed
            .get(transaction_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn staged_records(&self, transaction_id: &TransactionId) -> Vec<Map<String, Value>> {
        self.state
            .lock()
            .staged
            .get(transaction_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Highest number of sends observed in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, call: SinkCall) {
        self.state.lock().calls.push(call);
    }

    fn payload_matches_marker(&self, payload: &WritePayload) -> bool {
        let marker = self.fail_marker.lock();
        let Some((field, value)) = marker.as_ref() else {
            return false;
        };
        payload
            .records
            .iter()
            .any(|r| r.get(field).and_then(Value::as_str) == Some(value.as_str()))
    }

    fn commit_records(state: &mut SinkState, transaction_id: &TransactionId) -> usize {
        let staged = state.staged.remove(transaction_id).unwrap_or_default();
        let count = staged.len();
        state
            .committed
            .entry(transaction_id.clone())
            .or_default()
            .extend(staged);
        state
            .messages
            .entry(transaction_id.clone())
            .or_default()
            .push(json!({ "severity": "info", "text": format!("{} records committed", count) }));
        count
    }

    async fn hold(&self, timeout: Duration) -> TransportResult<()> {
        let delay = *self.send_delay.lock();
        if let Some(delay) = delay {
            if tokio::time::timeout(timeout, tokio::time::sleep(delay))
                .await
                .is_err()
            {
                return Err(TransportError::timeout(format!(
                    "Request timed out after {:?}",
                    timeout
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DataSink for LocalSink {
    async fn begin_session(&self) -> TransportResult<SinkSession> {
        self.record(SinkCall::BeginSession);
        if self.fail_session.load(Ordering::SeqCst) {
            return Err(TransportError::authentication("Failed to obtain CSRF token")
                .with_operation("begin_session"));
        }
        Ok(SinkSession::new(TransactionId::generate().to_string()))
    }

    async fn send(
        &self,
        _session: &SinkSession,
        payload: &WritePayload,
        timeout: Duration,
    ) -> TransportResult<Value> {
        let index = {
            let mut state = self.state.lock();
            state.sends += 1;
            state.calls.push(SinkCall::Send {
                transaction_id: payload.transaction_id.clone(),
                fields: payload.field_descriptor(),
                records: payload.record_count(),
                do_commit: payload.do_commit,
            });
            state.sends
        };

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let held = self.hold(timeout).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        held.map_err(|e| e.with_operation("send"))?;

        if self.fail_sends.lock().contains(&index) || self.payload_matches_marker(payload) {
            return Err(TransportError::http(
                400,
                format!("Import rejected for request {}", index),
            )
            .with_operation("send"));
        }

        let mut state = self.state.lock();
        state
            .staged
            .entry(payload.transaction_id.clone())
            .or_default()
            .extend(payload.records.iter().cloned());
        if payload.do_commit {
            Self::commit_records(&mut state, &payload.transaction_id);
        }
        Ok(json!({
            "d": {
                "Transactionid": payload.transaction_id.as_str(),
                "RecordCount": payload.record_count(),
            }
        }))
    }

    async fn initiate_parallel(
        &self,
        _session: &SinkSession,
        _version_id: Option<&str>,
        _scenario_id: Option<&str>,
    ) -> TransportResult<TransactionId> {
        let transaction_id = TransactionId::generate();
        let mut state = self.state.lock();
        state.calls.push(SinkCall::InitiateParallel {
            transaction_id: transaction_id.clone(),
        });
        state.initiated.insert(transaction_id.clone());
        Ok(transaction_id)
    }

    async fn commit(&self, _session: &SinkSession, transaction_id: &TransactionId) -> TransportResult<()> {
        let mut state = self.state.lock();
        state.calls.push(SinkCall::Commit {
            transaction_id: transaction_id.clone(),
        });
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(TransportError::http(500, "Commit failed").with_operation("commit"));
        }
        if !state.staged.contains_key(transaction_id) && !state.initiated.contains(transaction_id) {
            return Err(TransportError::http(
                404,
                format!("Unknown transaction {}", transaction_id),
            )
            .with_operation("commit"));
        }
        Self::commit_records(&mut state, transaction_id);
        Ok(())
    }

    async fn get_result(&self, _session: &SinkSession, transaction_id: &TransactionId) -> TransportResult<Value> {
        let mut state = self.state.lock();
        state.calls.push(SinkCall::GetResult {
            transaction_id: transaction_id.clone(),
        });
        if self.fail_result.load(Ordering::SeqCst) {
            return Err(TransportError::http(503, "Export result unavailable")
                .with_operation("get_result"));
        }
        let status = if state.committed.contains_key(transaction_id) {
            "committed"
        } else if state.staged.contains_key(transaction_id) {
            "staged"
        } else {
            "unknown"
        };
        let records = state.committed.get(transaction_id).map(Vec::len).unwrap_or(0);
        Ok(json!({
            "Transactionid": transaction_id.as_str(),
            "status": status,
            "records": records,
        }))
    }

    async fn get_messages(
        &self,
        _session: &SinkSession,
        transaction_id: &TransactionId,
    ) -> TransportResult<Vec<Value>> {
        let mut state = self.state.lock();
        state.calls.push(SinkCall::GetMessages {
            transaction_id: transaction_id.clone(),
        });
        Ok(state.messages.get(transaction_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(id: &str, records: usize, do_commit: bool) -> WritePayload {
        let mut record = Map::new();
        record.insert("PRDID".into(), json!("P1"));
        WritePayload {
            transaction_id: TransactionId::from_sink(id),
            fields: vec!["PRDID".into()],
            navigation_property: "NavPA".into(),
            records: vec![record; records],
            version_id: None,
            scenario_id: None,
            do_commit,
        }
    }

    #[test]
    fn test_parse_eq_filter() {
        let clauses = parse_eq_filter("PRDID eq 'P1' and LOCID eq 'L 2'").unwrap();
        assert_eq!(
            clauses,
            vec![
                ("PRDID".to_string(), "P1".to_string()),
                ("LOCID".to_string(), "L 2".to_string())
            ]
        );
        assert!(parse_eq_filter("ACTUALSQTY gt 0").is_err());
    }

    #[tokio::test]
    async fn test_source_filters_and_projects() {
        let source = LocalSource::new(vec![
            RawObservation::new(1.0)
                .with_dimension("PRDID", "P1")
                .with_dimension("LOCID", "L1")
                .with_dimension("CUSTID", "C1"),
            RawObservation::new(2.0)
                .with_dimension("PRDID", "P2")
                .with_dimension("LOCID", "L1"),
        ]);
        let rows = source
            .fetch("PRDID", &["PRDID".to_string()], Some("PRDID eq 'P1'"))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].has_dimension("LOCID"));
        assert_eq!(rows[0].dimension("PRDID"), Some("P1"));
    }

    #[tokio::test]
    async fn test_staged_records_commit() {
        let sink = LocalSink::new();
        let session = sink.begin_session().await.unwrap();
        sink.send(&session, &payload("T1", 3, false), Duration::from_secs(1))
            .await
            .unwrap();
        let id = TransactionId::from_sink("T1");
        assert_eq!(sink.staged_records(&id).len(), 3);
        sink.commit(&session, &id).await.unwrap();
        assert_eq!(sink.committed_records(&id).len(), 3);
        let result = sink.get_result(&session, &id).await.unwrap();
        assert_eq!(result["status"], "committed");
        assert_eq!(sink.get_messages(&session, &id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_commit_unknown_transaction_fails() {
        let sink = LocalSink::new();
        let session = sink.begin_session().await.unwrap();
        let err = sink
            .commit(&session, &TransactionId::from_sink("NOPE"))
            .await
            .unwrap_err();
        assert_eq!(err.context().status, Some(404));
    }

    #[tokio::test]
    async fn test_injected_send_failure() {
        let sink = LocalSink::new().fail_send(2);
        let session = sink.begin_session().await.unwrap();
        let timeout = Duration::from_secs(1);
        assert!(sink.send(&session, &payload("T", 1, false), timeout).await.is_ok());
        let err = sink
            .send(&session, &payload("T", 1, false), timeout)
            .await
            .unwrap_err();
        assert_eq!(err.context().operation.as_deref(), Some("send"));
    }

    #[tokio::test]
    async fn test_slow_send_times_out() {
        let sink = LocalSink::new().with_send_delay(Duration::from_millis(200));
        let session = sink.begin_session().await.unwrap();
        let err = sink
            .send(&session, &payload("T", 1, false), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout { .. }));
    }
}
