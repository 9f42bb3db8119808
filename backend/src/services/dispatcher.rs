//! Delivery of a built payload to the sink in simple, batched or parallel
//! mode.
//!
//! All batches of one transaction share its id and field descriptor, and at
//! most one request per transaction carries the commit flag. A transaction
//! that fails is never retried here; its id is returned so the caller can
//! inspect the sink's messages.

use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::{SegmentationError, WriteError, WriteFailure};
use crate::models::{
    CommitStatus, DispatchOutcome, TransactionId, WriteMode, WritePayload, DEFAULT_BATCH_SIZE,
    DEFAULT_MAX_WORKERS, MAX_BATCH_SIZE, MAX_WORKERS_CAP, SIMPLE_MODE_SOFT_LIMIT,
};
use crate::sap::{DataSink, SinkSession, TransportError};

/// Contiguous record ranges of at most `size` records, in order.
pub fn batch_ranges(len: usize, size: usize) -> Vec<Range<usize>> {
    let size = size.max(1);
    (0..len)
        .step_by(size)
        .map(|start| start..(start + size).min(len))
        .collect()
}

/// Mode and sizing of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispatchOptions {
    pub mode: WriteMode,
    pub batch_size: usize,
    pub max_workers: usize,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            mode: WriteMode::Simple,
            batch_size: DEFAULT_BATCH_SIZE,
            max_workers: DEFAULT_MAX_WORKERS,
        }
    }
}

impl DispatchOptions {
    pub fn new(mode: WriteMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn validate(&self) -> Result<(), SegmentationError> {
        if !(1..=MAX_BATCH_SIZE).contains(&self.batch_size) {
            return Err(SegmentationError::configuration(format!(
                "batch_size must be between 1 and {}, got {}",
                MAX_BATCH_SIZE, self.batch_size
            )));
        }
        if !(1..=MAX_WORKERS_CAP).contains(&self.max_workers) {
            return Err(SegmentationError::configuration(format!(
                "max_workers must be between 1 and {}, got {}",
                MAX_WORKERS_CAP, self.max_workers
            )));
        }
        Ok(())
    }
}

pub struct BatchDispatcher {
    sink: Arc<dyn DataSink>,
    timeout: Duration,
}

impl BatchDispatcher {
    pub fn new(sink: Arc<dyn DataSink>, timeout: Duration) -> Self {
        Self { sink, timeout }
    }

    pub async fn dispatch(
        &self,
        payload: WritePayload,
        options: &DispatchOptions,
    ) -> Result<DispatchOutcome, WriteError> {
        let rejected = |e: SegmentationError| {
            WriteError::new(
                Some(payload.transaction_id.clone()),
                WriteFailure::Segmentation(e),
            )
        };
        options.validate().map_err(rejected)?;
        if payload.records.is_empty() {
            return Err(rejected(SegmentationError::InsufficientData(
                "No records to write".to_string(),
            )));
        }

        log::info!(
            "Dispatching {} records in {} mode",
            payload.record_count(),
            options.mode
        );
        match options.mode {
            WriteMode::Simple => self.simple(payload).await,
            WriteMode::Batched => self.batched(payload, options.batch_size).await,
            WriteMode::Parallel => {
                self.parallel(payload, options.batch_size, options.max_workers)
                    .await
            }
        }
    }

    async fn open_session(&self, id: Option<&TransactionId>) -> Result<SinkSession, WriteError> {
        self.sink
            .begin_session()
            .await
            .map_err(|e| WriteError::new(id.cloned(), WriteFailure::Session(e)))
    }

    async fn simple(&self, payload: WritePayload) -> Result<DispatchOutcome, WriteError> {
        let id = payload.transaction_id.clone();
        let records = payload.record_count();
        if records > SIMPLE_MODE_SOFT_LIMIT {
            log::warn!(
                "Record count {} exceeds recommended limit of {} for a single request",
                records,
                SIMPLE_MODE_SOFT_LIMIT
            );
        }

        let session = self.open_session(Some(&id)).await?;
        let payload = payload.with_commit(true);
        self.sink
            .send(&session, &payload, self.timeout)
            .await
            .map_err(|e| {
                log::error!("Simple write failed for transaction {}: {}", id, e);
                WriteError::new(Some(id.clone()), WriteFailure::Send(e))
            })?;
        log::info!("Write successful - transaction {}", id);

        Ok(DispatchOutcome {
            status: "success".to_string(),
            mode: WriteMode::Simple,
            transaction_id: id,
            records_sent: records,
            primary_key: payload.fields.first().cloned().unwrap_or_default(),
            batch_count: None,
            batch_size: None,
            parallel_workers: None,
            commit_status: None,
            export_result: None,
            message: "Data written and committed successfully".to_string(),
        })
    }

    async fn batched(&self, payload: WritePayload, batch_size: usize) -> Result<DispatchOutcome, WriteError> {
        let id = payload.transaction_id.clone();
        let session = self.open_session(Some(&id)).await?;
        let ranges = batch_ranges(payload.record_count(), batch_size);
        let batch_count = ranges.len();
        log::info!("Split into {} batches of max {} records", batch_count, batch_size);

        for (i, range) in ranges.into_iter().enumerate() {
            let index = i + 1;
            let batch = payload.slice(range);
            log::info!("Sending batch {}/{} ({} records)", index, batch_count, batch.record_count());
            if let Err(e) = self.sink.send(&session, &batch, self.timeout).await {
                log::error!("Batch {} failed: {}", index, e);
                return Err(WriteError::new(
                    Some(id),
                    WriteFailure::Batch { index, source: e },
                )
                .with_batches((1..index).collect(), vec![index]));
            }
        }

        let commit_status = self.commit(&session, &id, batch_count).await?;
        let export_result = self.verify(&session, &id).await;

        Ok(DispatchOutcome {
            status: "success".to_string(),
            mode: WriteMode::Batched,
            transaction_id: id,
            records_sent: payload.record_count(),
            primary_key: payload.fields.first().cloned().unwrap_or_default(),
            batch_count: Some(batch_count),
            batch_size: Some(batch_size),
            parallel_workers: None,
            commit_status: Some(commit_status),
            export_result: Some(export_result),
            message: "Data written and committed in batches".to_string(),
        })
    }

    async fn parallel(
        &self,
        payload: WritePayload,
        batch_size: usize,
        max_workers: usize,
    ) -> Result<DispatchOutcome, WriteError> {
        let session = self.open_session(None).await?;
        let id = self
            .sink
            .initiate_parallel(
                &session,
                payload.version_id.as_deref(),
                payload.scenario_id.as_deref(),
            )
            .await
            .map_err(|e| WriteError::new(None, WriteFailure::Initiate(e)))?;
        log::info!("Parallel process initiated with transaction {}", id);
        let payload = payload.with_transaction_id(id.clone());

        let ranges = batch_ranges(payload.record_count(), batch_size);
        let batch_count = ranges.len();
        log::info!(
            "Split into {} batches for parallel processing ({} workers)",
            batch_count,
            max_workers
        );

        let semaphore = Arc::new(Semaphore::new(max_workers));
        let mut workers = JoinSet::new();
        let mut pending: BTreeSet<usize> = BTreeSet::new();
        for (i, range) in ranges.into_iter().enumerate() {
            let index = i + 1;
            pending.insert(index);
            let batch = payload.slice(range);
            let sink = Arc::clone(&self.sink);
            let semaphore = Arc::clone(&semaphore);
            let timeout = self.timeout;
            workers.spawn(async move {
                let result = async {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|e| TransportError::configuration(e.to_string()))?;
                    let worker_session = sink.begin_session().await?;
                    sink.send(&worker_session, &batch, timeout).await
                }
                .await;
                (index, result)
            });
        }

        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        let mut errors = Vec::new();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((index, Ok(_))) => {
                    pending.remove(&index);
                    log::info!("Batch {} completed successfully", index);
                    succeeded.push(index);
                }
                Ok((index, Err(e))) => {
                    pending.remove(&index);
                    log::error!("Batch {} failed: {}", index, e);
                    errors.push(format!("batch {}: {}", index, e));
                    failed.push(index);
                }
                Err(e) => {
                    log::error!("Batch worker aborted: {}", e);
                    errors.push(e.to_string());
                }
            }
        }
        failed.extend(pending);
        succeeded.sort_unstable();
        failed.sort_unstable();

        if !failed.is_empty() {
            log::error!("Failed batches: {:?}", failed);
            return Err(WriteError::new(
                Some(id),
                WriteFailure::Batches {
                    indices: failed.clone(),
                    errors,
                },
            )
            .with_batches(succeeded, failed));
        }

        let commit_status = self.commit(&session, &id, batch_count).await?;
        let export_result = self.verify(&session, &id).await;

        Ok(DispatchOutcome {
            status: "success".to_string(),
            mode: WriteMode::Parallel,
            transaction_id: id,
            records_sent: payload.record_count(),
            primary_key: payload.fields.first().cloned().unwrap_or_default(),
            batch_count: Some(batch_count),
            batch_size: Some(batch_size),
            parallel_workers: Some(max_workers),
            commit_status: Some(commit_status),
            export_result: Some(export_result),
            message: "Data written in parallel and committed".to_string(),
        })
    }

    async fn commit(
        &self,
        session: &SinkSession,
        id: &TransactionId,
        batch_count: usize,
    ) -> Result<CommitStatus, WriteError> {
        log::info!("All batches sent, committing transaction {}", id);
        self.sink.commit(session, id).await.map_err(|e| {
            log::error!("Commit failed for transaction {}: {}", id, e);
            WriteError::new(Some(id.clone()), WriteFailure::Commit(e))
                .with_batches((1..=batch_count).collect(), Vec::new())
        })?;
        Ok(CommitStatus {
            status: "committed".to_string(),
            transaction_id: id.clone(),
        })
    }

    /// Export result after commit. A failed lookup does not fail the write.
    async fn verify(&self, session: &SinkSession, id: &TransactionId) -> Value {
        match self.sink.get_result(session, id).await {
            Ok(result) => result,
            Err(e) => {
                log::warn!("Failed to get export result for {}: {}", id, e);
                json!({ "status": "unknown", "error": e.to_string() })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_batch_ranges() {
        assert_eq!(batch_ranges(12, 5), vec![0..5, 5..10, 10..12]);
        assert_eq!(batch_ranges(10, 5), vec![0..5, 5..10]);
        assert!(batch_ranges(0, 5).is_empty());
    }

    #[test]
    fn test_options_bounds() {
        assert!(DispatchOptions::default().validate().is_ok());
        assert!(DispatchOptions::new(WriteMode::Batched)
            .with_batch_size(0)
            .validate()
            .is_err());
        assert!(DispatchOptions::new(WriteMode::Batched)
            .with_batch_size(MAX_BATCH_SIZE + 1)
            .validate()
            .is_err());
        assert!(DispatchOptions::new(WriteMode::Parallel)
            .with_max_workers(11)
            .validate()
            .is_err());
    }

    fn empty_payload() -> WritePayload {
        WritePayload {
            transaction_id: TransactionId::from_sink("ENTRY01"),
            fields: vec!["PRDID".into(), "XYZSEG".into()],
            navigation_property: "NavXYZSEG".into(),
            records: Vec::new(),
            version_id: None,
            scenario_id: None,
            do_commit: false,
        }
    }

    #[tokio::test]
    async fn test_rejected_dispatch_keeps_transaction_id() {
        let sink = Arc::new(crate::sap::LocalSink::new());
        let dispatcher = BatchDispatcher::new(sink.clone(), Duration::from_secs(1));

        let err = dispatcher
            .dispatch(empty_payload(), &DispatchOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.transaction_id, Some(TransactionId::from_sink("ENTRY01")));
        assert!(matches!(
            err.failure,
            WriteFailure::Segmentation(SegmentationError::InsufficientData(_))
        ));

        let mut payload = empty_payload();
        payload.records.push(serde_json::Map::new());
        let err = dispatcher
            .dispatch(payload, &DispatchOptions::new(WriteMode::Batched).with_batch_size(0))
            .await
            .unwrap_err();
        assert_eq!(err.transaction_id, Some(TransactionId::from_sink("ENTRY01")));
        assert!(sink.calls().is_empty());
    }

    proptest! {
        #[test]
        fn prop_batches_cover_each_record_once(len in 0usize..2000, size in 1usize..600) {
            let ranges = batch_ranges(len, size);
            prop_assert_eq!(ranges.len(), len.div_ceil(size));
            let mut next = 0;
            for range in &ranges {
                prop_assert_eq!(range.start, next);
                prop_assert!(range.end - range.start <= size);
                prop_assert!(range.end > range.start);
                next = range.end;
            }
            prop_assert_eq!(next, len);
        }
    }
}
