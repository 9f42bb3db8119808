//! Write-back orchestration against the recording in-memory sink.

mod support;

use std::sync::Arc;
use std::time::Duration;

use ibp_xyz::error::{SegmentationError, WriteFailure};
use ibp_xyz::models::{
    AttributeCatalog, CustomWriteRequest, Segment, TransactionId, WriteMode, WriteRequest,
};
use ibp_xyz::sap::{LocalSink, LocalSource, SinkCall};
use ibp_xyz::services::WritebackService;
use serde_json::{json, Map, Value};

use support::{demand_history, many_products, write_config};

fn service(rows: Vec<ibp_xyz::models::RawObservation>, sink: Arc<LocalSink>) -> WritebackService {
    WritebackService::new(
        Arc::new(LocalSource::new(rows)),
        sink,
        Arc::new(AttributeCatalog::sap_ibp()),
        &write_config(),
    )
}

fn sent_transaction_ids(sink: &LocalSink) -> Vec<TransactionId> {
    sink.sends()
        .into_iter()
        .filter_map(|c| match c {
            SinkCall::Send { transaction_id, .. } => Some(transaction_id),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_simple_write_is_one_committing_call() {
    let sink = Arc::new(LocalSink::new());
    let svc = service(demand_history(), sink.clone());

    let summary = svc.write_segments(&WriteRequest::default()).await.unwrap();

    assert_eq!(summary.status, "success");
    assert_eq!(summary.total_products, 3);
    assert_eq!(summary.records_sent, 3);
    assert_eq!(summary.write_mode, WriteMode::Simple);
    assert_eq!(summary.segments_written[&Segment::X], 1);
    assert_eq!(summary.transaction_id.as_str().len(), 32);

    let sends = sink.sends();
    assert_eq!(sends.len(), 1);
    match &sends[0] {
        SinkCall::Send {
            fields, do_commit, ..
        } => {
            assert_eq!(fields, "PRDID,XYZSEGMENT,PERIODID3_TSTAMP");
            assert!(do_commit);
        }
        other => panic!("unexpected call: {other:?}"),
    }
    assert_eq!(sink.commit_calls(), 0);

    let committed = sink.committed_records(&summary.transaction_id);
    assert_eq!(committed.len(), 3);
    let a = committed.iter().find(|r| r["PRDID"] == "A").unwrap();
    assert_eq!(a["XYZSEGMENT"], "X");
    assert_eq!(a["PERIODID3_TSTAMP"], "2024-01-01T00:00:00");
}

#[tokio::test]
async fn test_group_without_primary_key_is_skipped() {
    let sink = Arc::new(LocalSink::new());
    let mut rows = support::series("A", "1720", &[100.0, 102.0, 98.0, 101.0, 99.0, 100.0]);
    rows.extend([10.0, 200.0, 5.0, 180.0, 8.0, 190.0].iter().enumerate().map(|(i, q)| {
        ibp_xyz::models::RawObservation::new(*q)
            .with_null_dimension("PRDID")
            .with_dimension("LOCID", "1720")
            .with_period(format!("2024-{:02}-01T00:00:00", i + 1))
    }));
    let svc = service(rows, sink.clone());

    let summary = svc.write_segments(&WriteRequest::default()).await.unwrap();

    assert_eq!(summary.total_products, 2);
    assert_eq!(summary.skipped_groups, 1);
    assert_eq!(summary.records_sent, 1);
    assert_eq!(summary.segments_written.get(&Segment::Z), None);
    assert_eq!(summary.transaction_id.as_str().len(), 32);
    let committed = sink.committed_records(&summary.transaction_id);
    assert_eq!(committed.len(), 1);
    assert_eq!(committed[0]["PRDID"], "A");
}

#[tokio::test]
async fn test_only_keyless_groups_is_insufficient_data() {
    let sink = Arc::new(LocalSink::new());
    let rows = [100.0, 101.0, 99.0]
        .iter()
        .map(|q| ibp_xyz::models::RawObservation::new(*q).with_null_dimension("PRDID"))
        .collect();
    let svc = service(rows, sink.clone());
    let request = WriteRequest {
        min_periods: Some(3),
        ..WriteRequest::default()
    };

    let err = svc.write_segments(&request).await.unwrap_err();

    assert!(matches!(
        err.failure,
        WriteFailure::Segmentation(SegmentationError::InsufficientData(_))
    ));
    assert!(sink.calls().is_empty());
}

#[tokio::test]
async fn test_other_period_field_is_stamped_at_write_time() {
    let sink = Arc::new(LocalSink::new());
    let svc = service(demand_history(), sink.clone());
    let request = WriteRequest {
        period_field: Some("PERIODID4_TSTAMP".to_string()),
        ..WriteRequest::default()
    };

    let summary = svc.write_segments(&request).await.unwrap();

    let committed = sink.committed_records(&summary.transaction_id);
    let a = committed.iter().find(|r| r["PRDID"] == "A").unwrap();
    assert!(a.get("PERIODID3_TSTAMP").is_none());
    let stamped = a["PERIODID4_TSTAMP"].as_str().unwrap();
    assert_ne!(stamped, "2024-01-01T00:00:00");
    assert_eq!(stamped.len(), "2024-01-01T00:00:00".len());
}

#[tokio::test]
async fn test_batched_write_shares_transaction_and_commits_once() {
    let sink = Arc::new(LocalSink::new());
    let svc = service(many_products(25), sink.clone());
    let request = WriteRequest {
        write_mode: WriteMode::Batched,
        batch_size: Some(10),
        ..WriteRequest::default()
    };

    let summary = svc.write_segments(&request).await.unwrap();

    assert_eq!(summary.batch_count, Some(3));
    assert_eq!(summary.records_sent, 25);
    let ids = sent_transaction_ids(&sink);
    assert_eq!(ids.len(), 3);
    assert!(ids.iter().all(|id| *id == summary.transaction_id));
    assert!(sink
        .sends()
        .iter()
        .all(|c| matches!(c, SinkCall::Send { do_commit: false, .. })));
    assert_eq!(sink.commit_calls(), 1);
    assert_eq!(sink.committed_records(&summary.transaction_id).len(), 25);
    assert_eq!(summary.export_result.unwrap()["status"], "committed");
}

#[tokio::test]
async fn test_batched_failure_reports_batch_and_transaction() {
    let sink = Arc::new(LocalSink::new().fail_send(2));
    let svc = service(many_products(25), sink.clone());
    let request = WriteRequest {
        write_mode: WriteMode::Batched,
        batch_size: Some(10),
        ..WriteRequest::default()
    };

    let err = svc.write_segments(&request).await.unwrap_err();

    assert!(matches!(err.failure, WriteFailure::Batch { index: 2, .. }));
    assert_eq!(err.succeeded_batches, vec![1]);
    assert_eq!(err.failed_batches, vec![2]);
    let id = err.transaction_id.unwrap();
    assert_eq!(sink.sends().len(), 2);
    assert_eq!(sink.commit_calls(), 0);
    assert_eq!(sink.staged_records(&id).len(), 10);
}

#[tokio::test]
async fn test_parallel_write_respects_worker_limit() {
    let sink = Arc::new(LocalSink::new().with_send_delay(Duration::from_millis(20)));
    let svc = service(many_products(40), sink.clone());
    let request = WriteRequest {
        write_mode: WriteMode::Parallel,
        batch_size: Some(5),
        max_workers: Some(2),
        ..WriteRequest::default()
    };

    let summary = svc.write_segments(&request).await.unwrap();

    assert_eq!(summary.batch_count, Some(8));
    assert!(sink.max_in_flight() <= 2);
    assert!(sent_transaction_ids(&sink)
        .iter()
        .all(|id| *id == summary.transaction_id));
    assert!(sink
        .calls()
        .iter()
        .any(|c| matches!(c, SinkCall::InitiateParallel { .. })));
    assert_eq!(sink.commit_calls(), 1);
    assert_eq!(sink.committed_records(&summary.transaction_id).len(), 40);
}

#[tokio::test]
async fn test_parallel_failure_skips_commit() {
    let sink = Arc::new(LocalSink::new().fail_sends_containing("PRDID", "P0012"));
    let svc = service(many_products(20), sink.clone());
    let request = WriteRequest {
        write_mode: WriteMode::Parallel,
        batch_size: Some(5),
        max_workers: Some(3),
        ..WriteRequest::default()
    };

    let err = svc.write_segments(&request).await.unwrap_err();

    assert_eq!(err.failed_batches, vec![3]);
    assert_eq!(err.succeeded_batches, vec![1, 2, 4]);
    assert!(err.transaction_id.is_some());
    assert_eq!(sink.commit_calls(), 0);
}

#[tokio::test]
async fn test_result_lookup_failure_is_not_fatal() {
    let sink = Arc::new(LocalSink::new().fail_result());
    let svc = service(many_products(4), sink.clone());
    let request = WriteRequest {
        write_mode: WriteMode::Batched,
        batch_size: Some(2),
        ..WriteRequest::default()
    };

    let summary = svc.write_segments(&request).await.unwrap();

    let export = summary.export_result.unwrap();
    assert_eq!(export["status"], "unknown");
    assert!(export["error"].as_str().is_some());
    assert_eq!(sink.committed_records(&summary.transaction_id).len(), 4);
}

#[tokio::test]
async fn test_session_failure_keeps_transaction_id() {
    let sink = Arc::new(LocalSink::new().fail_session());
    let svc = service(demand_history(), sink.clone());

    let err = svc.write_segments(&WriteRequest::default()).await.unwrap_err();

    assert!(matches!(err.failure, WriteFailure::Session(_)));
    assert!(err.transaction_id.is_some());
    assert!(sink.sends().is_empty());
}

#[tokio::test]
async fn test_no_segments_is_insufficient_data() {
    let sink = Arc::new(LocalSink::new());
    let svc = service(support::series("A", "1720", &[1.0, 2.0, 3.0]), sink.clone());

    let err = svc.write_segments(&WriteRequest::default()).await.unwrap_err();

    assert!(matches!(
        err.failure,
        WriteFailure::Segmentation(SegmentationError::InsufficientData(_))
    ));
    assert!(sink.calls().is_empty());
}

#[tokio::test]
async fn test_missing_key_figure_fails_before_fetch() {
    let mut config = write_config();
    config.sap.key_figure = None;
    let sink = Arc::new(LocalSink::new());
    let svc = WritebackService::new(
        Arc::new(LocalSource::new(demand_history())),
        sink.clone(),
        Arc::new(AttributeCatalog::sap_ibp()),
        &config,
    );

    let err = svc.write_segments(&WriteRequest::default()).await.unwrap_err();

    assert!(matches!(
        err.failure,
        WriteFailure::Segmentation(SegmentationError::Configuration(_))
    ));
    assert!(sink.calls().is_empty());
}

#[tokio::test]
async fn test_location_primary_key_orders_fields() {
    let sink = Arc::new(LocalSink::new());
    let svc = service(demand_history(), sink.clone());
    let request = WriteRequest {
        groupby_attributes: Some(vec!["PRDID".into(), "LOCID".into()]),
        primary_key: Some("LOCID".into()),
        version_id: Some("UPSIDE".into()),
        ..WriteRequest::default()
    };

    let summary = svc.write_segments(&request).await.unwrap();

    match &sink.sends()[0] {
        SinkCall::Send { fields, .. } => assert_eq!(fields, "LOCID,PRDID,XYZSEGMENT,PERIODID3_TSTAMP"),
        other => panic!("unexpected call: {other:?}"),
    }
    assert_eq!(summary.version_id.as_deref(), Some("UPSIDE"));
    assert_eq!(summary.analysis_params["primary_key"], "LOCID");
}

fn assignment(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

#[tokio::test]
async fn test_custom_write_sends_assignments() {
    let sink = Arc::new(LocalSink::new());
    let svc = service(Vec::new(), sink.clone());
    let request = CustomWriteRequest {
        segments: vec![
            assignment(&[
                ("PRDID", json!("IBP-100")),
                ("LOCID", json!("1720")),
                ("XYZ_Segment", json!("Z")),
                ("PERIODID3_TSTAMP", json!("2024-03-01")),
            ]),
            assignment(&[
                ("PRDID", json!("IBP-110")),
                ("LOCID", json!("1720")),
                ("XYZ_Segment", json!("X")),
                ("CV", json!(4.2)),
            ]),
        ],
        primary_key: None,
        version_id: None,
        scenario_id: None,
        period_field: None,
        write_mode: WriteMode::Simple,
        batch_size: None,
        max_workers: None,
    };

    let summary = svc.write_custom(&request).await.unwrap();

    assert_eq!(summary.total_products, 2);
    assert_eq!(summary.segments_written[&Segment::Z], 1);
    let committed = sink.committed_records(&summary.transaction_id);
    assert_eq!(committed[0]["PERIODID3_TSTAMP"], "2024-03-01T00:00:00");
    assert_eq!(committed[0]["LOCID"], "1720");
    assert!(committed[1].get("CV").is_none());
}

#[tokio::test]
async fn test_custom_write_rejects_bad_segment() {
    let sink = Arc::new(LocalSink::new());
    let svc = service(Vec::new(), sink.clone());
    let request = CustomWriteRequest {
        segments: vec![assignment(&[("PRDID", json!("P1")), ("XYZ_Segment", json!("Q"))])],
        primary_key: Some("PRDID".into()),
        version_id: None,
        scenario_id: None,
        period_field: None,
        write_mode: WriteMode::Simple,
        batch_size: None,
        max_workers: None,
    };

    let err = svc.write_custom(&request).await.unwrap_err();

    assert!(matches!(
        err.failure,
        WriteFailure::Segmentation(SegmentationError::DataValidation { .. })
    ));
    assert!(sink.calls().is_empty());
}

#[tokio::test]
async fn test_debug_payload_sends_nothing() {
    let sink = Arc::new(LocalSink::new());
    let svc = service(demand_history(), sink.clone());

    let debug = svc.debug_payload(&WriteRequest::default()).await.unwrap();

    assert_eq!(debug.sample_records.len(), 3);
    assert_eq!(debug.payload_structure["DoCommit"], true);
    assert_eq!(debug.payload_structure["NavigationProperty"], "NavSAPIBP1");
    assert_eq!(debug.data_analysis["total_segments"], 3);
    assert!(sink.calls().is_empty());
}

#[tokio::test]
async fn test_transaction_status_after_write() {
    let sink = Arc::new(LocalSink::new());
    let svc = service(demand_history(), sink.clone());
    let summary = svc.write_segments(&WriteRequest::default()).await.unwrap();

    let status = svc.transaction_status(&summary.transaction_id).await.unwrap();

    assert_eq!(status.status, "completed");
    assert_eq!(status.export_result["status"], "committed");
    assert_eq!(status.messages.len(), 1);
}

#[tokio::test]
async fn test_transaction_status_unknown_when_lookup_fails() {
    let sink = Arc::new(LocalSink::new().fail_result());
    let svc = service(Vec::new(), sink);

    let status = svc
        .transaction_status(&TransactionId::from_sink("NOPE"))
        .await
        .unwrap();

    assert_eq!(status.status, "unknown");
    assert_eq!(status.export_result["status"], "unknown");
    assert!(status.messages.is_empty());
}
