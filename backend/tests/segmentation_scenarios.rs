//! End-to-end segmentation scenarios through the public engine API.

mod support;

use ibp_xyz::algorithms::SegmentClassifier;
use ibp_xyz::error::SegmentationError;
use ibp_xyz::models::{GroupKey, RawObservation, Segment, SegmentationConfig};
use ibp_xyz::services::{analyze, preview};
use proptest::prelude::*;

use support::{demand_history, series};

fn config(attrs: &[&str]) -> SegmentationConfig {
    SegmentationConfig::new(attrs.iter().map(|a| a.to_string()).collect())
}

fn segment_of(outcome: &ibp_xyz::models::SegmentationOutcome, product: &str) -> Option<Segment> {
    outcome
        .results
        .iter()
        .find(|r| r.key.get(0) == Some(product))
        .map(|r| r.segment)
}

#[test]
fn test_stable_moderate_volatile_products() {
    let outcome = analyze(&demand_history(), &config(&["PRDID"])).unwrap();

    assert_eq!(segment_of(&outcome, "A"), Some(Segment::X));
    assert_eq!(segment_of(&outcome, "B"), Some(Segment::Y));
    assert_eq!(segment_of(&outcome, "C"), Some(Segment::Z));
    assert_eq!(segment_of(&outcome, "D"), None);

    let quality = &outcome.quality;
    assert_eq!(quality.total_records_analyzed, 21);
    assert_eq!(quality.unique_segments, 3);
    assert_eq!(quality.records_excluded, 1);
    assert_eq!(quality.min_periods_per_segment, 6);
    assert_eq!(quality.segment_distribution[&Segment::Z], 1);
}

#[test]
fn test_reference_series_coefficients() {
    let mut rows = series("STEADY", "1720", &[100.0; 6]);
    rows.extend(series("SEASONAL", "1720", &[100.0, 120.0, 95.0, 110.0, 90.0, 130.0]));
    rows.extend(series("ERRATIC", "1720", &[10.0, 200.0, 5.0, 180.0, 8.0, 190.0]));
    rows.extend(series("NEW", "1720", &[40.0, 60.0]));
    let outcome = analyze(&rows, &config(&["PRDID"]).with_min_periods(6)).unwrap();

    let cv_of = |product: &str| {
        outcome
            .results
            .iter()
            .find(|r| r.key.get(0) == Some(product))
            .map(|r| (r.cv, r.segment))
    };
    let (cv, segment) = cv_of("STEADY").unwrap();
    assert_eq!(cv, 0.0);
    assert_eq!(segment, Segment::X);
    let (cv, segment) = cv_of("SEASONAL").unwrap();
    assert!((cv - 14.336).abs() < 1e-3, "cv = {cv}");
    assert_eq!(segment, Segment::Y);
    let (cv, segment) = cv_of("ERRATIC").unwrap();
    assert!((cv - 101.262).abs() < 1e-3, "cv = {cv}");
    assert_eq!(segment, Segment::Z);
    assert!(cv_of("NEW").is_none());
    assert_eq!(outcome.quality.records_excluded, 1);
}

#[test]
fn test_product_location_level() {
    let mut rows = series("A", "1710", &[10.0, 11.0, 9.0, 10.0, 10.0, 10.0]);
    rows.extend(series("A", "1720", &[1.0, 30.0, 2.0, 25.0, 1.0, 40.0]));
    let outcome = analyze(&rows, &config(&["PRDID", "LOCID"])).unwrap();

    assert_eq!(outcome.results.len(), 2);
    let by_location = |loc: &str| {
        outcome
            .results
            .iter()
            .find(|r| r.key == GroupKey(vec![Some("A".into()), Some(loc.into())]))
            .map(|r| r.segment)
    };
    assert_eq!(by_location("1710"), Some(Segment::X));
    assert_eq!(by_location("1720"), Some(Segment::Z));
}

#[test]
fn test_insufficient_history_yields_empty_outcome() {
    let rows = series("A", "1720", &[1.0, 2.0, 3.0]);
    let outcome = analyze(&rows, &config(&["PRDID"])).unwrap();
    assert!(outcome.is_empty());
    assert_eq!(outcome.quality.records_excluded, 1);
    assert_eq!(outcome.quality.total_records_analyzed, 3);
}

#[test]
fn test_missing_dimension_is_reported() {
    let err = analyze(&demand_history(), &config(&["PRDID", "CUSTID"])).unwrap_err();
    match err {
        SegmentationError::DataValidation { missing, .. } => assert_eq!(missing, vec!["CUSTID"]),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_outlier_removal_changes_classification() {
    let mut values = vec![100.0; 11];
    values.extend([101.0, 99.0, 100.0, 100.0, 100.0, 1000.0]);
    let rows = series("S", "1720", &values);

    let plain = analyze(&rows, &config(&["PRDID"])).unwrap();
    assert_ne!(plain.results[0].segment, Segment::X);

    let cleaned = analyze(&rows, &config(&["PRDID"]).with_outlier_removal(3.0)).unwrap();
    assert_eq!(cleaned.quality.outliers_removed, 1);
    assert_eq!(cleaned.results[0].segment, Segment::X);
    assert_eq!(cleaned.results[0].stats.count, 16);
}

#[test]
fn test_analysis_is_idempotent() {
    let rows = demand_history();
    let first = analyze(&rows, &config(&["PRDID", "LOCID"])).unwrap();
    let second = analyze(&rows, &config(&["PRDID", "LOCID"])).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_preview_warns_without_classifying() {
    let report = preview(&demand_history(), &config(&["PRDID"]));
    assert_eq!(report.estimated_segments, 4);
    assert_eq!(report.groups_below_min_periods, 1);
    assert!(report.error.is_none());
    assert_eq!(report.warnings.len(), 1);
    let coverage = report.data_coverage.unwrap();
    assert_eq!(coverage.segments_with_sufficient_data, 3);
    assert_eq!(coverage.max_periods_per_segment, 6);
}

#[test]
fn test_preview_reports_missing_attribute_as_error() {
    let report = preview(&demand_history(), &config(&["PRDID", "REGIONID"]));
    assert!(report.error.unwrap().contains("REGIONID"));
    assert_eq!(report.estimated_segments, 0);
}

#[test]
fn test_single_observation_group_is_stable() {
    let rows = vec![RawObservation::new(42.0).with_dimension("PRDID", "ONE")];
    let outcome = analyze(&rows, &config(&["PRDID"]).with_min_periods(3)).unwrap();
    assert!(outcome.is_empty());

    let classifier = SegmentClassifier::default();
    let stats = ibp_xyz::algorithms::group_statistics(rows.iter(), &["PRDID".to_string()]);
    let (cv, segment) = classifier.evaluate(stats.values().next().unwrap());
    assert_eq!(cv, 0.0);
    assert_eq!(segment, Segment::X);
}

proptest! {
    #[test]
    fn prop_every_analyzed_group_is_classified(values in prop::collection::vec(0.0f64..1000.0, 6..40)) {
        let rows = series("P", "L", &values);
        let outcome = analyze(&rows, &config(&["PRDID"])).unwrap();
        prop_assert_eq!(outcome.results.len(), 1);
        prop_assert!(Segment::CLASSIFIED.contains(&outcome.results[0].segment));
    }
}
