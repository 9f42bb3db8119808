//! Dry-run estimate of a segmentation configuration.

use crate::algorithms::statistics::partition;
use crate::models::{DataCoverage, GroupSize, PreviewReport, RawObservation, SegmentationConfig};
use crate::services::segmentation::missing_attributes;

/// Group count above which the preview warns about cardinality.
pub const HIGH_CARDINALITY_THRESHOLD: usize = 10_000;

/// Estimate group count and data sufficiency without classifying anything.
///
/// Missing attributes are reported in [`PreviewReport::error`] rather than
/// raised, so callers can show them next to the other warnings.
pub fn preview(observations: &[RawObservation], config: &SegmentationConfig) -> PreviewReport {
    log::info!("Previewing segmentation for {:?}", config.groupby_attributes);
    let mut report = PreviewReport::default();

    let missing = missing_attributes(observations, &config.groupby_attributes);
    if !missing.is_empty() {
        report
            .warnings
            .push(format!("Attributes not found in data: {:?}", missing));
        report.error = Some(format!("Missing attributes: {:?}", missing));
        return report;
    }

    let groups = partition(observations, &config.groupby_attributes);
    let sizes: Vec<usize> = groups.values().map(Vec::len).collect();
    let estimated = groups.len();
    let below = sizes.iter().filter(|n| **n < config.min_periods).count();

    if below > 0 {
        report.warnings.push(format!(
            "{}/{} segment groups have fewer than {} periods of data",
            below, estimated, config.min_periods
        ));
    }
    if estimated > HIGH_CARDINALITY_THRESHOLD {
        report.warnings.push(format!(
            "High number of segments ({}). Consider using fewer attributes or adding filters to reduce cardinality.",
            estimated
        ));
    }

    report.estimated_segments = estimated;
    report.groups_below_min_periods = below;
    report.data_coverage = Some(DataCoverage {
        total_records: observations.len(),
        unique_segments: estimated,
        avg_periods_per_segment: if sizes.is_empty() {
            0.0
        } else {
            sizes.iter().sum::<usize>() as f64 / sizes.len() as f64
        },
        min_periods_per_segment: sizes.iter().copied().min().unwrap_or(0),
        max_periods_per_segment: sizes.iter().copied().max().unwrap_or(0),
        segments_with_sufficient_data: estimated - below,
    });
    report.group_sizes = groups
        .into_iter()
        .map(|(key, values)| GroupSize {
            key,
            rows: values.len(),
        })
        .collect();
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(product: &str, location: &str, n: usize) -> Vec<RawObservation> {
        (0..n)
            .map(|i| {
                RawObservation::new(i as f64 + 1.0)
                    .with_dimension("PRDID", product)
                    .with_dimension("LOCID", location)
            })
            .collect()
    }

    fn config(attrs: &[&str]) -> SegmentationConfig {
        SegmentationConfig::new(attrs.iter().map(|a| a.to_string()).collect())
    }

    #[test]
    fn test_preview_counts_groups_and_coverage() {
        let mut data = rows("A", "L1", 8);
        data.extend(rows("A", "L2", 2));
        data.extend(rows("B", "L1", 6));

        let report = preview(&data, &config(&["PRDID", "LOCID"]));
        assert_eq!(report.estimated_segments, 3);
        assert_eq!(report.groups_below_min_periods, 1);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].starts_with("1/3"));

        let coverage = report.data_coverage.unwrap();
        assert_eq!(coverage.total_records, 16);
        assert_eq!(coverage.min_periods_per_segment, 2);
        assert_eq!(coverage.max_periods_per_segment, 8);
        assert_eq!(coverage.segments_with_sufficient_data, 2);
        assert_eq!(report.group_sizes.len(), 3);
    }

    #[test]
    fn test_preview_reports_missing_attributes() {
        let data = rows("A", "L1", 8);
        let report = preview(&data, &config(&["PRDID", "CUSTID"]));
        assert!(report.error.unwrap().contains("CUSTID"));
        assert_eq!(report.estimated_segments, 0);
        assert!(report.data_coverage.is_none());
    }

    #[test]
    fn test_preview_warns_on_high_cardinality() {
        let data: Vec<RawObservation> = (0..HIGH_CARDINALITY_THRESHOLD + 1)
            .map(|i| RawObservation::new(1.0).with_dimension("PRDID", format!("P{}", i)))
            .collect();
        let report = preview(&data, &config(&["PRDID"]));
        assert!(report.warnings.iter().any(|w| w.starts_with("High number of segments")));
    }

    #[test]
    fn test_preview_does_not_mutate_input() {
        let data = rows("A", "L1", 4);
        let before = data.clone();
        let _ = preview(&data, &config(&["PRDID"]));
        assert_eq!(data, before);
    }
}
