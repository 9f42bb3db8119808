//! The segmentation engine: outlier removal, grouping, statistics,
//! classification and the data-quality report.

use std::collections::BTreeMap;

use crate::algorithms::{group_statistics, remove_outliers, SegmentClassifier};
use crate::error::{SegmentationError, SegmentationResult};
use crate::models::{
    AttributeCatalog, DataQualityReport, RawObservation, Segment, SegmentDetail, SegmentResult,
    SegmentationConfig, SegmentationOutcome,
};

/// Number of group keys listed per segment in [`segment_details`].
pub const SAMPLE_RECORDS: usize = 5;

/// Grouping attributes that no observation carries.
pub fn missing_attributes(observations: &[RawObservation], attributes: &[String]) -> Vec<String> {
    attributes
        .iter()
        .filter(|attr| !observations.iter().any(|obs| obs.has_dimension(attr)))
        .cloned()
        .collect()
}

/// Reject attributes outside the catalog and ineligible primary keys.
pub fn check_catalog(config: &SegmentationConfig, catalog: &AttributeCatalog) -> SegmentationResult<()> {
    if !catalog.is_primary_key_eligible(&config.primary_key) {
        return Err(SegmentationError::configuration(format!(
            "Invalid primary_key: {}. Must be one of: {:?}",
            config.primary_key,
            catalog.primary_keys()
        )));
    }
    let unknown: Vec<&str> = config
        .groupby_attributes
        .iter()
        .map(String::as_str)
        .filter(|attr| !catalog.contains(attr))
        .collect();
    if !unknown.is_empty() {
        return Err(SegmentationError::configuration(format!(
            "Unknown attributes: {:?}. Available: {:?}",
            unknown,
            catalog.fields()
        )));
    }
    Ok(())
}

/// Reject groupings that leave out an attribute the catalog marks required.
pub fn check_required(config: &SegmentationConfig, catalog: &AttributeCatalog) -> SegmentationResult<()> {
    match catalog
        .required()
        .into_iter()
        .find(|attr| !config.groupby_attributes.iter().any(|a| a == attr))
    {
        Some(attr) => Err(SegmentationError::configuration(format!(
            "{} must be included in groupby_attributes",
            attr
        ))),
        None => Ok(()),
    }
}

/// Classify every group of `observations` under `config`.
///
/// Empty input yields an empty outcome with a zeroed report. Groups with
/// fewer than `min_periods` observations are excluded and counted; when all
/// groups are excluded the outcome is empty but still carries the report.
pub fn analyze(
    observations: &[RawObservation],
    config: &SegmentationConfig,
) -> SegmentationResult<SegmentationOutcome> {
    config.validate()?;
    log::info!(
        "Starting XYZ analysis by {:?} (X <= {}, Y <= {})",
        config.groupby_attributes,
        config.x_threshold,
        config.y_threshold
    );

    if observations.is_empty() {
        log::warn!("No observations provided for analysis");
        return Ok(SegmentationOutcome::default());
    }

    let missing = missing_attributes(observations, &config.groupby_attributes);
    if !missing.is_empty() {
        return Err(SegmentationError::missing_attributes(missing));
    }

    let (retained, outliers_removed) = if config.remove_outliers {
        let removal = remove_outliers(observations, &config.groupby_attributes, config.outlier_threshold);
        (removal.retained, removal.removed)
    } else {
        (observations.iter().collect(), 0)
    };

    let stats = group_statistics(retained.iter().copied(), &config.groupby_attributes);
    let groups = stats.len();

    let classifier = SegmentClassifier::from_config(config);
    let results: Vec<SegmentResult> = stats
        .into_iter()
        .filter(|(_, s)| s.count >= config.min_periods)
        .map(|(key, stats)| {
            let (cv, segment) = classifier.evaluate(&stats);
            SegmentResult {
                key,
                stats,
                cv,
                segment,
            }
        })
        .collect();

    let excluded = groups - results.len();
    if excluded > 0 {
        log::warn!(
            "Excluded {} groups with fewer than {} periods",
            excluded,
            config.min_periods
        );
    }

    let quality = quality_report(&results, observations.len(), outliers_removed, excluded);
    log::info!(
        "Segmentation complete: {:?} ({} analyzed, {} excluded)",
        quality.segment_distribution,
        results.len(),
        excluded
    );

    Ok(SegmentationOutcome { results, quality })
}

fn quality_report(
    results: &[SegmentResult],
    total_records: usize,
    outliers_removed: usize,
    excluded: usize,
) -> DataQualityReport {
    let mut distribution: BTreeMap<Segment, usize> = BTreeMap::new();
    let mut cv_sums: BTreeMap<Segment, f64> = BTreeMap::new();
    for result in results {
        *distribution.entry(result.segment).or_insert(0) += 1;
        *cv_sums.entry(result.segment).or_insert(0.0) += result.cv;
    }
    let avg_cv_by_segment = cv_sums
        .into_iter()
        .filter(|(segment, _)| Segment::CLASSIFIED.contains(segment))
        .map(|(segment, sum)| (segment, sum / distribution[&segment] as f64))
        .collect();

    let counts: Vec<usize> = results.iter().map(|r| r.stats.count).collect();
    let avg_periods = if counts.is_empty() {
        0.0
    } else {
        counts.iter().sum::<usize>() as f64 / counts.len() as f64
    };

    DataQualityReport {
        total_records_analyzed: total_records,
        outliers_removed,
        unique_segments: results.len(),
        records_with_sufficient_history: results.len(),
        records_excluded: excluded,
        avg_periods_per_segment: avg_periods,
        min_periods_per_segment: counts.iter().copied().min().unwrap_or(0),
        max_periods_per_segment: counts.iter().copied().max().unwrap_or(0),
        segment_distribution: distribution,
        avg_cv_by_segment,
    }
}

/// Per-segment breakdown of classified results. Segments without results
/// are omitted.
pub fn segment_details(results: &[SegmentResult]) -> BTreeMap<Segment, SegmentDetail> {
    let mut details = BTreeMap::new();

    for segment in Segment::CLASSIFIED {
        let members: Vec<&SegmentResult> = results.iter().filter(|r| r.segment == segment).collect();
        if members.is_empty() {
            continue;
        }

        let n = members.len() as f64;
        let cvs: Vec<f64> = members.iter().map(|r| r.cv).collect();
        let stds: Vec<f64> = members.iter().filter_map(|r| r.stats.std).collect();

        details.insert(
            segment,
            SegmentDetail {
                count: members.len(),
                avg_cv: cvs.iter().sum::<f64>() / n,
                avg_mean_demand: members.iter().map(|r| r.stats.mean).sum::<f64>() / n,
                avg_std_demand: if stds.is_empty() {
                    0.0
                } else {
                    stds.iter().sum::<f64>() / stds.len() as f64
                },
                min_cv: cvs.iter().copied().fold(f64::INFINITY, f64::min),
                max_cv: cvs.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                sample_records: members
                    .iter()
                    .take(SAMPLE_RECORDS)
                    .map(|r| r.key.clone())
                    .collect(),
            },
        );
    }

    details
}
