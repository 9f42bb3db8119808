//! Fetch-then-analyze orchestration shared by the HTTP handlers and the
//! write-back service.

use crate::error::{SegmentationError, SegmentationResult};
use crate::models::{RawObservation, SegmentationConfig, SegmentationOutcome};
use crate::sap::DataSource;
use crate::services::segmentation::analyze;

/// Run CPU-bound work off the async executor.
pub async fn blocking<F, T>(work: F) -> SegmentationResult<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| SegmentationError::Internal(format!("Analysis task failed: {}", e)))
}

/// Fetch the observations `config` needs. An empty result is an error.
pub async fn fetch_observations(
    source: &dyn DataSource,
    config: &SegmentationConfig,
) -> SegmentationResult<Vec<RawObservation>> {
    let rows = source
        .fetch(
            &config.primary_key,
            &config.groupby_attributes,
            config.filters.as_deref(),
        )
        .await?;
    if rows.is_empty() {
        return Err(SegmentationError::NoData(
            "No data found with given filters".to_string(),
        ));
    }
    log::info!("Fetched {} observations", rows.len());
    Ok(rows)
}

/// Validate, fetch and classify. The fetched observations are returned
/// alongside the outcome for callers that need the raw periods.
pub async fn run_analysis(
    source: &dyn DataSource,
    config: &SegmentationConfig,
) -> SegmentationResult<(Vec<RawObservation>, SegmentationOutcome)> {
    config.validate()?;
    let rows = fetch_observations(source, config).await?;
    let config = config.clone();
    blocking(move || {
        let outcome = analyze(&rows, &config);
        outcome.map(|o| (rows, o))
    })
    .await?
}
