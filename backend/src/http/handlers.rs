//! HTTP handlers for the REST API.
//!
//! Each handler corresponds to an API endpoint and delegates to the
//! service layer for business logic.

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::Value;

use super::dto::{
    analysis_params, segment_row, AnalyzeRequest, AnalyzeResponse, AttributeSummary,
    AttributesQuery, AttributesResponse, AvailableAttributesResponse, CustomWriteRequest,
    DebugPayload, ExportQuery, HealthResponse, PreviewResponse, SegmentDetailDto,
    SegmentDetailsResponse, TransactionStatus, ValidateConfigResponse, WriteRequest, WriteSummary,
};
use super::error::AppError;
use super::state::AppState;
use crate::error::SegmentationError;
use crate::models::{SegmentationConfig, SegmentationOutcome, TransactionId};
use crate::services::{
    blocking, check_catalog, check_required, discover_attributes, fetch_observations, preview,
    run_analysis, segment_details,
};

/// Result type for handlers.
pub type HandlerResult<T> = Result<Json<T>, AppError>;

fn now() -> String {
    Utc::now().to_rfc3339()
}

/// Build and check a dynamic-segmentation config before anything is fetched.
fn request_config(state: &AppState, request: AnalyzeRequest) -> Result<SegmentationConfig, AppError> {
    let config = request.into_config(&state.config.analysis);
    config.validate()?;
    check_required(&config, &state.catalog)?;
    check_catalog(&config, &state.catalog)?;
    Ok(config)
}

async fn analyze_request(
    state: &AppState,
    request: AnalyzeRequest,
) -> Result<(SegmentationConfig, SegmentationOutcome), AppError> {
    let config = request_config(state, request)?;
    let (_, outcome) = run_analysis(state.source.as_ref(), &config).await?;
    if outcome.is_empty() {
        return Err(SegmentationError::InsufficientData(
            "No segments produced. Try reducing min_periods or adjusting filters.".to_string(),
        )
        .into());
    }
    Ok((config, outcome))
}

// =============================================================================
// Health Check
// =============================================================================

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> HandlerResult<HealthResponse> {
    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        backend: state.config.sap.backend.clone(),
        timestamp: now(),
    }))
}

// =============================================================================
// Dynamic Segmentation
// =============================================================================

/// GET /v1/dynamic-segmentation/available-attributes
///
/// Lists the attribute catalog. No data is fetched.
pub async fn available_attributes(State(state): State<AppState>) -> HandlerResult<AvailableAttributesResponse> {
    let catalog = &state.catalog;
    Ok(Json(AvailableAttributesResponse {
        available_attributes: catalog.fields().into_iter().map(str::to_string).collect(),
        detailed_info: catalog
            .attributes
            .iter()
            .map(|a| AttributeSummary {
                attribute: a.field.clone(),
                description: format!("{} - {}", a.name, a.description),
            })
            .collect(),
        usage_example: catalog
            .recommendations
            .iter()
            .map(|r| (r.level.clone(), r.attributes.clone()))
            .collect(),
        required: catalog.required().into_iter().map(str::to_string).collect(),
        primary_keys: catalog.primary_keys().into_iter().map(str::to_string).collect(),
        timestamp: now(),
    }))
}

/// GET /v1/dynamic-segmentation/attributes?attributes=PRDID,LOCID&filters=...
///
/// Fetch data with the requested attributes and report what it carries.
pub async fn get_attributes(
    State(state): State<AppState>,
    Query(query): Query<AttributesQuery>,
) -> HandlerResult<AttributesResponse> {
    let attributes = query.attribute_list(&state.catalog.required());
    let Some(primary_key) = attributes.first().cloned() else {
        return Err(AppError::BadRequest("No attributes requested".to_string()));
    };
    log::info!("Fetching data with attributes: {:?}", attributes);

    let observations = state
        .source
        .fetch(&primary_key, &attributes, query.filters.as_deref())
        .await?;
    if observations.is_empty() {
        return Err(AppError::NotFound("No data found".to_string()));
    }

    let catalog = state.catalog.clone();
    let discovery = blocking(move || discover_attributes(&observations, &catalog)).await?;
    log::info!(
        "Found {} attributes in data",
        discovery.available_attributes.len()
    );

    Ok(Json(AttributesResponse {
        discovery,
        timestamp: now(),
    }))
}

/// POST /v1/dynamic-segmentation/preview
pub async fn preview_segmentation(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> HandlerResult<PreviewResponse> {
    let config = request_config(&state, request)?;
    let observations = fetch_observations(state.source.as_ref(), &config).await?;

    let preview_config = config.clone();
    let report = blocking(move || preview(&observations, &preview_config)).await?;
    if let Some(error) = report.error {
        return Err(AppError::BadRequest(error));
    }
    log::info!("Preview complete: {} estimated segments", report.estimated_segments);

    Ok(Json(PreviewResponse {
        config,
        estimated_segments: report.estimated_segments,
        groups_below_min_periods: report.groups_below_min_periods,
        data_coverage: report.data_coverage,
        warnings: report.warnings,
        timestamp: now(),
    }))
}

/// POST /v1/dynamic-segmentation/analyze
pub async fn analyze_segmentation(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> HandlerResult<AnalyzeResponse> {
    let (config, outcome) = analyze_request(&state, request).await?;
    let attributes = &config.groupby_attributes;

    Ok(Json(AnalyzeResponse {
        total_records: outcome.quality.total_records_analyzed,
        unique_segments: outcome.quality.unique_segments,
        segmentation_level: attributes.clone(),
        segment_distribution: outcome.segment_distribution(),
        analysis_params: analysis_params(&config),
        data: outcome
            .results
            .iter()
            .map(|r| segment_row(r, attributes))
            .collect(),
        data_quality: outcome.quality,
        timestamp: now(),
    }))
}

/// POST /v1/dynamic-segmentation/analyze/export?format=json
///
/// Same analysis as `/analyze`, returned as a JSON file attachment.
pub async fn export_analysis(
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Response, AppError> {
    let format = query.format.as_deref().unwrap_or("json");
    if format != "json" {
        return Err(AppError::BadRequest(format!(
            "Unsupported export format: {}. Supported formats: json",
            format
        )));
    }

    let (config, outcome) = analyze_request(&state, request).await?;
    let level = config.groupby_attributes.join("_");
    let analysis_date = now();
    let rows: Vec<Value> = outcome
        .results
        .iter()
        .map(|r| {
            let mut row = segment_row(r, &config.groupby_attributes);
            row.insert("segmentation_level".into(), Value::String(level.clone()));
            row.insert("analysis_date".into(), Value::String(analysis_date.clone()));
            Value::Object(row)
        })
        .collect();
    let body = serde_json::to_string_pretty(&rows)
        .map_err(|e| AppError::Internal(format!("Failed to serialize export: {}", e)))?;

    let filename = format!(
        "xyz_analysis_{}_{}.json",
        level.to_lowercase(),
        Utc::now().format("%Y%m%d_%H%M%S")
    );
    log::info!("Exporting {} rows as {}", rows.len(), filename);

    Ok((
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={}", filename),
            ),
        ],
        body,
    )
        .into_response())
}

/// POST /v1/dynamic-segmentation/segment-details
pub async fn get_segment_details(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> HandlerResult<SegmentDetailsResponse> {
    let (config, outcome) = analyze_request(&state, request).await?;
    let details = segment_details(&outcome.results)
        .into_iter()
        .map(|(segment, detail)| {
            (
                segment,
                SegmentDetailDto::from_detail(detail, &config.groupby_attributes),
            )
        })
        .collect();

    Ok(Json(SegmentDetailsResponse {
        segment_details: details,
        total_segments: outcome.results.len(),
        timestamp: now(),
    }))
}

// =============================================================================
// XYZ Write-Back
// =============================================================================

/// POST /v1/xyz-write/write-segments
pub async fn write_segments(
    State(state): State<AppState>,
    Json(request): Json<WriteRequest>,
) -> HandlerResult<WriteSummary> {
    let summary = state.writeback.write_segments(&request).await?;
    Ok(Json(summary))
}

/// POST /v1/xyz-write/write-custom
pub async fn write_custom(
    State(state): State<AppState>,
    Json(request): Json<CustomWriteRequest>,
) -> HandlerResult<WriteSummary> {
    let summary = state.writeback.write_custom(&request).await?;
    Ok(Json(summary))
}

/// GET /v1/xyz-write/status/{transaction_id}
pub async fn transaction_status(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
) -> HandlerResult<TransactionStatus> {
    let transaction_id = transaction_id.trim();
    if transaction_id.is_empty() {
        return Err(AppError::BadRequest("transaction_id must not be empty".to_string()));
    }
    let status = state
        .writeback
        .transaction_status(&TransactionId::from_sink(transaction_id))
        .await?;
    Ok(Json(status))
}

/// GET /v1/xyz-write/validate-config
pub async fn validate_config(State(state): State<AppState>) -> HandlerResult<ValidateConfigResponse> {
    Ok(Json(ValidateConfigResponse {
        validation: state.config.validate_write_settings(),
        timestamp: now(),
    }))
}

/// POST /v1/xyz-write/debug-payload
///
/// The payload a write would send. Nothing is sent.
pub async fn debug_payload(
    State(state): State<AppState>,
    Json(request): Json<WriteRequest>,
) -> HandlerResult<DebugPayload> {
    let payload = state.writeback.debug_payload(&request).await?;
    Ok(Json(payload))
}
