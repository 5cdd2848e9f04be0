use super::AppState;
use super::error::{ApiError, ApiResult};
use crate::core::price::SourceKind;
use crate::registry::LabelCheck;
use crate::scheduler::{SchedulerInfo, SchedulerStatus};
use crate::validation::{ValidationCacheEntry, ValidationOutcome, ValidationStats};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{error, info};

const ADMIN_ENDPOINTS: [&str; 9] = [
    "GET /api/admin/cron/status",
    "GET /api/admin/cron/next",
    "POST /api/admin/cron/execute",
    "GET /api/admin/cron/info",
    "GET /api/admin/sources",
    "GET /api/admin/sources/resolve?label=",
    "GET /api/admin/validation/{categoryId}/{code}",
    "DELETE /api/admin/validation/{categoryId}/{code}",
    "GET /api/admin/validation/stats",
];

pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": state.clock.now(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateRequest {
    pub name: String,
    pub code: String,
    pub category_id: Option<String>,
    pub group_id: Option<String>,
    pub group_name: Option<String>,
    pub quantity: Option<f64>,
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Checks a prospective holding. A group id takes precedence over a category id.
pub async fn validate_holding(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ValidateRequest>,
) -> ApiResult<Json<ValidationOutcome>> {
    let (name, code) = (request.name.trim(), request.code.trim());
    if name.is_empty() || code.is_empty() {
        return Err(ApiError::BadRequest("name and code are required".to_string()));
    }

    let outcome = if let Some(group_id) = non_blank(request.group_id.as_deref()) {
        state
            .validation
            .validate_in_group(group_id, name, code, request.quantity)
            .await?
    } else if let Some(category_id) = non_blank(request.category_id.as_deref()) {
        state
            .validation
            .validate_with_category_id(
                category_id,
                non_blank(request.group_name.as_deref()),
                name,
                code,
                request.quantity,
            )
            .await?
    } else {
        return Err(ApiError::BadRequest(
            "groupId or categoryId is required".to_string(),
        ));
    };
    Ok(Json(outcome))
}

pub async fn cron_status(State(state): State<Arc<AppState>>) -> Json<SchedulerStatus> {
    Json(state.scheduler.status())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NextRunResponse {
    pub next_run_time: Option<DateTime<Utc>>,
    pub next_run_local: Option<DateTime<FixedOffset>>,
    pub running: bool,
}

pub async fn cron_next(State(state): State<Arc<AppState>>) -> Json<NextRunResponse> {
    let status = state.scheduler.status();
    Json(NextRunResponse {
        next_run_time: status.next_run_time,
        next_run_local: status.next_run_local,
        running: status.running,
    })
}

/// Starts a cycle in the background and answers before it completes.
pub async fn cron_execute(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    let started_at = state.clock.now();
    let handle = state.scheduler.trigger_now();
    tokio::spawn(async move {
        match handle.await {
            Ok(Ok(report)) => info!(
                succeeded = report.succeeded,
                failed = report.failed,
                "Manual valuation cycle finished"
            ),
            Ok(Err(e)) => error!(error = %e, "Manual valuation cycle failed"),
            Err(e) => error!(error = %e, "Manual valuation cycle panicked"),
        }
    });
    (
        StatusCode::ACCEPTED,
        Json(json!({
            "message": "Valuation cycle started",
            "startedAt": started_at,
        })),
    )
}

#[derive(Debug, Serialize)]
pub struct InfoResponse {
    #[serde(flatten)]
    pub scheduler: SchedulerInfo,
    pub endpoints: Vec<&'static str>,
}

pub async fn cron_info(State(state): State<Arc<AppState>>) -> Json<InfoResponse> {
    Json(InfoResponse {
        scheduler: state.scheduler.info(),
        endpoints: ADMIN_ENDPOINTS.to_vec(),
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSummary {
    pub id: &'static str,
    pub display_name: &'static str,
}

pub async fn list_sources(State(state): State<Arc<AppState>>) -> Json<Value> {
    let sources: Vec<SourceSummary> = state
        .registry
        .list_available()
        .into_iter()
        .filter_map(|id| id.parse::<SourceKind>().ok())
        .map(|kind| SourceSummary {
            id: kind.id(),
            display_name: kind.display_name(),
        })
        .collect();
    Json(json!({ "available": sources }))
}

#[derive(Debug, Deserialize)]
pub struct ResolveQuery {
    pub label: String,
}

pub async fn resolve_source(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ResolveQuery>,
) -> Json<LabelCheck> {
    Json(state.registry.validate(&query.label))
}

pub async fn get_validation(
    State(state): State<Arc<AppState>>,
    Path((category_id, code)): Path<(String, String)>,
) -> ApiResult<Json<ValidationCacheEntry>> {
    state
        .validation
        .get(&category_id, &code)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Validation entry {category_id}:{code}")))
}

pub async fn clear_validation(
    State(state): State<Arc<AppState>>,
    Path((category_id, code)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    state.validation.clear(&category_id, &code).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn validation_stats(State(state): State<Arc<AppState>>) -> Json<ValidationStats> {
    Json(state.validation.stats())
}
