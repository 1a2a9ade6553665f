//! Trust gate routes

use crate::error::{validation_error, GovResult};
use crate::state::SharedState;
use crate::trust::{build_diff, build_step_lines, build_summary, build_summary_lines, RunContext, TrustGateDiff, TrustGateSummary};
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryResponse {
    pub success: bool,
    pub summary: TrustGateSummary,
    pub lines: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffRequest {
    pub base: TrustGateSummary,
    pub head: TrustGateSummary,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffResponse {
    pub success: bool,
    pub diff: TrustGateDiff,
    pub lines: Vec<String>,
}

/// Summary of the configured evidence bundle
pub async fn trust_summary(State(state): State<SharedState>) -> GovResult<Json<SummaryResponse>> {
    let root = state.settings.trust.bundle_dir.clone();
    let summary = tokio::task::spawn_blocking(move || build_summary(&root, RunContext::from_env()))
        .await
        .map_err(|e| validation_error(format!("summary task failed: {}", e)))??;

    Ok(Json(SummaryResponse {
        success: true,
        lines: build_summary_lines(&summary),
        summary,
    }))
}

/// Compare two posted summaries
pub async fn trust_diff(Json(payload): Json<DiffRequest>) -> GovResult<Json<DiffResponse>> {
    let diff = build_diff(&payload.base, &payload.head);

    Ok(Json(DiffResponse {
        success: true,
        lines: build_step_lines(&diff),
        diff,
    }))
}
