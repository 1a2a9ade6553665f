//! Schema lint routes

use crate::error::{validation_error, GovResult};
use crate::schema::{AdditiveLinter, CapabilitySnapshot, LintReport, RedeclarationPlan};
use crate::state::SharedState;
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LintRequest {
    /// Baseline schema text; empty means no baseline
    #[serde(default)]
    #[validate(length(max = 4194304, message = "Baseline schema is too large"))]
    pub old_schema: String,
    #[validate(length(min = 1, max = 4194304, message = "New schema is required"))]
    pub new_schema: String,
    #[serde(default)]
    pub plan_redeclarations: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LintResponse {
    pub success: bool,
    pub report: LintReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redeclarations: Option<RedeclarationPlan>,
}

/// Lint a proposed schema against a baseline
pub async fn lint_schema(
    State(state): State<SharedState>,
    Json(payload): Json<LintRequest>,
) -> GovResult<Json<LintResponse>> {
    payload.validate().map_err(|e| validation_error(e.to_string()))?;

    let overrides = &state.settings.overrides;
    if overrides.requested() && !overrides.allowed() {
        warn!("ALLOW_DESTRUCTIVE_SCHEMA ignored outside the dev environment");
    }

    let report = AdditiveLinter::lint_texts(&payload.old_schema, &payload.new_schema, overrides.allowed())?;
    info!(
        violations = report.violations.len(),
        bypassed = report.bypassed,
        "Schema lint finished"
    );

    // only a parseable new schema has a checksum or a plan
    let snapshot = CapabilitySnapshot::extract(&payload.new_schema).ok();
    let redeclarations = snapshot
        .as_ref()
        .filter(|_| payload.plan_redeclarations)
        .map(RedeclarationPlan::build);

    Ok(Json(LintResponse {
        success: !report.has_errors,
        checksum: snapshot.map(|s| s.checksum()),
        redeclarations,
        report,
    }))
}
