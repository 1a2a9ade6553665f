//! Template verification routes

use crate::error::GovResult;
use crate::templates::{load_catalog, verify_catalog_parallel, Manifest, VerificationReport};
use crate::state::SharedState;
use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
pub struct VerifyQuery {
    #[serde(default)]
    pub strict: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub success: bool,
    pub manifest_found: bool,
    pub report: VerificationReport,
}

pub async fn verify_templates(
    State(state): State<SharedState>,
    Query(query): Query<VerifyQuery>,
) -> GovResult<Json<VerifyResponse>> {
    let config = &state.settings.templates;
    let manifest = Manifest::load(&config.manifest_path)?;
    let manifest_found = manifest.is_some();
    let registry = load_catalog(&config.catalog_dir)?;

    let report = verify_catalog_parallel(
        Arc::new(manifest.unwrap_or_default()),
        Arc::new(registry),
        Arc::new(config.forbidden_capabilities.clone()),
    )
    .await?;

    Ok(Json(VerifyResponse {
        success: report.success(query.strict),
        manifest_found,
        report,
    }))
}
