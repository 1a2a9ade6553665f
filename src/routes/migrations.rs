//! Migration ledger routes

use crate::error::GovResult;
use crate::migration::{LedgerOptions, MigrationLedger, MigrationPlan, MigrationRecord, SchemaChannel};
use crate::state::SharedState;
use axum::{extract::State, Json};
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationsResponse {
    pub success: bool,
    pub database: String,
    pub head_ordinal: u32,
    pub current_ordinal: u32,
    pub migrations: Vec<MigrationRecord>,
    pub pending: Vec<MigrationRecord>,
}

/// Validated ledger plus what the database still lacks
pub async fn list_migrations(State(state): State<SharedState>) -> GovResult<Json<MigrationsResponse>> {
    let config = &state.settings.migrations;
    let ledger = MigrationLedger::discover(
        &config.dir,
        LedgerOptions {
            allow_gaps: config.allow_gaps,
        },
    )?;
    let current_ordinal = state.channel.current_ordinal(&config.database).await?;
    let plan = MigrationPlan::build(&ledger, current_ordinal, None);

    Ok(Json(MigrationsResponse {
        success: true,
        database: config.database.clone(),
        head_ordinal: ledger.head_ordinal(),
        current_ordinal,
        migrations: ledger.records,
        pending: plan.pending,
    }))
}
