//! Migration application
//!
//! Hygiene is checked before anything else, in dry runs too. A real apply is
//! one schema transaction followed by one version record.

use super::channel::{SchemaChannel, VersionRecord};
use super::ledger::{MigrationLedger, MigrationRecord};
use crate::error::{GovResult, GovernanceError};
use crate::schema::lexer::{first_token, Keyword, TokenKind};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

const HYGIENE_PREVIEW: usize = 20;

/// A migration that ran to completion
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedMigration {
    pub id: Uuid,
    pub ordinal: u32,
    pub filename: String,
    pub sha256_prefix: String,
    pub git_commit: String,
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// Dry run: validated and hashed, nothing sent
    Planned {
        ordinal: u32,
        filename: String,
        sha256_prefix: String,
    },
    Applied(AppliedMigration),
}

/// First 12 hex chars of the SHA-256 of the trimmed body
pub fn body_fingerprint(body: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(body.trim().as_bytes()));
    digest[..12].to_string()
}

/// First significant token must be `define`, `undefine` or `redefine`
pub fn check_hygiene(record: &MigrationRecord) -> GovResult<()> {
    let violation = || {
        let trimmed = record.body.trim();
        let preview: String = trimmed.chars().take(HYGIENE_PREVIEW).collect();
        GovernanceError::Hygiene {
            filename: record.filename.clone(),
            found: format!("{}...", preview),
        }
    };

    let Some(Ok(token)) = first_token(&record.body) else {
        return Err(violation());
    };

    let allowed = match &token.kind {
        TokenKind::Keyword(Keyword::Define | Keyword::Undefine | Keyword::Redefine) => true,
        TokenKind::Ident(word) => {
            let lower = word.to_ascii_lowercase();
            lower == "define" || lower == "undefine" || lower == "redefine"
        }
        _ => false,
    };

    if allowed {
        Ok(())
    } else {
        Err(violation())
    }
}

/// Apply a single migration as ordinal `ordinal` against `db`
pub async fn apply_migration<C: SchemaChannel>(
    channel: &C,
    db: &str,
    record: &MigrationRecord,
    ordinal: u32,
    dry_run: bool,
    git_commit: &str,
) -> GovResult<ApplyOutcome> {
    check_hygiene(record)?;

    let sha256_prefix = body_fingerprint(&record.body);
    info!("Applying {} (sha256: {})", record.filename, sha256_prefix);

    if dry_run {
        return Ok(ApplyOutcome::Planned {
            ordinal,
            filename: record.filename.clone(),
            sha256_prefix,
        });
    }

    channel
        .execute_schema(db, record.body.trim())
        .await
        .map_err(|e| match e {
            err @ GovernanceError::Connectivity(_) => err,
            other => GovernanceError::SchemaTransaction {
                filename: record.filename.clone(),
                ordinal,
                message: other.to_string(),
            },
        })?;

    let applied_at = Utc::now();
    channel
        .record_version(
            db,
            VersionRecord {
                ordinal,
                git_commit: git_commit.to_string(),
                applied_at,
            },
        )
        .await?;

    Ok(ApplyOutcome::Applied(AppliedMigration {
        id: Uuid::new_v4(),
        ordinal,
        filename: record.filename.clone(),
        sha256_prefix,
        git_commit: git_commit.to_string(),
        applied_at,
    }))
}

/// Pending migrations for one database
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationPlan {
    pub current_ordinal: u32,
    pub target: Option<u32>,
    pub pending: Vec<MigrationRecord>,
}

impl MigrationPlan {
    pub fn build(ledger: &MigrationLedger, current_ordinal: u32, target: Option<u32>) -> Self {
        Self {
            current_ordinal,
            target,
            pending: ledger
                .pending(current_ordinal, target)
                .into_iter()
                .cloned()
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Apply every pending record in order, stopping at the first failure.
    ///
    /// Migrations are serialized; each one is its own atomic transaction.
    pub async fn execute<C: SchemaChannel>(
        &self,
        channel: &C,
        db: &str,
        dry_run: bool,
        git_commit: &str,
    ) -> GovResult<Vec<ApplyOutcome>> {
        if self.is_empty() {
            info!("No pending migrations to apply.");
            return Ok(Vec::new());
        }

        info!("Planning to apply {} migrations.", self.pending.len());
        let mut outcomes = Vec::with_capacity(self.pending.len());
        for record in &self.pending {
            match apply_migration(channel, db, record, record.ordinal, dry_run, git_commit).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    warn!("Migration {} failed: {}", record.filename, e);
                    return Err(e);
                }
            }
        }
        info!("Migration completed cleanly.");
        Ok(outcomes)
    }
}
