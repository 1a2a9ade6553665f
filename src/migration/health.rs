//! Repository vs database ordinal parity

use super::channel::SchemaChannel;
use super::ledger::repo_head_ordinal;
use crate::error::GovResult;
use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaHealth {
    pub repo_ordinal: u32,
    pub db_ordinal: u32,
}

impl SchemaHealth {
    pub fn in_sync(&self) -> bool {
        self.repo_ordinal == self.db_ordinal
    }

    pub fn summary_line(&self) -> String {
        if self.in_sync() {
            "PASS: parity OK".to_string()
        } else {
            format!(
                "FAIL: drift detected repo={} db={}",
                self.repo_ordinal, self.db_ordinal
            )
        }
    }
}

/// Compare the repository head ordinal with the live database ordinal
pub async fn check_health<C: SchemaChannel>(
    dir: &Path,
    channel: &C,
    db: &str,
) -> GovResult<SchemaHealth> {
    let repo_ordinal = repo_head_ordinal(dir)?;
    info!("Repo head ordinal: {}", repo_ordinal);
    let db_ordinal = channel.current_ordinal(db).await?;
    info!("DB current ordinal: {}", db_ordinal);

    let health = SchemaHealth {
        repo_ordinal,
        db_ordinal,
    };
    if !health.in_sync() {
        warn!("{}", health.summary_line());
    }
    Ok(health)
}
