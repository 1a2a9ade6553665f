//! Schema-transaction channel
//!
//! The boundary to the database that actually runs schema transactions. The
//! live network driver lives outside this crate; [`MemoryChannel`] backs dry
//! runs, the HTTP surface and tests.

use crate::error::{GovResult, GovernanceError};
use crate::schema::CapabilitySnapshot;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Bookkeeping row written after each applied migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionRecord {
    pub ordinal: u32,
    pub git_commit: String,
    pub applied_at: DateTime<Utc>,
}

/// Operations the migration engine needs from a database.
///
/// `execute_schema` must be all-or-nothing: on error no part of the body may
/// be visible afterwards.
pub trait SchemaChannel: Send + Sync {
    fn database_exists(&self, db: &str) -> impl Future<Output = GovResult<bool>> + Send;

    fn create_database(&self, db: &str) -> impl Future<Output = GovResult<()>> + Send;

    fn delete_database(&self, db: &str) -> impl Future<Output = GovResult<()>> + Send;

    /// Highest recorded schema-version ordinal, 0 when none
    fn current_ordinal(&self, db: &str) -> impl Future<Output = GovResult<u32>> + Send;

    fn execute_schema(&self, db: &str, body: &str) -> impl Future<Output = GovResult<()>> + Send;

    fn record_version(
        &self,
        db: &str,
        record: VersionRecord,
    ) -> impl Future<Output = GovResult<()>> + Send;
}

/// Create `db` if absent. Safe to call again after a retry.
///
/// Returns `true` when the database was created by this call.
pub async fn ensure_database<C: SchemaChannel>(channel: &C, db: &str) -> GovResult<bool> {
    if channel.database_exists(db).await? {
        info!("Database exists: {}", db);
        return Ok(false);
    }
    channel.create_database(db).await?;
    info!("Created database: {}", db);
    Ok(true)
}

/// Delete `db` if present, then ensure it exists again
pub async fn recreate_database<C: SchemaChannel>(channel: &C, db: &str) -> GovResult<()> {
    if channel.database_exists(db).await? {
        channel.delete_database(db).await?;
        info!("Database deleted: {}", db);
    }
    ensure_database(channel, db).await?;
    Ok(())
}

#[derive(Debug, Default, Clone)]
struct MemoryDatabase {
    schema: String,
    snapshot: CapabilitySnapshot,
    versions: Vec<VersionRecord>,
}

/// In-process channel that tracks the accumulated schema per database
#[derive(Debug, Default)]
pub struct MemoryChannel {
    databases: Mutex<HashMap<String, MemoryDatabase>>,
    offline: bool,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// A channel whose every call fails with a connectivity error
    #[cfg(test)]
    pub fn offline() -> Self {
        Self {
            databases: Mutex::new(HashMap::new()),
            offline: true,
        }
    }

    /// Pre-populate a database at a given ordinal
    pub async fn seed(&self, db: &str, ordinal: u32) {
        let mut databases = self.databases.lock().await;
        let entry = databases.entry(db.to_string()).or_default();
        if ordinal > 0 {
            entry.versions.push(VersionRecord {
                ordinal,
                git_commit: "seed".to_string(),
                applied_at: Utc::now(),
            });
        }
    }

    pub async fn snapshot(&self, db: &str) -> Option<CapabilitySnapshot> {
        self.databases.lock().await.get(db).map(|d| d.snapshot.clone())
    }

    pub async fn versions(&self, db: &str) -> Vec<VersionRecord> {
        self.databases
            .lock()
            .await
            .get(db)
            .map(|d| d.versions.clone())
            .unwrap_or_default()
    }

    fn online(&self) -> GovResult<()> {
        if self.offline {
            return Err(GovernanceError::Connectivity(
                "schema channel is offline".to_string(),
            ));
        }
        Ok(())
    }

    fn missing(db: &str) -> GovernanceError {
        GovernanceError::NotFound(format!("database '{}'", db))
    }
}

impl SchemaChannel for MemoryChannel {
    async fn database_exists(&self, db: &str) -> GovResult<bool> {
        self.online()?;
        Ok(self.databases.lock().await.contains_key(db))
    }

    async fn create_database(&self, db: &str) -> GovResult<()> {
        self.online()?;
        self.databases
            .lock()
            .await
            .entry(db.to_string())
            .or_default();
        Ok(())
    }

    async fn delete_database(&self, db: &str) -> GovResult<()> {
        self.online()?;
        self.databases.lock().await.remove(db);
        Ok(())
    }

    async fn current_ordinal(&self, db: &str) -> GovResult<u32> {
        self.online()?;
        let databases = self.databases.lock().await;
        let database = databases.get(db).ok_or_else(|| Self::missing(db))?;
        Ok(database.versions.iter().map(|v| v.ordinal).max().unwrap_or(0))
    }

    async fn execute_schema(&self, db: &str, body: &str) -> GovResult<()> {
        self.online()?;
        let mut databases = self.databases.lock().await;
        let database = databases.get_mut(db).ok_or_else(|| Self::missing(db))?;

        let combined = format!("{}\n{}", database.schema, body);
        // parse before touching state so a failed body leaves nothing behind
        let snapshot = CapabilitySnapshot::extract(&combined)?;
        database.schema = combined;
        database.snapshot = snapshot;
        debug!(db, types = database.snapshot.owns_of.len(), "Schema transaction committed");
        Ok(())
    }

    async fn record_version(&self, db: &str, record: VersionRecord) -> GovResult<()> {
        self.online()?;
        let mut databases = self.databases.lock().await;
        let database = databases.get_mut(db).ok_or_else(|| Self::missing(db))?;
        database.versions.push(record);
        Ok(())
    }
}
