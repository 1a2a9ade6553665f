//! Application state management
//!
//! Catalogs, ledgers and bundles are re-read from disk on every request so
//! the API always reports the working tree as it is.

use crate::config::Settings;
use crate::error::GovResult;
use crate::migration::{ensure_database, MemoryChannel};
use std::sync::Arc;

/// Application state shared across all handlers
pub struct AppState {
    pub settings: Settings,

    /// Schema channel used to report the database ordinal
    pub channel: MemoryChannel,
}

impl AppState {
    pub async fn new(settings: Settings) -> GovResult<Self> {
        let channel = MemoryChannel::new();
        ensure_database(&channel, &settings.migrations.database).await?;
        Ok(Self { settings, channel })
    }
}

/// Type alias for shared state
pub type SharedState = Arc<AppState>;
