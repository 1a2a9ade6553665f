//! Ordinal schema migrations
//!
//! Ledger discovery and validation, hygiene-checked application through a
//! [`SchemaChannel`], and repository/database parity checks.

pub mod apply;
pub mod channel;
pub mod health;
pub mod ledger;

pub use apply::{apply_migration, check_hygiene, ApplyOutcome, MigrationPlan};
pub use channel::{ensure_database, recreate_database, MemoryChannel, SchemaChannel};
pub use health::{check_health, SchemaHealth};
pub use ledger::{repo_head_ordinal, LedgerOptions, MigrationLedger, MigrationRecord};
