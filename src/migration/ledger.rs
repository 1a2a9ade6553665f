//! Migration ledger
//!
//! Discovers `<ordinal>_<name>.<ext>` files in a directory and enforces
//! ordinal uniqueness, the bootstrap marker in migration 1, and contiguity.

use crate::error::{GovResult, GovernanceError, OrdinalError};
use crate::schema::lexer::contains_word;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

static MIGRATION_FILENAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d+)_(.+)\.([A-Za-z0-9]+)$").expect("migration filename pattern is valid")
});

/// Tokens migration 1 must mention to bootstrap schema-version bookkeeping
const BOOTSTRAP_MARKERS: [&str; 4] = ["schema_version", "ordinal", "git-commit", "applied-at"];

/// One migration unit on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRecord {
    pub ordinal: u32,
    pub filename: String,
    #[serde(skip)]
    pub path: PathBuf,
    #[serde(skip)]
    pub body: String,
}

/// Ledger discovery options
#[derive(Debug, Clone, Copy, Default)]
pub struct LedgerOptions {
    pub allow_gaps: bool,
}

/// An ordered, validated set of migrations
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationLedger {
    pub records: Vec<MigrationRecord>,
}

/// Parse the leading ordinal out of a migration filename
pub fn parse_ordinal(filename: &str) -> GovResult<u32> {
    let caps = MIGRATION_FILENAME
        .captures(filename)
        .ok_or_else(|| GovernanceError::Format(filename.to_string()))?;
    let ordinal: u32 = caps[1]
        .parse()
        .map_err(|_| GovernanceError::Format(filename.to_string()))?;
    if ordinal == 0 {
        return Err(GovernanceError::Format(filename.to_string()));
    }
    Ok(ordinal)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

impl MigrationLedger {
    /// Scan `dir` and validate the result.
    ///
    /// A missing directory is an empty ledger. Hidden entries and
    /// subdirectories are ignored; any other non-matching file is a
    /// `FormatError`.
    pub fn discover(dir: &Path, options: LedgerOptions) -> GovResult<Self> {
        if !dir.is_dir() {
            warn!("Migrations directory not found: {}", dir.display());
            return Ok(Self::default());
        }

        let mut records = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if is_hidden(&path) || path.is_dir() {
                continue;
            }
            let filename = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| GovernanceError::Format(path.display().to_string()))?
                .to_string();
            let ordinal = parse_ordinal(&filename)?;
            let body = fs::read_to_string(&path)?;
            records.push(MigrationRecord {
                ordinal,
                filename,
                path,
                body,
            });
        }

        let ledger = Self::from_records(records, options)?;
        info!(
            "Found {} migrations in {}",
            ledger.records.len(),
            dir.display()
        );
        Ok(ledger)
    }

    /// Validate an in-memory set of records: duplicates, bootstrap, contiguity
    pub fn from_records(mut records: Vec<MigrationRecord>, options: LedgerOptions) -> GovResult<Self> {
        records.sort_by(|a, b| a.ordinal.cmp(&b.ordinal).then_with(|| a.filename.cmp(&b.filename)));

        let mut seen = BTreeSet::new();
        for record in &records {
            if !seen.insert(record.ordinal) {
                return Err(OrdinalError::Duplicate(record.ordinal).into());
            }
        }

        if let Some(first) = records.iter().find(|r| r.ordinal == 1) {
            let missing: Vec<&str> = BOOTSTRAP_MARKERS
                .iter()
                .copied()
                .filter(|marker| contains_word(&first.body, marker).is_none())
                .collect();
            if !missing.is_empty() {
                debug!(?missing, "Bootstrap markers missing");
                return Err(GovernanceError::Bootstrap(first.filename.clone()));
            }
        }

        if !options.allow_gaps {
            for (expected, record) in (1u32..).zip(&records) {
                if record.ordinal != expected {
                    return Err(OrdinalError::Gap {
                        expected,
                        found: record.ordinal,
                    }
                    .into());
                }
            }
        }

        Ok(Self { records })
    }

    /// Highest ordinal in the ledger, 0 when empty
    pub fn head_ordinal(&self) -> u32 {
        self.records.last().map(|r| r.ordinal).unwrap_or(0)
    }

    /// Records newer than `current`, optionally capped at `target`
    pub fn pending(&self, current: u32, target: Option<u32>) -> Vec<&MigrationRecord> {
        self.records
            .iter()
            .filter(|r| r.ordinal > current)
            .filter(|r| target.map_or(true, |t| r.ordinal <= t))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Max ordinal among matching filenames, without full validation.
///
/// Unlike discovery, a missing directory is an error here.
pub fn repo_head_ordinal(dir: &Path) -> GovResult<u32> {
    if !dir.is_dir() {
        return Err(GovernanceError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("migrations_dir not found: {}", dir.display()),
        )));
    }
    let mut head = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            if let Ok(ordinal) = parse_ordinal(name) {
                head = head.max(ordinal);
            }
        }
    }
    Ok(head)
}
