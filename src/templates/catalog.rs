//! Template catalog on disk
//!
//! ```text
//! templates/
//!   bootstrap_ci@1.0.0/
//!     spec.json        TemplateSpec
//!     template.py      definition (or `entrypoint` from the spec)
//!     metadata.json    optional governance state (status, freeze, taint)
//! ```
//!
//! Registry hashes are always recomputed. `metadata.json` also keeps the
//! hashes seen when its state was first written, so later edits to a
//! version can be caught before it is frozen.

use super::hashing::{compute_code_hash_strict, short_hash, TemplateDefinition, HASH_PREVIEW};
use super::metadata::{TemplateMetadata, TemplateSpec, TemplateStatus};
use super::registry::TemplateRegistry;
use crate::error::{not_found_error, validation_error, GovResult, GovernanceError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

pub const SPEC_FILE: &str = "spec.json";
pub const METADATA_FILE: &str = "metadata.json";
pub const DEFAULT_ENTRYPOINT: &str = "template.py";

/// Governance state kept next to a catalog entry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceState {
    pub status: TemplateStatus,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub frozen: bool,
    pub frozen_at: Option<DateTime<Utc>>,
    pub first_evidence_id: Option<String>,
    pub freeze_claim_id: Option<String>,
    pub freeze_scope_lock_id: Option<String>,
    pub tainted: bool,
    pub tainted_at: Option<DateTime<Utc>>,
    pub tainted_reason: Option<String>,
    pub superseded_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_hash: Option<String>,
}

impl GovernanceState {
    fn apply(self, metadata: &mut TemplateMetadata) {
        metadata.status = self.status;
        metadata.approved_by = self.approved_by;
        metadata.approved_at = self.approved_at;
        metadata.frozen = self.frozen;
        metadata.frozen_at = self.frozen_at;
        metadata.first_evidence_id = self.first_evidence_id;
        metadata.freeze_claim_id = self.freeze_claim_id;
        metadata.freeze_scope_lock_id = self.freeze_scope_lock_id;
        metadata.tainted = self.tainted;
        metadata.tainted_at = self.tainted_at;
        metadata.tainted_reason = self.tainted_reason;
        metadata.superseded_by = self.superseded_by;
    }
}

impl From<&TemplateMetadata> for GovernanceState {
    fn from(metadata: &TemplateMetadata) -> Self {
        Self {
            status: metadata.status,
            approved_by: metadata.approved_by.clone(),
            approved_at: metadata.approved_at,
            frozen: metadata.frozen,
            frozen_at: metadata.frozen_at,
            first_evidence_id: metadata.first_evidence_id.clone(),
            freeze_claim_id: metadata.freeze_claim_id.clone(),
            freeze_scope_lock_id: metadata.freeze_scope_lock_id.clone(),
            tainted: metadata.tainted,
            tainted_at: metadata.tainted_at,
            tainted_reason: metadata.tainted_reason.clone(),
            superseded_by: metadata.superseded_by.clone(),
            spec_hash: Some(metadata.spec_hash.clone()),
            code_hash: Some(metadata.code_hash.clone()),
        }
    }
}

fn read_state(folder: &Path) -> GovResult<Option<GovernanceState>> {
    let path = folder.join(METADATA_FILE);
    if !path.is_file() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(&fs::read_to_string(&path)?)?))
}

/// Compare a version's current hashes with the pair recorded in its
/// `metadata.json`. Versions with nothing recorded yet pass.
pub fn check_recorded_hashes(registry: &TemplateRegistry, dir: &Path, qid: &str) -> GovResult<()> {
    let current = registry
        .metadata(qid)
        .ok_or_else(|| not_found_error(format!("Template not found: {}", qid)))?;
    let Some(state) = read_state(&dir.join(qid))? else {
        return Ok(());
    };
    let (Some(spec_hash), Some(code_hash)) = (state.spec_hash, state.code_hash) else {
        return Ok(());
    };
    if registry.verify_hashes(qid, &spec_hash, &code_hash)? {
        return Ok(());
    }

    let (label, expected, actual) = if current.code_hash != code_hash {
        ("code_hash", code_hash, &current.code_hash)
    } else {
        ("spec_hash", spec_hash, &current.spec_hash)
    };
    Err(GovernanceError::HashMismatch {
        label,
        subject: qid.to_string(),
        expected: short_hash(&expected, HASH_PREVIEW),
        actual: short_hash(actual, HASH_PREVIEW),
    })
}

/// Persist the governance state of one entry back into its catalog folder
pub fn save_governance_state(dir: &Path, metadata: &TemplateMetadata) -> GovResult<()> {
    let folder = dir.join(metadata.qualified_id());
    if !folder.is_dir() {
        return Err(not_found_error(format!(
            "Catalog folder not found: {}",
            folder.display()
        )));
    }
    // The first recorded hashes stay; later saves never adopt an edit
    let mut state = GovernanceState::from(metadata);
    if let Some(previous) = read_state(&folder)? {
        if previous.spec_hash.is_some() && previous.code_hash.is_some() {
            state.spec_hash = previous.spec_hash;
            state.code_hash = previous.code_hash;
        }
    }
    fs::write(
        folder.join(METADATA_FILE),
        serde_json::to_string_pretty(&state)? + "\n",
    )?;
    info!("Governance state saved for {}", metadata.qualified_id());
    Ok(())
}

/// Build a registry from every `<template_id>@<version>` folder in `dir`
pub fn load_catalog(dir: &Path) -> GovResult<TemplateRegistry> {
    let mut registry = TemplateRegistry::new();
    if !dir.is_dir() {
        warn!("Template catalog not found: {}", dir.display());
        return Ok(registry);
    }

    let mut folders = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(true, |n| n.starts_with('.'));
        if path.is_dir() && !hidden {
            folders.push(path);
        }
    }
    folders.sort();

    for folder in folders {
        let name = folder
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();

        let spec: TemplateSpec = serde_json::from_str(&fs::read_to_string(folder.join(SPEC_FILE))?)?;
        if spec.qualified_id() != name {
            return Err(validation_error(format!(
                "Catalog folder '{}' declares template {}",
                name,
                spec.qualified_id()
            )));
        }

        let entrypoint = spec
            .entrypoint
            .clone()
            .unwrap_or_else(|| DEFAULT_ENTRYPOINT.to_string());
        let definition = TemplateDefinition::File(folder.join(entrypoint));

        let metadata = if let Some(state) = read_state(&folder)? {
            let mut metadata = TemplateMetadata::new(
                &spec,
                spec.spec_hash()?,
                compute_code_hash_strict(&definition)?,
            );
            state.apply(&mut metadata);
            Some(metadata)
        } else {
            None
        };

        registry.register(definition, spec, metadata)?;
    }

    info!("Loaded {} templates from {}", registry.len(), dir.display());
    Ok(registry)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use serde_json::json;

    /// Write one catalog folder; returns the folder path
    pub fn write_template(
        root: &Path,
        spec: &TemplateSpec,
        code: &str,
        frozen: bool,
    ) -> std::path::PathBuf {
        let folder = root.join(spec.qualified_id());
        fs::create_dir_all(&folder).unwrap();
        fs::write(folder.join(SPEC_FILE), serde_json::to_string_pretty(spec).unwrap()).unwrap();
        fs::write(folder.join(DEFAULT_ENTRYPOINT), code).unwrap();

        if frozen {
            let state = json!({ "frozen": true, "first_evidence_id": "ev-001" });
            fs::write(folder.join(METADATA_FILE), state.to_string()).unwrap();
        }
        folder
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::write_template;
    use super::*;
    use crate::templates::metadata::TemplateVersion;
    use tempfile::TempDir;

    #[test]
    fn test_load_catalog() {
        let dir = TempDir::new().unwrap();
        let spec = TemplateSpec::new("bootstrap_ci", TemplateVersion::new(1, 0, 0));
        write_template(dir.path(), &spec, "def run():\n    return 1\n", true);
        let other = TemplateSpec::new("permutation", TemplateVersion::new(0, 3, 1));
        write_template(dir.path(), &other, "def run():\n    return 2\n", false);

        let registry = load_catalog(dir.path()).unwrap();
        assert_eq!(registry.list_all(), vec!["bootstrap_ci@1.0.0", "permutation@0.3.1"]);
        assert!(registry.metadata("bootstrap_ci@1.0.0").unwrap().frozen);
        assert!(!registry.metadata("permutation@0.3.1").unwrap().frozen);
    }

    #[test]
    fn test_folder_must_match_spec() {
        let dir = TempDir::new().unwrap();
        let spec = TemplateSpec::new("bootstrap_ci", TemplateVersion::new(1, 0, 0));
        let folder = write_template(dir.path(), &spec, "def run(): pass\n", false);
        fs::rename(&folder, dir.path().join("bootstrap_ci@9.9.9")).unwrap();

        let err = load_catalog(dir.path()).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_missing_definition_fails_strictly() {
        let dir = TempDir::new().unwrap();
        let spec = TemplateSpec::new("bootstrap_ci", TemplateVersion::new(1, 0, 0));
        let folder = write_template(dir.path(), &spec, "def run(): pass\n", false);
        fs::remove_file(folder.join(DEFAULT_ENTRYPOINT)).unwrap();

        let err = load_catalog(dir.path()).unwrap_err();
        assert_eq!(err.code(), "HASH_COMPUTATION_FAILED");
    }

    #[test]
    fn test_edited_frozen_definition_still_loads() {
        let dir = TempDir::new().unwrap();
        let spec = TemplateSpec::new("bootstrap_ci", TemplateVersion::new(1, 0, 0));
        let folder = write_template(dir.path(), &spec, "def run(): pass\n", true);
        fs::write(folder.join(DEFAULT_ENTRYPOINT), "def run(): return 0\n").unwrap();

        let registry = load_catalog(dir.path()).unwrap();
        let metadata = registry.metadata("bootstrap_ci@1.0.0").unwrap();
        assert!(metadata.frozen);
        assert_eq!(metadata.first_evidence_id.as_deref(), Some("ev-001"));
    }

    #[test]
    fn test_saved_state_survives_reload() {
        let dir = TempDir::new().unwrap();
        let spec = TemplateSpec::new("bootstrap_ci", TemplateVersion::new(1, 0, 0));
        write_template(dir.path(), &spec, "def run(): pass\n", false);

        let mut registry = load_catalog(dir.path()).unwrap();
        let metadata = registry
            .taint("bootstrap_ci@1.0.0", "leaky resampling", Some("bootstrap_ci@1.0.1".into()))
            .unwrap();
        save_governance_state(dir.path(), &metadata).unwrap();

        let reloaded = load_catalog(dir.path()).unwrap();
        let metadata = reloaded.metadata("bootstrap_ci@1.0.0").unwrap();
        assert!(metadata.tainted);
        assert_eq!(metadata.tainted_reason.as_deref(), Some("leaky resampling"));
        assert_eq!(metadata.superseded_by.as_deref(), Some("bootstrap_ci@1.0.1"));
    }

    #[test]
    fn test_edit_after_recording_fails_hash_check() {
        let dir = TempDir::new().unwrap();
        let spec = TemplateSpec::new("bootstrap_ci", TemplateVersion::new(1, 0, 0));
        let folder = write_template(dir.path(), &spec, "def run(): pass\n", false);
        let qid = "bootstrap_ci@1.0.0";

        let registry = load_catalog(dir.path()).unwrap();
        check_recorded_hashes(&registry, dir.path(), qid).unwrap();
        save_governance_state(dir.path(), registry.metadata(qid).unwrap()).unwrap();
        check_recorded_hashes(&registry, dir.path(), qid).unwrap();

        fs::write(folder.join(DEFAULT_ENTRYPOINT), "def run(): return 0\n").unwrap();
        let mut registry = load_catalog(dir.path()).unwrap();
        let err = check_recorded_hashes(&registry, dir.path(), qid).unwrap_err();
        assert_eq!(err.code(), "HASH_MISMATCH");
        assert!(err.to_string().contains("code_hash"));

        // saving again keeps the first recorded pair
        let metadata = registry.deprecate(qid).unwrap();
        save_governance_state(dir.path(), &metadata).unwrap();
        let registry = load_catalog(dir.path()).unwrap();
        assert_eq!(
            check_recorded_hashes(&registry, dir.path(), qid).unwrap_err().code(),
            "HASH_MISMATCH"
        );
    }

    #[test]
    fn test_hash_check_unknown_template() {
        let dir = TempDir::new().unwrap();
        let registry = load_catalog(dir.path()).unwrap();
        let err = check_recorded_hashes(&registry, dir.path(), "ghost@1.0.0").unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[test]
    fn test_missing_catalog_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(load_catalog(&dir.path().join("nope")).unwrap().is_empty());
    }
}
