//! Versioned template registry
//!
//! An explicit value keyed by qualified id. Callers build one and pass it by
//! reference; there is no process-wide instance.

use super::hashing::{compute_code_hash_strict, TemplateDefinition};
use super::manifest::{Manifest, ManifestEntry};
use super::metadata::{TemplateMetadata, TemplateSpec, TemplateStatus};
use crate::error::{not_found_error, GovResult, GovernanceError};
use chrono::Utc;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// One registered template version
#[derive(Debug, Clone)]
pub struct RegisteredTemplate {
    pub definition: TemplateDefinition,
    pub spec: TemplateSpec,
    pub metadata: TemplateMetadata,
}

#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    entries: BTreeMap<String, RegisteredTemplate>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a template version and return its qualified id.
    ///
    /// Hashes are computed strictly. Supplied metadata must agree with them.
    pub fn register(
        &mut self,
        definition: TemplateDefinition,
        spec: TemplateSpec,
        metadata: Option<TemplateMetadata>,
    ) -> GovResult<String> {
        let qid = spec.qualified_id();
        if self.entries.contains_key(&qid) {
            return Err(GovernanceError::DuplicateTemplate(qid));
        }

        let spec_hash = spec.spec_hash()?;
        let code_hash = compute_code_hash_strict(&definition)?;

        let metadata = match metadata {
            None => TemplateMetadata::new(&spec, spec_hash, code_hash),
            Some(provided) => {
                if provided.spec_hash != spec_hash {
                    return Err(GovernanceError::Validation(format!(
                        "Metadata sanity check failed for {}: spec_hash mismatch (provided={}, computed={})",
                        qid, provided.spec_hash, spec_hash
                    )));
                }
                if provided.code_hash != code_hash {
                    return Err(GovernanceError::Validation(format!(
                        "Metadata sanity check failed for {}: code_hash mismatch (provided={}, computed={})",
                        qid, provided.code_hash, code_hash
                    )));
                }
                provided
            }
        };

        debug!("Registered template {}", qid);
        self.entries.insert(
            qid.clone(),
            RegisteredTemplate {
                definition,
                spec,
                metadata,
            },
        );
        Ok(qid)
    }

    pub fn get(&self, qid: &str) -> Option<&RegisteredTemplate> {
        self.entries.get(qid)
    }

    pub fn spec(&self, qid: &str) -> Option<&TemplateSpec> {
        self.entries.get(qid).map(|t| &t.spec)
    }

    pub fn metadata(&self, qid: &str) -> Option<&TemplateMetadata> {
        self.entries.get(qid).map(|t| &t.metadata)
    }

    /// Highest ACTIVE version of `template_id`
    pub fn latest(&self, template_id: &str) -> Option<&RegisteredTemplate> {
        self.entries
            .values()
            .filter(|t| t.spec.template_id == template_id)
            .filter(|t| t.metadata.status == TemplateStatus::Active)
            .max_by_key(|t| t.spec.version)
    }

    /// Sorted qualified ids
    pub fn list_all(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn list_by_status(&self, status: TemplateStatus) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, t)| t.metadata.status == status)
            .map(|(qid, _)| qid.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry_mut(&mut self, qid: &str) -> GovResult<&mut RegisteredTemplate> {
        self.entries
            .get_mut(qid)
            .ok_or_else(|| not_found_error(format!("Template not found: {}", qid)))
    }

    /// Freeze on first evidence. Freezing again keeps the original provenance.
    pub fn freeze(
        &mut self,
        qid: &str,
        evidence_id: &str,
        claim_id: Option<String>,
        scope_lock_id: Option<String>,
    ) -> GovResult<TemplateMetadata> {
        let entry = self.entry_mut(qid)?;
        let metadata = &mut entry.metadata;

        if metadata.frozen {
            if let Some(first) = &metadata.first_evidence_id {
                if !evidence_id.is_empty() && first != evidence_id {
                    warn!(
                        qualified_id = qid,
                        frozen_first = %first,
                        new = evidence_id,
                        "Freeze called for already-frozen template with different evidence_id; keeping original"
                    );
                }
            }
            return Ok(metadata.clone());
        }

        metadata.frozen = true;
        metadata.frozen_at = Some(Utc::now());
        metadata.first_evidence_id = Some(evidence_id.to_string());
        metadata.freeze_claim_id = claim_id;
        metadata.freeze_scope_lock_id = scope_lock_id;
        Ok(metadata.clone())
    }

    pub fn taint(
        &mut self,
        qid: &str,
        reason: &str,
        superseded_by: Option<String>,
    ) -> GovResult<TemplateMetadata> {
        let metadata = &mut self.entry_mut(qid)?.metadata;
        metadata.tainted = true;
        metadata.tainted_at = Some(Utc::now());
        metadata.tainted_reason = Some(reason.to_string());
        metadata.superseded_by = superseded_by;
        Ok(metadata.clone())
    }

    pub fn deprecate(&mut self, qid: &str) -> GovResult<TemplateMetadata> {
        let metadata = &mut self.entry_mut(qid)?.metadata;
        metadata.status = TemplateStatus::Deprecated;
        Ok(metadata.clone())
    }

    /// Whether the template's hashes, recomputed now, equal a recorded pair
    pub fn verify_hashes(&self, qid: &str, spec_hash: &str, code_hash: &str) -> GovResult<bool> {
        let Some(entry) = self.entries.get(qid) else {
            return Ok(false);
        };
        Ok(entry.spec.spec_hash()? == spec_hash
            && compute_code_hash_strict(&entry.definition)? == code_hash)
    }

    /// Export the manifest (without `_meta`)
    pub fn to_manifest(&self) -> Manifest {
        let entries = self
            .entries
            .iter()
            .map(|(qid, t)| {
                let mut depends_on = t.spec.depends_on.clone();
                depends_on.sort();
                let entry = ManifestEntry {
                    template_id: t.metadata.template_id.clone(),
                    version: t.metadata.version.to_string(),
                    spec_hash: t.metadata.spec_hash.clone(),
                    code_hash: t.metadata.code_hash.clone(),
                    deps_hash: t.metadata.deps_hash.clone(),
                    depends_on,
                    capabilities: t
                        .spec
                        .capabilities
                        .iter()
                        .map(|c| c.as_str().to_string())
                        .collect(),
                    frozen: t.metadata.frozen,
                    status: t.metadata.status,
                };
                (qid.clone(), entry)
            })
            .collect();
        Manifest {
            entries,
            meta: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::metadata::TemplateVersion;
    use pretty_assertions::assert_eq;

    fn spec(id: &str, version: &str) -> TemplateSpec {
        let mut spec = TemplateSpec::new(id, version.parse().unwrap());
        spec.required_tests = vec!["contract_basic".into()];
        spec
    }

    fn inline(code: &str) -> TemplateDefinition {
        TemplateDefinition::Inline(code.to_string())
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let mut registry = TemplateRegistry::new();
        let qid = registry
            .register(inline("def run(): pass"), spec("boot", "1.0.0"), None)
            .unwrap();
        assert_eq!(qid, "boot@1.0.0");

        let err = registry
            .register(inline("def run(): pass"), spec("boot", "1.0.0"), None)
            .unwrap_err();
        assert_eq!(err.code(), "DUPLICATE_TEMPLATE");
    }

    #[test]
    fn test_register_validates_supplied_metadata() {
        let mut registry = TemplateRegistry::new();
        let s = spec("boot", "1.0.0");
        let mut meta = TemplateMetadata::new(&s, s.spec_hash().unwrap(), "0".repeat(64));
        meta.frozen = true;
        let err = registry
            .register(inline("def run(): pass"), s, Some(meta))
            .unwrap_err();
        assert!(err.to_string().contains("code_hash mismatch"));
    }

    #[test]
    fn test_latest_skips_inactive_versions() {
        let mut registry = TemplateRegistry::new();
        for v in ["1.0.0", "1.1.0", "2.0.0"] {
            registry
                .register(inline("def run(): pass"), spec("boot", v), None)
                .unwrap();
        }
        registry.deprecate("boot@2.0.0").unwrap();

        let latest = registry.latest("boot").unwrap();
        assert_eq!(latest.spec.version, TemplateVersion::new(1, 1, 0));
        assert_eq!(registry.list_by_status(TemplateStatus::Deprecated), vec!["boot@2.0.0"]);
        assert!(registry.latest("missing").is_none());
    }

    #[test]
    fn test_freeze_is_idempotent() {
        let mut registry = TemplateRegistry::new();
        registry
            .register(inline("def run(): pass"), spec("boot", "1.0.0"), None)
            .unwrap();

        let first = registry.freeze("boot@1.0.0", "ev-1", None, None).unwrap();
        assert!(first.frozen);
        let again = registry.freeze("boot@1.0.0", "ev-2", None, None).unwrap();
        assert_eq!(again.first_evidence_id.as_deref(), Some("ev-1"));
        assert_eq!(again.frozen_at, first.frozen_at);

        assert_eq!(
            registry.freeze("nope@1.0.0", "ev", None, None).unwrap_err().code(),
            "NOT_FOUND"
        );
    }

    #[test]
    fn test_taint_and_verify_hashes() {
        let mut registry = TemplateRegistry::new();
        registry
            .register(inline("def run(): pass"), spec("boot", "1.0.0"), None)
            .unwrap();
        let meta = registry
            .taint("boot@1.0.0", "biased resampling", Some("boot@1.0.1".into()))
            .unwrap();
        assert!(meta.tainted);
        assert_eq!(meta.superseded_by.as_deref(), Some("boot@1.0.1"));

        assert!(registry
            .verify_hashes("boot@1.0.0", &meta.spec_hash, &meta.code_hash)
            .unwrap());
        assert!(!registry
            .verify_hashes("boot@1.0.0", &meta.spec_hash, "0000")
            .unwrap());
        assert!(!registry
            .verify_hashes("other@1.0.0", &meta.spec_hash, &meta.code_hash)
            .unwrap());
    }

    #[test]
    fn test_to_manifest_sorts_dependencies() {
        let mut registry = TemplateRegistry::new();
        let mut s = spec("boot", "1.0.0");
        s.depends_on = vec!["z@1.0.0".into(), "a@1.0.0".into()];
        registry.register(inline("def run(): pass"), s, None).unwrap();

        let manifest = registry.to_manifest();
        let entry = manifest.entries.get("boot@1.0.0").unwrap();
        assert_eq!(entry.depends_on, vec!["a@1.0.0", "z@1.0.0"]);
        assert_eq!(entry.status, TemplateStatus::Active);
    }
}
