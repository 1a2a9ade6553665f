//! Template verification
//!
//! Five independent passes over the manifest (what was promised) and the live
//! registry (what exists now). Every pass runs to completion and files its
//! findings into one report; the run succeeds iff no errors were filed.

use super::hashing::{compute_code_hash_strict, short_hash, HASH_PREVIEW};
use super::manifest::{Manifest, ManifestEntry};
use super::metadata::{qualified_id, split_qualified_id, Capability, TemplateStatus, TemplateVersion};
use super::registry::TemplateRegistry;
use crate::error::{GovResult, GovernanceError};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Hash prefix length shown in mismatch messages

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Finding {
    pub code: String,
    pub message: String,
}

impl Finding {
    fn pass(message: String) -> Self {
        Self {
            code: "OK".to_string(),
            message,
        }
    }
}

impl From<GovernanceError> for Finding {
    fn from(err: GovernanceError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Errors, warnings and informational passes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    pub errors: Vec<Finding>,
    pub warnings: Vec<Finding>,
    pub passed: Vec<Finding>,
}

impl VerificationReport {
    pub fn error(&mut self, err: GovernanceError) {
        self.errors.push(err.into());
    }

    pub fn warn(&mut self, code: &str, message: String) {
        self.warnings.push(Finding {
            code: code.to_string(),
            message,
        });
    }

    pub fn ok(&mut self, message: String) {
        self.passed.push(Finding::pass(message));
    }

    pub fn merge(&mut self, other: VerificationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
        self.passed.extend(other.passed);
    }

    pub fn sorted(mut self) -> Self {
        self.errors.sort();
        self.warnings.sort();
        self.passed.sort();
        self
    }

    /// No errors; with `strict`, no warnings either
    pub fn success(&self, strict: bool) -> bool {
        self.errors.is_empty() && (!strict || self.warnings.is_empty())
    }

    pub fn render(&self, strict: bool) -> Vec<String> {
        let rule = "=".repeat(60);
        let thin = "-".repeat(60);
        let mut lines = vec![
            String::new(),
            rule.clone(),
            "TEMPLATE VERIFICATION SUMMARY".to_string(),
            rule,
        ];

        let sections = [
            ("PASSED", "[+]", &self.passed),
            ("WARNINGS", "[!]", &self.warnings),
            ("ERRORS", "[x]", &self.errors),
        ];
        for (title, marker, findings) in sections {
            if findings.is_empty() {
                continue;
            }
            lines.push(String::new());
            lines.push(format!("{} ({}):", title, findings.len()));
            for finding in findings.iter() {
                lines.push(format!("  {} {}", marker, finding.message));
            }
        }

        lines.push(String::new());
        lines.push(thin.clone());
        if self.success(strict) {
            lines.push("RESULT: ALL CHECKS PASSED".to_string());
        } else if self.errors.is_empty() {
            lines.push(format!(
                "RESULT: FAILED ({} warning(s), strict mode)",
                self.warnings.len()
            ));
        } else {
            lines.push(format!("RESULT: FAILED ({} error(s))", self.errors.len()));
        }
        lines.push(thin);
        lines
    }
}

/// Verification inputs shared by every pass
pub struct TemplateVerifier<'a> {
    pub manifest: &'a Manifest,
    pub registry: &'a TemplateRegistry,
    pub forbidden: &'a BTreeSet<Capability>,
}

impl<'a> TemplateVerifier<'a> {
    pub fn new(
        manifest: &'a Manifest,
        registry: &'a TemplateRegistry,
        forbidden: &'a BTreeSet<Capability>,
    ) -> Self {
        Self {
            manifest,
            registry,
            forbidden,
        }
    }

    /// All five passes, in order
    pub fn run(&self) -> VerificationReport {
        let mut report = VerificationReport::default();
        self.verify_frozen(&mut report);
        self.verify_semver(&mut report);
        self.verify_capabilities(&mut report);
        self.verify_dependencies(&mut report);
        self.verify_required_tests(&mut report);
        info!(
            errors = report.errors.len(),
            warnings = report.warnings.len(),
            passed = report.passed.len(),
            "Template verification finished"
        );
        report
    }

    /// Every check that concerns a single qualified id
    pub fn run_one(&self, qid: &str) -> VerificationReport {
        let mut report = VerificationReport::default();
        if let Some(entry) = self.manifest.get(qid) {
            self.check_frozen(qid, entry, &mut report);
            self.check_semver(qid, entry, &mut report);
        }
        if self.registry.get(qid).is_some() {
            self.check_capabilities(qid, &mut report);
            self.check_dependencies(qid, &mut report);
            self.check_required_tests(qid, &mut report);
        }
        report
    }

    /// Union of manifest and registry ids
    pub fn subjects(&self) -> BTreeSet<String> {
        self.manifest
            .entries
            .keys()
            .cloned()
            .chain(self.registry.list_all())
            .collect()
    }

    pub fn verify_frozen(&self, report: &mut VerificationReport) {
        for (qid, entry) in &self.manifest.entries {
            self.check_frozen(qid, entry, report);
        }
    }

    pub fn verify_semver(&self, report: &mut VerificationReport) {
        for (qid, entry) in &self.manifest.entries {
            self.check_semver(qid, entry, report);
        }
    }

    pub fn verify_capabilities(&self, report: &mut VerificationReport) {
        for qid in self.registry.list_all() {
            self.check_capabilities(&qid, report);
        }
    }

    pub fn verify_dependencies(&self, report: &mut VerificationReport) {
        for qid in self.registry.list_all() {
            self.check_dependencies(&qid, report);
        }
    }

    pub fn verify_required_tests(&self, report: &mut VerificationReport) {
        for qid in self.registry.list_all() {
            self.check_required_tests(&qid, report);
        }
    }

    fn check_frozen(&self, qid: &str, entry: &ManifestEntry, report: &mut VerificationReport) {
        if !entry.frozen {
            return;
        }
        let Some(template) = self.registry.get(qid) else {
            report.error(GovernanceError::MissingFromRegistry(qid.to_string()));
            return;
        };

        match compute_code_hash_strict(&template.definition) {
            Err(err) => {
                report.error(err);
                return;
            }
            Ok(current) if current != entry.code_hash => report.error(Self::mismatch(
                "Frozen code",
                qid,
                &entry.code_hash,
                &current,
            )),
            Ok(_) => report.ok(format!("Frozen code hash verified: {}", qid)),
        }

        match template.spec.spec_hash() {
            Err(err) => report.error(err),
            Ok(current) if current != entry.spec_hash => report.error(Self::mismatch(
                "Frozen spec",
                qid,
                &entry.spec_hash,
                &current,
            )),
            Ok(_) => report.ok(format!("Frozen spec hash verified: {}", qid)),
        }
    }

    fn mismatch(label: &'static str, qid: &str, expected: &str, actual: &str) -> GovernanceError {
        GovernanceError::HashMismatch {
            label,
            subject: qid.to_string(),
            expected: short_hash(expected, HASH_PREVIEW),
            actual: short_hash(actual, HASH_PREVIEW),
        }
    }

    fn check_semver(&self, qid: &str, entry: &ManifestEntry, report: &mut VerificationReport) {
        let version: TemplateVersion = match entry.version.parse() {
            Ok(v) => v,
            Err(err) => {
                report.error(err);
                return;
            }
        };
        if version.patch == 0 {
            return;
        }

        let base_qid = qualified_id(&entry.template_id, &version.patch_base());
        let Some(base) = self.manifest.get(&base_qid) else {
            debug!("No base entry {} for {}", base_qid, qid);
            return;
        };
        if base.spec_hash != entry.spec_hash {
            report.error(GovernanceError::SemverViolation {
                subject: qid.to_string(),
                base: base_qid,
            });
        } else {
            report.ok(format!("Semver consistent: {} matches {} spec", qid, base_qid));
        }
    }

    fn check_capabilities(&self, qid: &str, report: &mut VerificationReport) {
        let Some(spec) = self.registry.spec(qid) else {
            return;
        };
        let offending: Vec<String> = spec
            .capabilities
            .intersection(self.forbidden)
            .map(|c| c.as_str().to_string())
            .collect();
        if offending.is_empty() {
            report.ok(format!("Capabilities clean: {}", qid));
        } else {
            report.error(GovernanceError::ForbiddenCapability {
                subject: qid.to_string(),
                capabilities: offending,
            });
        }
    }

    fn check_dependencies(&self, qid: &str, report: &mut VerificationReport) {
        let Some(spec) = self.registry.spec(qid) else {
            return;
        };
        let mut clean = true;
        for dependency in &spec.depends_on {
            if split_qualified_id(dependency).is_none() {
                clean = false;
                report.error(GovernanceError::UnqualifiedDependency {
                    subject: qid.to_string(),
                    dependency: dependency.clone(),
                });
            }
        }
        if clean && !spec.depends_on.is_empty() {
            report.ok(format!("Dependencies qualified: {}", qid));
        }
    }

    fn check_required_tests(&self, qid: &str, report: &mut VerificationReport) {
        let Some(template) = self.registry.get(qid) else {
            return;
        };
        let count = template.spec.required_tests.len();
        if count > 0 {
            report.ok(format!("Required tests defined: {} ({})", qid, count));
        } else if template.metadata.status == TemplateStatus::Active {
            report.error(GovernanceError::MissingRequiredTests(qid.to_string()));
        } else {
            report.warn(
                "MISSING_REQUIRED_TESTS",
                format!(
                    "Missing required tests: {} (status: {})",
                    qid, template.metadata.status
                ),
            );
        }
    }
}

/// Per-qid fan-out on blocking tasks, merged at one point.
///
/// The sorted result equals `TemplateVerifier::run(..).sorted()`.
pub async fn verify_catalog_parallel(
    manifest: Arc<Manifest>,
    registry: Arc<TemplateRegistry>,
    forbidden: Arc<BTreeSet<Capability>>,
) -> GovResult<VerificationReport> {
    let subjects = TemplateVerifier::new(&manifest, &registry, &forbidden).subjects();

    let mut handles = Vec::with_capacity(subjects.len());
    for qid in subjects {
        let manifest = Arc::clone(&manifest);
        let registry = Arc::clone(&registry);
        let forbidden = Arc::clone(&forbidden);
        handles.push(tokio::task::spawn_blocking(move || {
            TemplateVerifier::new(&manifest, &registry, &forbidden).run_one(&qid)
        }));
    }

    let mut report = VerificationReport::default();
    for handle in handles {
        let partial = handle
            .await
            .map_err(|e| GovernanceError::Validation(format!("verification task failed: {}", e)))?;
        report.merge(partial);
    }
    Ok(report.sorted())
}
