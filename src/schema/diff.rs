//! Additive-only diff linter
//!
//! Compares two capability snapshots and reports every removed type, owned
//! attribute and played role. The raw new text is also scanned for the
//! `undefine` keyword, independently of the structural result.

use super::capabilities::CapabilitySnapshot;
use super::lexer::contains_word;
use crate::error::{GovResult, GovernanceError};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Outcome of one linter run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LintReport {
    pub has_errors: bool,
    /// Ordered, human-readable violation lines
    pub violations: Vec<String>,
    /// Set when the destructive-change override suppressed failure
    pub bypassed: bool,
}

impl LintReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    /// `Err(AdditiveViolation)` when the report fails the gate
    pub fn ensure_additive(&self) -> GovResult<()> {
        if self.has_errors {
            return Err(GovernanceError::AdditiveViolation(format!(
                "{} destructive change(s), first: {}",
                self.violations.len(),
                self.violations.first().map(String::as_str).unwrap_or_default()
            )));
        }
        Ok(())
    }
}

/// The additive linter
pub struct AdditiveLinter;

impl AdditiveLinter {
    /// Structural diff plus the raw-text `undefine` scan.
    ///
    /// With `bypass` set the violations are still listed but the report does
    /// not fail.
    pub fn lint(
        old: &CapabilitySnapshot,
        new: &CapabilitySnapshot,
        new_text: &str,
        bypass: bool,
    ) -> LintReport {
        let mut violations = Self::structural_violations(old, new);
        if let Some(line) = Self::undefine_line(new_text) {
            violations.push(format!(
                "FORBIDDEN: New schema contains 'undefine' (line {}). Additive-only policy forbids destructive statements.",
                line
            ));
        }
        Self::finish(violations, bypass)
    }

    /// Lint two raw schema texts.
    ///
    /// A baseline that fails to parse is an error. A new text that fails to
    /// parse is reported as a violation, and the `undefine` scan still runs.
    pub fn lint_texts(old_text: &str, new_text: &str, bypass: bool) -> GovResult<LintReport> {
        let old = CapabilitySnapshot::extract(old_text)?;
        match CapabilitySnapshot::extract(new_text) {
            Ok(new) => Ok(Self::lint(&old, &new, new_text, bypass)),
            Err(err @ GovernanceError::Parse { .. }) => {
                let mut violations = vec![format!("PARSE: New schema could not be parsed: {}", err)];
                if let Some(line) = Self::undefine_line(new_text) {
                    violations.push(format!(
                        "FORBIDDEN: New schema contains 'undefine' (line {}). Additive-only policy forbids destructive statements.",
                        line
                    ));
                }
                Ok(Self::finish(violations, bypass))
            }
            Err(other) => Err(other),
        }
    }

    /// Removed types, then removed attributes, then removed roles
    pub fn structural_violations(old: &CapabilitySnapshot, new: &CapabilitySnapshot) -> Vec<String> {
        let mut violations = Vec::new();

        for name in old.types() {
            if !new.contains_type(name) {
                violations.push(format!("REMOVED: Type '{}' was deleted.", name));
            }
        }

        for (name, attrs) in &old.owns_of {
            let Some(current) = new.owns(name) else { continue };
            for attr in attrs.difference(current) {
                violations.push(format!(
                    "REMOVED: Type '{}' no longer owns attribute '{}'.",
                    name, attr
                ));
            }
        }

        for (name, roles) in &old.plays_of {
            if !new.contains_type(name) {
                continue;
            }
            let empty = Default::default();
            let current = new.plays(name).unwrap_or(&empty);
            for role in roles.difference(current) {
                violations.push(format!(
                    "REMOVED: Type '{}' no longer plays role '{}'.",
                    name, role
                ));
            }
        }

        debug!(count = violations.len(), "Structural diff complete");
        violations
    }

    fn undefine_line(text: &str) -> Option<usize> {
        contains_word(text, "undefine")
    }

    fn finish(violations: Vec<String>, bypass: bool) -> LintReport {
        if bypass {
            warn!(
                violations = violations.len(),
                "Additive-only checks BYPASSED by ALLOW_DESTRUCTIVE_SCHEMA override"
            );
            return LintReport {
                has_errors: false,
                violations,
                bypassed: true,
            };
        }
        LintReport {
            has_errors: !violations.is_empty(),
            violations,
            bypassed: false,
        }
    }
}
