//! Template contract and governance records

use super::hashing::sha256_hex;
use crate::error::{GovResult, GovernanceError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Semantic version `major.minor.patch`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TemplateVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl TemplateVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    /// The `x.y.0` release this version patches
    pub fn patch_base(&self) -> Self {
        Self::new(self.major, self.minor, 0)
    }
}

impl FromStr for TemplateVersion {
    type Err = GovernanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() != 3 {
            return Err(GovernanceError::InvalidVersion(s.to_string()));
        }
        let parse = |p: &str| {
            p.parse::<u32>()
                .map_err(|_| GovernanceError::InvalidVersion(s.to_string()))
        };
        Ok(Self::new(parse(parts[0])?, parse(parts[1])?, parse(parts[2])?))
    }
}

impl TryFrom<String> for TemplateVersion {
    type Error = GovernanceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TemplateVersion> for String {
    fn from(value: TemplateVersion) -> Self {
        value.to_string()
    }
}

impl fmt::Display for TemplateVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// `template_id@version`
pub fn qualified_id(template_id: &str, version: &TemplateVersion) -> String {
    format!("{}@{}", template_id, version)
}

/// Split a qualified id; `None` unless both halves are well formed
pub fn split_qualified_id(qid: &str) -> Option<(&str, TemplateVersion)> {
    let (id, version) = qid.split_once('@')?;
    if id.is_empty() {
        return None;
    }
    Some((id, version.parse().ok()?))
}

/// Declared side-effect surface of a template
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Filesystem,
    Network,
    Randomness,
    ExternalProcess,
    Database,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Filesystem => "filesystem",
            Capability::Network => "network",
            Capability::Randomness => "randomness",
            Capability::ExternalProcess => "external_process",
            Capability::Database => "database",
        }
    }

    pub fn default_forbidden() -> BTreeSet<Capability> {
        [Capability::Network, Capability::ExternalProcess]
            .into_iter()
            .collect()
    }
}

impl FromStr for Capability {
    type Err = GovernanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "filesystem" => Ok(Capability::Filesystem),
            "network" => Ok(Capability::Network),
            "randomness" => Ok(Capability::Randomness),
            "external_process" => Ok(Capability::ExternalProcess),
            "database" => Ok(Capability::Database),
            other => Err(GovernanceError::Config(format!(
                "Unknown template capability: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateStatus {
    /// Usable for new experiments
    #[default]
    #[serde(alias = "ACTIVE")]
    Active,
    /// Queries still work, no new use
    #[serde(alias = "DEPRECATED")]
    Deprecated,
    /// Must not execute
    #[serde(alias = "BANNED")]
    Banned,
}

impl fmt::Display for TemplateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TemplateStatus::Active => "active",
            TemplateStatus::Deprecated => "deprecated",
            TemplateStatus::Banned => "banned",
        };
        f.write_str(s)
    }
}

impl FromStr for TemplateStatus {
    type Err = GovernanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(TemplateStatus::Active),
            "deprecated" => Ok(TemplateStatus::Deprecated),
            "banned" => Ok(TemplateStatus::Banned),
            other => Err(GovernanceError::Config(format!(
                "Unknown template status: {}",
                other
            ))),
        }
    }
}

/// How a failing run should be read as evidence. Part of the spec hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EpistemicSemantics {
    pub instrument: String,
    pub negative_role_on_fail: String,
    pub default_failure_mode: String,
    pub strength_model: String,
}

impl Default for EpistemicSemantics {
    fn default() -> Self {
        Self {
            instrument: "confirmatory".to_string(),
            negative_role_on_fail: "none".to_string(),
            default_failure_mode: "null_effect".to_string(),
            strength_model: "binary_default".to_string(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Declared contract of one template version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateSpec {
    pub template_id: String,
    pub version: TemplateVersion,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub param_schema: Value,
    #[serde(default)]
    pub output_schema: Value,
    #[serde(default)]
    pub invariants: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub capabilities: BTreeSet<Capability>,
    #[serde(default)]
    pub required_tests: Vec<String>,
    #[serde(default = "default_true")]
    pub deterministic: bool,
    #[serde(default)]
    pub epistemic: EpistemicSemantics,
    /// Definition file inside the catalog folder. Not part of the contract.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<String>,
}

impl TemplateSpec {
    pub fn new(template_id: impl Into<String>, version: TemplateVersion) -> Self {
        Self {
            template_id: template_id.into(),
            version,
            description: String::new(),
            param_schema: Value::Null,
            output_schema: Value::Null,
            invariants: Vec::new(),
            depends_on: Vec::new(),
            capabilities: BTreeSet::new(),
            required_tests: Vec::new(),
            deterministic: true,
            epistemic: EpistemicSemantics::default(),
            entrypoint: None,
        }
    }

    pub fn qualified_id(&self) -> String {
        qualified_id(&self.template_id, &self.version)
    }

    /// Sorted keys, sorted lists, no whitespace.
    ///
    /// The version is left out so a patch release can carry the exact
    /// contract of its `x.y.0` base.
    pub fn canonical_json(&self) -> GovResult<String> {
        let sorted = |items: &[String]| {
            let mut items = items.to_vec();
            items.sort();
            items
        };
        let value = json!({
            "template_id": self.template_id,
            "description": self.description,
            "param_schema": self.param_schema,
            "output_schema": self.output_schema,
            "invariants": sorted(&self.invariants),
            "depends_on": sorted(&self.depends_on),
            "capabilities": self.capabilities.iter().map(Capability::as_str).collect::<Vec<_>>(),
            "required_tests": sorted(&self.required_tests),
            "deterministic": self.deterministic,
            "epistemic": self.epistemic,
        });
        Ok(serde_json::to_string(&value)?)
    }

    pub fn spec_hash(&self) -> GovResult<String> {
        Ok(sha256_hex(self.canonical_json()?.as_bytes()))
    }
}

/// Governance record for one template version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateMetadata {
    pub template_id: String,
    pub version: TemplateVersion,
    pub spec_hash: String,
    pub code_hash: String,
    #[serde(default)]
    pub deps_hash: Option<String>,

    #[serde(default)]
    pub status: TemplateStatus,
    #[serde(default)]
    pub approved_by: Option<String>,
    #[serde(default)]
    pub approved_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub frozen: bool,
    #[serde(default)]
    pub frozen_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub first_evidence_id: Option<String>,
    #[serde(default)]
    pub freeze_claim_id: Option<String>,
    #[serde(default)]
    pub freeze_scope_lock_id: Option<String>,

    #[serde(default)]
    pub tainted: bool,
    #[serde(default)]
    pub tainted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tainted_reason: Option<String>,
    #[serde(default)]
    pub superseded_by: Option<String>,
}

impl TemplateMetadata {
    pub fn new(spec: &TemplateSpec, spec_hash: String, code_hash: String) -> Self {
        Self {
            template_id: spec.template_id.clone(),
            version: spec.version,
            spec_hash,
            code_hash,
            deps_hash: None,
            status: TemplateStatus::Active,
            approved_by: None,
            approved_at: None,
            frozen: false,
            frozen_at: None,
            first_evidence_id: None,
            freeze_claim_id: None,
            freeze_scope_lock_id: None,
            tainted: false,
            tainted_at: None,
            tainted_reason: None,
            superseded_by: None,
        }
    }

    pub fn qualified_id(&self) -> String {
        qualified_id(&self.template_id, &self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_version_parse_and_order() {
        let v: TemplateVersion = "1.2.3".parse().unwrap();
        assert_eq!(v, TemplateVersion::new(1, 2, 3));
        assert_eq!(v.patch_base().to_string(), "1.2.0");
        assert!("1.2".parse::<TemplateVersion>().is_err());
        assert!("1.x.0".parse::<TemplateVersion>().is_err());
        assert!(TemplateVersion::new(1, 10, 0) > TemplateVersion::new(1, 9, 9));
    }

    #[test]
    fn test_split_qualified_id() {
        assert_eq!(
            split_qualified_id("bootstrap_ci@1.0.0"),
            Some(("bootstrap_ci", TemplateVersion::new(1, 0, 0)))
        );
        assert_eq!(split_qualified_id("bootstrap_ci"), None);
        assert_eq!(split_qualified_id("@1.0.0"), None);
        assert_eq!(split_qualified_id("bootstrap_ci@latest"), None);
    }

    #[test]
    fn test_spec_hash_ignores_list_order() {
        let mut a = TemplateSpec::new("t", TemplateVersion::new(1, 0, 0));
        a.required_tests = vec!["b".into(), "a".into()];
        let mut b = a.clone();
        b.required_tests = vec!["a".into(), "b".into()];
        assert_eq!(a.spec_hash().unwrap(), b.spec_hash().unwrap());

        b.description = "changed".into();
        assert_ne!(a.spec_hash().unwrap(), b.spec_hash().unwrap());
    }

    #[test]
    fn test_patch_release_keeps_contract_hash() {
        let base = TemplateSpec::new("t", TemplateVersion::new(1, 2, 0));
        let mut patch = base.clone();
        patch.version = TemplateVersion::new(1, 2, 3);
        assert_eq!(base.spec_hash().unwrap(), patch.spec_hash().unwrap());
    }

    #[test]
    fn test_entrypoint_not_part_of_contract() {
        let a = TemplateSpec::new("t", TemplateVersion::new(1, 0, 0));
        let mut b = a.clone();
        b.entrypoint = Some("other.py".into());
        assert_eq!(a.spec_hash().unwrap(), b.spec_hash().unwrap());
    }

    #[test]
    fn test_status_accepts_both_cases() {
        let lower: TemplateStatus = serde_json::from_str("\"active\"").unwrap();
        let upper: TemplateStatus = serde_json::from_str("\"DEPRECATED\"").unwrap();
        assert_eq!(lower, TemplateStatus::Active);
        assert_eq!(upper, TemplateStatus::Deprecated);
        assert_eq!(serde_json::to_string(&TemplateStatus::Banned).unwrap(), "\"banned\"");
        assert_eq!("BANNED".parse::<TemplateStatus>().unwrap(), TemplateStatus::Banned);
        assert!("retired".parse::<TemplateStatus>().is_err());
    }

    #[test]
    fn test_capability_parse() {
        assert_eq!("External_Process".parse::<Capability>().unwrap(), Capability::ExternalProcess);
        assert_eq!("teleport".parse::<Capability>().unwrap_err().code(), "CONFIG_ERROR");
    }
}
