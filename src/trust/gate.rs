//! Commit/hold verdicts from per-run artifacts
//!
//! Each run-prefix directory holds at most one governance summary, replay
//! verdict and capsule manifest. Absent artifacts become `null` fields.

use super::lenient::{self, scalar_string};
use crate::error::GovResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const CONTRACT_VERSION: &str = "v1";
pub const COMMIT_PREFIX: &str = "commit";
pub const HOLD_PREFIX: &str = "hold";

const GOVERNANCE_SUFFIX: &str = "_governance_summary.json";
const REPLAY_SUFFIX: &str = "_replay_verify_verdict.json";
const CAPSULE_SUFFIX: &str = "_run_capsule_manifest.json";

/// Outcome reported by the governance step of a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum GovernanceStatus {
    Staged,
    Hold,
    Error,
    /// Anything else, kept verbatim
    Other(String),
}

impl From<String> for GovernanceStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "STAGED" => GovernanceStatus::Staged,
            "HOLD" => GovernanceStatus::Hold,
            "ERROR" => GovernanceStatus::Error,
            _ => GovernanceStatus::Other(value),
        }
    }
}

impl From<GovernanceStatus> for String {
    fn from(value: GovernanceStatus) -> Self {
        value.to_string()
    }
}

impl fmt::Display for GovernanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GovernanceStatus::Staged => f.write_str("STAGED"),
            GovernanceStatus::Hold => f.write_str("HOLD"),
            GovernanceStatus::Error => f.write_str("ERROR"),
            GovernanceStatus::Other(s) => f.write_str(s),
        }
    }
}

/// Replay verification verdict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ReplayStatus {
    Pass,
    Fail,
    Other(String),
}

impl From<String> for ReplayStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "PASS" => ReplayStatus::Pass,
            "FAIL" => ReplayStatus::Fail,
            _ => ReplayStatus::Other(value),
        }
    }
}

impl From<ReplayStatus> for String {
    fn from(value: ReplayStatus) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ReplayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplayStatus::Pass => f.write_str("PASS"),
            ReplayStatus::Fail => f.write_str("FAIL"),
            ReplayStatus::Other(s) => f.write_str(s),
        }
    }
}

/// Fields pulled out of one run-prefix directory
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GateObservation {
    pub status: Option<GovernanceStatus>,
    pub hold_code: Option<String>,
    pub capsule_id: Option<String>,
    pub replay_status: Option<ReplayStatus>,
    pub duration_ms: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitGate {
    #[serde(deserialize_with = "lenient::flag")]
    pub pass: bool,
    #[serde(deserialize_with = "lenient::scalar")]
    pub governance_status: Option<GovernanceStatus>,
    #[serde(deserialize_with = "lenient::scalar")]
    pub capsule_id: Option<String>,
    #[serde(deserialize_with = "lenient::scalar")]
    pub replay_status: Option<ReplayStatus>,
    pub duration_ms: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldCodeCount {
    pub hold_code: String,
    pub count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HoldGate {
    #[serde(deserialize_with = "lenient::flag")]
    pub pass: bool,
    #[serde(deserialize_with = "lenient::scalar")]
    pub governance_status: Option<GovernanceStatus>,
    #[serde(deserialize_with = "lenient::scalar")]
    pub hold_code: Option<String>,
    #[serde(deserialize_with = "lenient::scalar")]
    pub capsule_id: Option<String>,
    pub duration_ms: Option<Value>,
    #[serde(deserialize_with = "lenient::record_list")]
    pub hold_code_distribution: Vec<HoldCodeCount>,
}

/// Every field is optional when read back; malformed fields read as empty
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustGateSummary {
    #[serde(deserialize_with = "lenient::scalar_or_empty")]
    pub contract_version: String,
    #[serde(deserialize_with = "lenient::scalar")]
    pub bundle_root: Option<String>,
    #[serde(deserialize_with = "lenient::scalar_list")]
    pub run_prefixes: Vec<String>,
    #[serde(deserialize_with = "lenient::scalar")]
    pub timestamp_utc: Option<String>,
    #[serde(deserialize_with = "lenient::scalar")]
    pub git_sha: Option<String>,
    #[serde(deserialize_with = "lenient::record")]
    pub commit_gate: CommitGate,
    #[serde(deserialize_with = "lenient::record")]
    pub hold_gate: HoldGate,
}

/// CI run identity stamped into a summary
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunContext {
    pub timestamp_utc: Option<String>,
    pub git_sha: Option<String>,
}

impl RunContext {
    pub fn from_env() -> Self {
        Self {
            timestamp_utc: std::env::var("GITHUB_RUN_CREATED_AT").ok(),
            git_sha: std::env::var("GITHUB_SHA").ok(),
        }
    }
}

fn first_with_suffix(dir: &Path, suffix: &str) -> GovResult<Option<PathBuf>> {
    if !dir.is_dir() {
        return Ok(None);
    }
    let mut matches: Vec<PathBuf> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let named = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(suffix));
        if named && path.is_file() {
            matches.push(path);
        }
    }
    matches.sort();
    Ok(matches.into_iter().next())
}

fn read_artifact(dir: &Path, suffix: &str) -> GovResult<Option<Value>> {
    match first_with_suffix(dir, suffix)? {
        Some(path) => {
            debug!("Reading artifact {}", path.display());
            Ok(Some(serde_json::from_str(&fs::read_to_string(path)?)?))
        }
        None => Ok(None),
    }
}

/// Read the three artifacts of one run-prefix directory
pub fn load_gate_dir(dir: &Path) -> GovResult<GateObservation> {
    let governance = read_artifact(dir, GOVERNANCE_SUFFIX)?;
    let replay = read_artifact(dir, REPLAY_SUFFIX)?;
    let capsule = read_artifact(dir, CAPSULE_SUFFIX)?;

    let field = |doc: &Option<Value>, key: &str| doc.as_ref().and_then(|d| d.get(key)).cloned();

    Ok(GateObservation {
        status: scalar_string(field(&governance, "status").as_ref()).map(GovernanceStatus::from),
        hold_code: scalar_string(field(&governance, "hold_code").as_ref()),
        capsule_id: scalar_string(field(&capsule, "capsule_id").as_ref()),
        replay_status: scalar_string(field(&replay, "status").as_ref()).map(ReplayStatus::from),
        duration_ms: field(&governance, "duration_ms").filter(|v| !v.is_null()),
    })
}

impl CommitGate {
    /// STAGED, a capsule was produced, and replay verified it
    pub fn evaluate(obs: GateObservation) -> Self {
        let pass = obs.status == Some(GovernanceStatus::Staged)
            && obs.capsule_id.as_deref().is_some_and(|c| !c.is_empty())
            && obs.replay_status == Some(ReplayStatus::Pass);
        Self {
            pass,
            governance_status: obs.status,
            capsule_id: obs.capsule_id,
            replay_status: obs.replay_status,
            duration_ms: obs.duration_ms,
        }
    }
}

impl HoldGate {
    /// HOLD, no capsule, and an explicit reason code
    pub fn evaluate(obs: GateObservation) -> Self {
        let pass = obs.status == Some(GovernanceStatus::Hold)
            && obs.capsule_id.is_none()
            && obs.hold_code.is_some();
        let hold_code_distribution = obs
            .hold_code
            .iter()
            .map(|code| HoldCodeCount {
                hold_code: code.clone(),
                count: 1,
            })
            .collect();
        Self {
            pass,
            governance_status: obs.status,
            hold_code: obs.hold_code,
            capsule_id: obs.capsule_id,
            duration_ms: obs.duration_ms,
            hold_code_distribution,
        }
    }
}

/// Build the summary for a bundle with `commit/` and `hold/` run directories
pub fn build_summary(root: &Path, context: RunContext) -> GovResult<TrustGateSummary> {
    let commit = load_gate_dir(&root.join(COMMIT_PREFIX))?;
    let hold = load_gate_dir(&root.join(HOLD_PREFIX))?;

    Ok(TrustGateSummary {
        contract_version: CONTRACT_VERSION.to_string(),
        bundle_root: Some(root.display().to_string()),
        run_prefixes: vec![COMMIT_PREFIX.to_string(), HOLD_PREFIX.to_string()],
        timestamp_utc: context.timestamp_utc,
        git_sha: context.git_sha,
        commit_gate: CommitGate::evaluate(commit),
        hold_gate: HoldGate::evaluate(hold),
    })
}

pub(crate) fn show<T: fmt::Display>(value: &Option<T>) -> String {
    value
        .as_ref()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "null".to_string())
}

fn verdict(pass: bool) -> &'static str {
    if pass {
        "PASS"
    } else {
        "FAIL"
    }
}

/// Operator-facing header plus one line per gate
pub fn build_summary_lines(summary: &TrustGateSummary) -> Vec<String> {
    let commit = &summary.commit_gate;
    let hold = &summary.hold_gate;
    vec![
        "## Trust Gate Summary".to_string(),
        format!(
            "- COMMIT gate: {} | capsule_id={} | replay={} | ms={}",
            verdict(commit.pass),
            show(&commit.capsule_id),
            show(&commit.replay_status),
            show(&commit.duration_ms)
        ),
        format!(
            "- HOLD gate: {} | hold_code={} | capsule_id={} | ms={}",
            verdict(hold.pass),
            show(&hold.hold_code),
            show(&hold.capsule_id),
            show(&hold.duration_ms)
        ),
    ]
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use serde_json::json;

    pub fn write(dir: &Path, name: &str, value: Value) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(name), value.to_string()).unwrap();
    }

    /// A bundle where both gates pass
    pub fn healthy_bundle(root: &Path) {
        let commit = root.join(COMMIT_PREFIX);
        write(&commit, "run1_governance_summary.json", json!({"status": "STAGED", "duration_ms": 1200}));
        write(&commit, "run1_replay_verify_verdict.json", json!({"status": "PASS"}));
        write(&commit, "run1_run_capsule_manifest.json", json!({"capsule_id": "cap-001"}));

        let hold = root.join(HOLD_PREFIX);
        write(&hold, "run2_governance_summary.json", json!({"status": "HOLD", "hold_code": "LOW_EVIDENCE", "duration_ms": 800}));
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::{healthy_bundle, write};
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_healthy_bundle_passes_both_gates() {
        let dir = TempDir::new().unwrap();
        healthy_bundle(dir.path());

        let summary = build_summary(dir.path(), RunContext::default()).unwrap();
        assert!(summary.commit_gate.pass);
        assert!(summary.hold_gate.pass);
        assert_eq!(summary.commit_gate.capsule_id.as_deref(), Some("cap-001"));
        assert_eq!(
            summary.hold_gate.hold_code_distribution,
            vec![HoldCodeCount {
                hold_code: "LOW_EVIDENCE".to_string(),
                count: 1
            }]
        );
        assert_eq!(summary.run_prefixes, vec!["commit", "hold"]);
    }

    #[test]
    fn test_missing_artifacts_are_null_not_errors() {
        let dir = TempDir::new().unwrap();
        let summary = build_summary(dir.path(), RunContext::default()).unwrap();
        assert!(!summary.commit_gate.pass);
        assert!(!summary.hold_gate.pass);
        assert_eq!(summary.commit_gate.governance_status, None);
        assert!(summary.hold_gate.hold_code_distribution.is_empty());
    }

    #[test]
    fn test_commit_fails_without_replay_pass() {
        let dir = TempDir::new().unwrap();
        healthy_bundle(dir.path());
        write(
            &dir.path().join(COMMIT_PREFIX),
            "run1_replay_verify_verdict.json",
            json!({"status": "FAIL"}),
        );
        let summary = build_summary(dir.path(), RunContext::default()).unwrap();
        assert!(!summary.commit_gate.pass);
        assert_eq!(summary.commit_gate.replay_status, Some(ReplayStatus::Fail));
    }

    #[test]
    fn test_hold_with_capsule_fails() {
        let dir = TempDir::new().unwrap();
        healthy_bundle(dir.path());
        write(
            &dir.path().join(HOLD_PREFIX),
            "run2_run_capsule_manifest.json",
            json!({"capsule_id": "cap-leak"}),
        );
        let summary = build_summary(dir.path(), RunContext::default()).unwrap();
        assert!(!summary.hold_gate.pass);
    }

    #[test]
    fn test_unknown_status_is_kept_verbatim() {
        let status: GovernanceStatus = serde_json::from_value(json!("QUARANTINED")).unwrap();
        assert_eq!(status, GovernanceStatus::Other("QUARANTINED".to_string()));
        assert_eq!(serde_json::to_value(&status).unwrap(), json!("QUARANTINED"));
    }

    #[test]
    fn test_summary_lines() {
        let dir = TempDir::new().unwrap();
        healthy_bundle(dir.path());
        let summary = build_summary(
            dir.path(),
            RunContext {
                timestamp_utc: None,
                git_sha: Some("abc123".to_string()),
            },
        )
        .unwrap();
        assert_eq!(summary.git_sha.as_deref(), Some("abc123"));
        let lines = build_summary_lines(&summary);
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[1],
            "- COMMIT gate: PASS | capsule_id=cap-001 | replay=PASS | ms=1200"
        );
        assert_eq!(
            lines[2],
            "- HOLD gate: PASS | hold_code=LOW_EVIDENCE | capsule_id=null | ms=800"
        );
    }

    #[test]
    fn test_summary_round_trips_through_json() {
        let dir = TempDir::new().unwrap();
        healthy_bundle(dir.path());
        let summary = build_summary(dir.path(), RunContext::default()).unwrap();
        let text = serde_json::to_string(&summary).unwrap();
        let back: TrustGateSummary = serde_json::from_str(&text).unwrap();
        assert_eq!(back, summary);
    }

    #[test]
    fn test_foreign_summary_fields_read_as_empty() {
        let summary: TrustGateSummary = serde_json::from_value(json!({
            "contract_version": 1,
            "commit_gate": "broken",
            "hold_gate": {
                "pass": "yes",
                "governance_status": "HOLD",
                "hold_code_distribution": [{"hold_code": "A", "count": 2}, {"count": "x"}]
            },
            "git_sha": null
        }))
        .unwrap();

        assert_eq!(summary.contract_version, "1");
        assert_eq!(summary.commit_gate, CommitGate::default());
        assert!(!summary.hold_gate.pass);
        assert_eq!(summary.hold_gate.governance_status, Some(GovernanceStatus::Hold));
        assert_eq!(summary.hold_gate.hold_code_distribution.len(), 1);
        assert_eq!(summary.git_sha, None);
    }
}
