//! Base-versus-head comparison of two trust-gate summaries

use super::gate::{show, GovernanceStatus, ReplayStatus, TrustGateSummary, CONTRACT_VERSION};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitGateDiff {
    pub pass_changed: bool,
    pub base_pass: bool,
    pub head_pass: bool,
    pub replay_status_changed: bool,
    pub base_replay_status: Option<ReplayStatus>,
    pub head_replay_status: Option<ReplayStatus>,
    pub base_governance_status: Option<GovernanceStatus>,
    pub head_governance_status: Option<GovernanceStatus>,
    pub duration_ms_delta: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldGateDiff {
    pub pass_changed: bool,
    pub base_pass: bool,
    pub head_pass: bool,
    pub hold_code_changed: bool,
    pub base_hold_code: Option<String>,
    pub head_hold_code: Option<String>,
    pub duration_ms_delta: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustGateDiff {
    pub contract_version: String,
    pub base_bundle_root: Option<String>,
    pub head_bundle_root: Option<String>,
    pub run_prefixes: Vec<String>,
    pub commit_gate: CommitGateDiff,
    pub hold_gate: HoldGateDiff,
}

/// Integer view of a duration field. Integers, whole-or-fractional floats
/// (truncated) and integer strings are accepted; anything else is `None`.
fn as_millis(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().and_then(|u| i64::try_from(u).ok()))
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// `head - base`, or `None` when either side is missing or not numeric
pub fn duration_delta(base: Option<&Value>, head: Option<&Value>) -> Option<i64> {
    let base = as_millis(base?)?;
    let head = as_millis(head?)?;
    head.checked_sub(base)
}

/// Compare two summaries gate by gate
pub fn build_diff(base: &TrustGateSummary, head: &TrustGateSummary) -> TrustGateDiff {
    let run_prefixes: BTreeSet<String> = base
        .run_prefixes
        .iter()
        .chain(head.run_prefixes.iter())
        .cloned()
        .collect();

    let (bc, hc) = (&base.commit_gate, &head.commit_gate);
    let (bh, hh) = (&base.hold_gate, &head.hold_gate);

    TrustGateDiff {
        contract_version: CONTRACT_VERSION.to_string(),
        base_bundle_root: base.bundle_root.clone(),
        head_bundle_root: head.bundle_root.clone(),
        run_prefixes: run_prefixes.into_iter().collect(),
        commit_gate: CommitGateDiff {
            pass_changed: bc.pass != hc.pass,
            base_pass: bc.pass,
            head_pass: hc.pass,
            replay_status_changed: bc.replay_status != hc.replay_status,
            base_replay_status: bc.replay_status.clone(),
            head_replay_status: hc.replay_status.clone(),
            base_governance_status: bc.governance_status.clone(),
            head_governance_status: hc.governance_status.clone(),
            duration_ms_delta: duration_delta(bc.duration_ms.as_ref(), hc.duration_ms.as_ref()),
        },
        hold_gate: HoldGateDiff {
            pass_changed: bh.pass != hh.pass,
            base_pass: bh.pass,
            head_pass: hh.pass,
            hold_code_changed: bh.hold_code != hh.hold_code,
            base_hold_code: bh.hold_code.clone(),
            head_hold_code: hh.hold_code.clone(),
            duration_ms_delta: duration_delta(bh.duration_ms.as_ref(), hh.duration_ms.as_ref()),
        },
    }
}

pub fn build_step_lines(diff: &TrustGateDiff) -> Vec<String> {
    let commit = &diff.commit_gate;
    let hold = &diff.hold_gate;
    vec![
        "## Trust Gate Delta".to_string(),
        format!(
            "- COMMIT changed={} | replay_changed={} | duration_delta_ms={}",
            commit.pass_changed,
            commit.replay_status_changed,
            show(&commit.duration_ms_delta)
        ),
        format!(
            "- HOLD changed={} | hold_code_changed={} | duration_delta_ms={}",
            hold.pass_changed,
            hold.hold_code_changed,
            show(&hold.duration_ms_delta)
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trust::gate::{build_summary, fixtures, RunContext, COMMIT_PREFIX};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_duration_delta() {
        assert_eq!(duration_delta(Some(&json!(1000)), Some(&json!(1250))), Some(250));
        assert_eq!(duration_delta(Some(&json!("900")), Some(&json!(800))), Some(-100));
        assert_eq!(duration_delta(Some(&json!(10.9)), Some(&json!(20))), Some(10));
        assert_eq!(duration_delta(None, Some(&json!(20))), None);
        assert_eq!(duration_delta(Some(&json!("fast")), Some(&json!(20))), None);
        assert_eq!(duration_delta(Some(&json!(true)), Some(&json!(20))), None);
        assert_eq!(
            duration_delta(Some(&json!(i64::MIN)), Some(&json!(i64::MAX))),
            None
        );
    }

    #[test]
    fn test_identical_summaries_have_no_changes() {
        let dir = TempDir::new().unwrap();
        fixtures::healthy_bundle(dir.path());
        let summary = build_summary(dir.path(), RunContext::default()).unwrap();

        let diff = build_diff(&summary, &summary);
        assert!(!diff.commit_gate.pass_changed);
        assert!(!diff.commit_gate.replay_status_changed);
        assert!(!diff.hold_gate.hold_code_changed);
        assert_eq!(diff.commit_gate.duration_ms_delta, Some(0));
        assert_eq!(diff.run_prefixes, vec!["commit", "hold"]);
    }

    #[test]
    fn test_regressed_commit_gate() {
        let base_dir = TempDir::new().unwrap();
        fixtures::healthy_bundle(base_dir.path());
        let head_dir = TempDir::new().unwrap();
        fixtures::healthy_bundle(head_dir.path());
        let commit = head_dir.path().join(COMMIT_PREFIX);
        fixtures::write(&commit, "run1_replay_verify_verdict.json", json!({"status": "FAIL"}));
        fixtures::write(
            &commit,
            "run1_governance_summary.json",
            json!({"status": "STAGED", "duration_ms": 1500}),
        );

        let base = build_summary(base_dir.path(), RunContext::default()).unwrap();
        let head = build_summary(head_dir.path(), RunContext::default()).unwrap();
        let diff = build_diff(&base, &head);

        assert!(diff.commit_gate.pass_changed);
        assert!(diff.commit_gate.base_pass);
        assert!(!diff.commit_gate.head_pass);
        assert!(diff.commit_gate.replay_status_changed);
        assert_eq!(diff.commit_gate.duration_ms_delta, Some(300));

        let lines = build_step_lines(&diff);
        assert_eq!(
            lines[1],
            "- COMMIT changed=true | replay_changed=true | duration_delta_ms=300"
        );
        assert_eq!(
            lines[2],
            "- HOLD changed=false | hold_code_changed=false | duration_delta_ms=0"
        );
    }

    #[test]
    fn test_partial_summary_files_diff_without_error() {
        let base: TrustGateSummary = serde_json::from_value(json!({"bundle_root": "a"})).unwrap();
        let head: TrustGateSummary = serde_json::from_value(json!({
            "bundle_root": "b",
            "run_prefixes": ["commit"],
            "hold_gate": {"pass": true, "hold_code": "X"}
        }))
        .unwrap();

        let diff = build_diff(&base, &head);
        assert!(diff.hold_gate.pass_changed);
        assert!(diff.hold_gate.hold_code_changed);
        assert_eq!(diff.hold_gate.duration_ms_delta, None);
        assert_eq!(diff.run_prefixes, vec!["commit"]);
        assert_eq!(
            build_step_lines(&diff)[2],
            "- HOLD changed=true | hold_code_changed=true | duration_delta_ms=null"
        );
    }

    #[test]
    fn test_null_gates_and_fields_still_diff() {
        let base: TrustGateSummary = serde_json::from_value(json!({
            "commit_gate": null,
            "hold_gate": null,
            "run_prefixes": null
        }))
        .unwrap();
        let head: TrustGateSummary = serde_json::from_value(json!({
            "run_prefixes": ["hold", null, 3],
            "commit_gate": {"pass": null, "replay_status": "PASS", "duration_ms": 40},
            "hold_gate": {"pass": true, "hold_code": 7, "duration_ms": null}
        }))
        .unwrap();

        let diff = build_diff(&base, &head);
        assert!(!diff.commit_gate.pass_changed);
        assert!(diff.commit_gate.replay_status_changed);
        assert_eq!(diff.commit_gate.head_replay_status, Some(ReplayStatus::Pass));
        assert_eq!(diff.commit_gate.duration_ms_delta, None);
        assert!(diff.hold_gate.pass_changed);
        assert_eq!(diff.hold_gate.head_hold_code.as_deref(), Some("7"));
        assert_eq!(diff.run_prefixes, vec!["3", "hold"]);
    }

    #[test]
    fn test_duration_missing_on_one_side() {
        let base: TrustGateSummary =
            serde_json::from_value(json!({"commit_gate": {"pass": true, "duration_ms": 100}}))
                .unwrap();
        let head: TrustGateSummary =
            serde_json::from_value(json!({"commit_gate": {"pass": true}})).unwrap();

        let diff = build_diff(&base, &head);
        assert!(!diff.commit_gate.pass_changed);
        assert_eq!(diff.commit_gate.duration_ms_delta, None);
        assert_eq!(
            build_step_lines(&diff)[1],
            "- COMMIT changed=false | replay_changed=false | duration_delta_ms=null"
        );
    }
}
