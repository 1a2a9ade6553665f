//! Trust-gate arbitration over CI evidence bundles

pub mod diff;
pub mod gate;
mod lenient;

pub use diff::{build_diff, build_step_lines, duration_delta, TrustGateDiff};
pub use gate::{
    build_summary, build_summary_lines, load_gate_dir, CommitGate, GovernanceStatus, HoldGate,
    ReplayStatus, RunContext, TrustGateSummary,
};

use crate::error::GovResult;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

pub const STEP_SUMMARY_VAR: &str = "GITHUB_STEP_SUMMARY";

/// Pretty JSON with object keys in sorted order
pub fn write_sorted_json<T: Serialize>(path: &Path, value: &T) -> GovResult<()> {
    // serde_json::Map is a BTreeMap without the preserve_order feature
    let value = serde_json::to_value(value)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(&value)? + "\n")?;
    Ok(())
}

/// Append lines to the CI step summary when one is configured
pub fn append_step_summary(lines: &[String]) -> GovResult<bool> {
    let Ok(path) = std::env::var(STEP_SUMMARY_VAR) else {
        return Ok(false);
    };
    append_lines(Path::new(&path), lines)?;
    Ok(true)
}

pub fn append_lines(path: &Path, lines: &[String]) -> GovResult<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    for line in lines {
        writeln!(file, "{}", line)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_append_lines_keeps_existing_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("summary.md");
        fs::write(&path, "previous\n").unwrap();

        append_lines(&path, &["## Trust Gate Summary".to_string()]).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "previous\n## Trust Gate Summary\n"
        );
    }

    #[test]
    fn test_write_sorted_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out/summary.json");
        let summary = TrustGateSummary::default();
        write_sorted_json(&path, &summary).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let bundle = text.find("\"bundle_root\"").unwrap();
        let commit = text.find("\"commit_gate\"").unwrap();
        assert!(bundle < commit);
    }
}
