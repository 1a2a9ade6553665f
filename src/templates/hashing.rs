//! Content hashing for template definitions

use crate::error::{GovResult, GovernanceError};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::PathBuf;

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Characters of a hash shown in error messages
pub const HASH_PREVIEW: usize = 16;

/// First `n` chars of a hash, for human-facing messages
pub fn short_hash(hash: &str, n: usize) -> String {
    hash.chars().take(n).collect()
}

/// Where a template's executable definition lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateDefinition {
    File(PathBuf),
    /// Source held in memory
    #[cfg(test)]
    Inline(String),
}

impl TemplateDefinition {
    fn label(&self) -> String {
        match self {
            TemplateDefinition::File(path) => path.display().to_string(),
            #[cfg(test)]
            TemplateDefinition::Inline(_) => "<inline>".to_string(),
        }
    }

    fn source(&self) -> GovResult<String> {
        match self {
            #[cfg(test)]
            TemplateDefinition::Inline(source) => Ok(source.clone()),
            TemplateDefinition::File(path) => {
                fs::read_to_string(path).map_err(|e| GovernanceError::HashComputation {
                    subject: self.label(),
                    reason: e.to_string(),
                })
            }
        }
    }
}

/// Strict code hash: SHA-256 over the definition with `\r\n` folded to `\n`.
///
/// Fails instead of returning a placeholder when the source is unreadable or
/// empty. Comments are part of the hashed bytes.
pub fn compute_code_hash_strict(definition: &TemplateDefinition) -> GovResult<String> {
    let source = definition.source()?;
    if source.trim().is_empty() {
        return Err(GovernanceError::HashComputation {
            subject: definition.label(),
            reason: "definition is empty".to_string(),
        });
    }
    let normalized = source.replace("\r\n", "\n");
    Ok(sha256_hex(normalized.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_line_endings_do_not_change_hash() {
        let unix = TemplateDefinition::Inline("def run():\n    return 1\n".into());
        let dos = TemplateDefinition::Inline("def run():\r\n    return 1\r\n".into());
        assert_eq!(
            compute_code_hash_strict(&unix).unwrap(),
            compute_code_hash_strict(&dos).unwrap()
        );
    }

    #[test]
    fn test_comment_edit_changes_hash() {
        let a = TemplateDefinition::Inline("def run():\n    return 1\n".into());
        let b = TemplateDefinition::Inline("def run():\n    # tweak\n    return 1\n".into());
        assert_ne!(
            compute_code_hash_strict(&a).unwrap(),
            compute_code_hash_strict(&b).unwrap()
        );
    }

    #[test]
    fn test_strict_hash_fails_loudly() {
        let dir = TempDir::new().unwrap();
        let missing = TemplateDefinition::File(dir.path().join("template.py"));
        let err = compute_code_hash_strict(&missing).unwrap_err();
        assert_eq!(err.code(), "HASH_COMPUTATION_FAILED");

        let empty = TemplateDefinition::Inline("   \n".into());
        assert!(compute_code_hash_strict(&empty).is_err());
    }

    #[test]
    fn test_short_hash() {
        assert_eq!(short_hash("abcdef0123456789ffff", 16), "abcdef0123456789");
        assert_eq!(short_hash("abc", 16), "abc");
    }
}
