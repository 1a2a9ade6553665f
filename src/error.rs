//! Error handling module
//!
//! One taxonomy for every governance engine. Deterministic kinds are collected
//! into batch reports by the engines; only transport failures (`Connectivity`)
//! and ambient I/O abort an invocation outright.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Ordinal sequencing failures detected by the migration ledger
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrdinalError {
    #[error("Duplicate migration ordinal detected: {0}")]
    Duplicate(u32),

    #[error("Migration gap detected: expected {expected}, got {found}")]
    Gap { expected: u32, found: u32 },
}

/// Application-wide error type
#[derive(Error, Debug)]
pub enum GovernanceError {
    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Additive violation: {0}")]
    AdditiveViolation(String),

    #[error("Invalid migration filename format: {0}. Must be <ordinal>_<name>.<ext>")]
    Format(String),

    #[error(transparent)]
    Ordinal(#[from] OrdinalError),

    #[error("Migration 1 must declare 'schema_version' with 'ordinal', 'git-commit' and 'applied-at'. Missing in {0}")]
    Bootstrap(String),

    #[error("Migration hygiene violation: {filename} must start with define/undefine/redefine. Found: {found}")]
    Hygiene { filename: String, found: String },

    #[error("{label} hash mismatch: {subject} (recorded: {expected}..., computed: {actual}...)")]
    HashMismatch {
        label: &'static str,
        subject: String,
        expected: String,
        actual: String,
    },

    #[error("Hash computation failed for {subject}: {reason}")]
    HashComputation { subject: String, reason: String },

    #[error("Frozen template missing from registry: {0}")]
    MissingFromRegistry(String),

    #[error("Semver violation: {subject} has a different spec than {base}")]
    SemverViolation { subject: String, base: String },

    #[error("Invalid version: {0} (expected X.Y.Z)")]
    InvalidVersion(String),

    #[error("Forbidden capabilities: {subject} uses [{}]", .capabilities.join(", "))]
    ForbiddenCapability {
        subject: String,
        capabilities: Vec<String>,
    },

    #[error("Dependency is not a semver-qualified id: {subject} depends on '{dependency}'")]
    UnqualifiedDependency { subject: String, dependency: String },

    #[error("Missing required tests: {0} is ACTIVE but has no tests defined")]
    MissingRequiredTests(String),

    #[error("Template already registered: {0}")]
    DuplicateTemplate(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Schema transaction failed for {filename} (ordinal {ordinal}): {message}")]
    SchemaTransaction {
        filename: String,
        ordinal: u32,
        message: String,
    },

    #[error("Connectivity error: {0}")]
    Connectivity(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GovernanceError {
    /// Stable machine code used in reports and HTTP bodies
    pub fn code(&self) -> &'static str {
        match self {
            GovernanceError::Parse { .. } => "PARSE_ERROR",
            GovernanceError::AdditiveViolation(_) => "ADDITIVE_VIOLATION",
            GovernanceError::Format(_) => "FORMAT_ERROR",
            GovernanceError::Ordinal(_) => "ORDINAL_ERROR",
            GovernanceError::Bootstrap(_) => "BOOTSTRAP_ERROR",
            GovernanceError::Hygiene { .. } => "HYGIENE_VIOLATION",
            GovernanceError::HashMismatch { .. } => "HASH_MISMATCH",
            GovernanceError::HashComputation { .. } => "HASH_COMPUTATION_FAILED",
            GovernanceError::MissingFromRegistry(_) => "MISSING_FROM_REGISTRY",
            GovernanceError::SemverViolation { .. } => "SEMVER_VIOLATION",
            GovernanceError::InvalidVersion(_) => "INVALID_VERSION",
            GovernanceError::ForbiddenCapability { .. } => "FORBIDDEN_CAPABILITY",
            GovernanceError::UnqualifiedDependency { .. } => "UNQUALIFIED_DEPENDENCY",
            GovernanceError::MissingRequiredTests(_) => "MISSING_REQUIRED_TESTS",
            GovernanceError::DuplicateTemplate(_) => "DUPLICATE_TEMPLATE",
            GovernanceError::NotFound(_) => "NOT_FOUND",
            GovernanceError::SchemaTransaction { .. } => "SCHEMA_TRANSACTION_FAILED",
            GovernanceError::Connectivity(_) => "CONNECTIVITY_ERROR",
            GovernanceError::Validation(_) => "VALIDATION_ERROR",
            GovernanceError::Config(_) => "CONFIG_ERROR",
            GovernanceError::Io(_) => "IO_ERROR",
            GovernanceError::Json(_) => "JSON_ERROR",
        }
    }

    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        GovernanceError::Parse {
            line,
            message: message.into(),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            GovernanceError::NotFound(_) => StatusCode::NOT_FOUND,
            GovernanceError::Connectivity(_) => StatusCode::SERVICE_UNAVAILABLE,
            GovernanceError::Io(_) | GovernanceError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GovernanceError::DuplicateTemplate(_) => StatusCode::CONFLICT,
            _ => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl IntoResponse for GovernanceError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (message, details) = match &self {
            GovernanceError::Io(e) => {
                error!("IO error: {:?}", e);
                ("An internal error occurred".to_string(), Some(e.to_string()))
            }
            GovernanceError::Config(msg) => {
                error!("Configuration error: {}", msg);
                ("A configuration error occurred".to_string(), Some(msg.clone()))
            }
            other => (other.to_string(), None),
        };

        let body = Json(ErrorResponse {
            success: false,
            message,
            error: details,
            code: Some(self.code().to_string()),
        });

        (status, body).into_response()
    }
}

/// Result type alias used across the engines
pub type GovResult<T> = Result<T, GovernanceError>;

/// Helper function to create a validation error
pub fn validation_error(msg: impl Into<String>) -> GovernanceError {
    GovernanceError::Validation(msg.into())
}

/// Helper function to create a not found error
pub fn not_found_error(msg: impl Into<String>) -> GovernanceError {
    GovernanceError::NotFound(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordinal_error_messages() {
        let dup: GovernanceError = OrdinalError::Duplicate(1).into();
        assert_eq!(dup.to_string(), "Duplicate migration ordinal detected: 1");
        assert_eq!(dup.code(), "ORDINAL_ERROR");

        let gap: GovernanceError = OrdinalError::Gap { expected: 2, found: 3 }.into();
        assert_eq!(gap.to_string(), "Migration gap detected: expected 2, got 3");
    }

    #[test]
    fn test_forbidden_capability_lists_offenders() {
        let err = GovernanceError::ForbiddenCapability {
            subject: "fetcher@1.0.0".to_string(),
            capabilities: vec!["network".to_string(), "external_process".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Forbidden capabilities: fetcher@1.0.0 uses [network, external_process]"
        );
    }
}
