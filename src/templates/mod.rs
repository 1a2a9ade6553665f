//! Versioned template governance
//!
//! Contract and governance records, strict content hashing, the explicit
//! registry, the persisted manifest, catalog loading and the five-pass
//! verifier.

pub mod catalog;
pub mod hashing;
pub mod manifest;
pub mod metadata;
pub mod registry;
pub mod verify;

pub use catalog::{check_recorded_hashes, load_catalog, save_governance_state};
pub use hashing::{compute_code_hash_strict, TemplateDefinition};
pub use manifest::{Manifest, ManifestEntry, ManifestMeta};
pub use metadata::{Capability, TemplateMetadata, TemplateSpec, TemplateStatus, TemplateVersion};
pub use registry::{RegisteredTemplate, TemplateRegistry};
pub use verify::{verify_catalog_parallel, Finding, TemplateVerifier, VerificationReport};
