//! Schema governance
//!
//! Tokenizer, capability extraction, the additive-only linter and
//! inheritance planning for the declarative graph schema.

pub mod capabilities;
pub mod diff;
pub mod hierarchy;
pub mod lexer;

pub use capabilities::CapabilitySnapshot;
pub use diff::{AdditiveLinter, LintReport};
pub use hierarchy::{transitive_subtypes, RedeclarationPlan};
