//! Shared type definitions for chainflow workflow documents.
//!
//! The engine compiles these documents into executable chain graphs; the CLI
//! and any authoring tooling only need this crate to read, write, and lint them.

pub mod workflow;

pub use workflow::validation::document_issues;
pub use workflow::{BranchGroupDocument, BranchTaskDocument, ChainDocument, ParameterDocument, StepDocument, WorkflowDocument};
