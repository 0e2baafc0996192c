//! # Chainflow Engine
//!
//! Runs graphs of named steps ("action chains") with branch-based control flow,
//! nested sub-workflows, iteration constructs and hierarchical variable scoping.
//! Graphs are either assembled in code with [`model::GraphBuilder`] or compiled from
//! a declarative YAML/JSON document by [`compiler::GraphCompiler`].
//!
//! ## Architecture
//!
//! - **`context`**: scoped tree of inputs, variables and services
//! - **`model`**: steps, branch groups, guards, value bindings and action schemas
//! - **`binder`**: resolves declared inputs against an action schema with type coercion
//! - **`executor`**: runs steps, publishes results and walks branch groups
//! - **`actions`**: composite actions (`Workflow`, `Loop`, `For`)
//! - **`compiler`**: cycle-safe compilation of workflow documents
//! - **`registry`**: action registration table and the `Action` trait
//! - **`evaluator`**: expression evaluation seam
//! - **`trace`**: per-step execution records
//!
//! ## Usage
//!
//! ```rust
//! use std::rc::Rc;
//!
//! use chainflow_engine::{Engine, GraphCompiler, actions::builtin_actions, parse_workflow_str};
//! use serde_json::Map;
//!
//! let document = parse_workflow_str(r#"
//! name: countdown
//! body:
//!   entry: count
//!   actions:
//!     count:
//!       type: for
//!       input: { Start: 3, Count: 3, Step: -1, ItemName: n }
//! "#)?;
//! let compiled = GraphCompiler::new().compile(&document)?;
//! let engine = Engine::new(Rc::new(builtin_actions()));
//! let result = engine.run_workflow(&compiled, Map::new())?;
//! assert!(result.is_success());
//! # Ok::<(), chainflow_engine::EngineError>(())
//! ```

use std::{fs, path::Path};

pub use chainflow_types::{self as types, WorkflowDocument};

pub mod actions;
pub mod binder;
pub mod compiler;
pub mod context;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod model;
pub mod registry;
pub mod trace;

pub use compiler::{CompiledWorkflow, GraphCompiler, TypeResolver};
pub use context::{ContextScope, ExecutionContext};
pub use engine::{Engine, RunOutcome};
pub use error::EngineError;
pub use evaluator::{ExpressionEvaluator, NullEvaluator, PathEvaluator};
pub use executor::{run_action, run_chain, run_step};
pub use model::{ActionKind, ActionMeta, ActionResult, ChainGraph, ParameterSpec, ParameterType, Step};
pub use registry::{Action, ActionEntry, ActionRegistry, ActionTable, InputSetters};
pub use trace::{MemoryTrace, TraceRecord, TraceSink};

/// Loads a workflow document from disk.
///
/// Files with a `.json` extension are parsed as JSON; everything else is parsed as
/// YAML, which also accepts JSON content.
pub fn load_workflow_file(file_path: impl AsRef<Path>) -> Result<WorkflowDocument, EngineError> {
    let file_path = file_path.as_ref();
    let content = fs::read_to_string(file_path)
        .map_err(|error| EngineError::Document(format!("failed to read workflow file {}: {error}", file_path.display())))?;
    let is_json = file_path
        .extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| extension.eq_ignore_ascii_case("json"));
    if is_json {
        return serde_json::from_str(&content).map_err(|error| EngineError::Document(format!("{}: {error}", file_path.display())));
    }
    serde_yaml::from_str(&content).map_err(|error| EngineError::Document(format!("{}: {error}", file_path.display())))
}

/// Parses a workflow document from YAML or JSON text.
pub fn parse_workflow_str(content: &str) -> Result<WorkflowDocument, EngineError> {
    serde_yaml::from_str(content).map_err(|error| EngineError::Document(error.to_string()))
}
