//! Strongly typed schema for declarative workflow documents.
//!
//! A document names a workflow, declares its parameter schema, and carries up to
//! three sub-graphs (`setup`, `body`, `teardown`). Each sub-graph is a map of named
//! step descriptors plus the name of its entry step; steps reference each other by
//! name through their `onsuccess`, `onerror`, and `oncompleted` branch groups.
//!
//! Maps use `IndexMap` so that authoring order survives a round trip and
//! diagnostics are reported in the order a reader sees them.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub mod validation;

/// Branch group marker selecting first-match semantics.
pub const SINGLE_KIND: &str = "single";

/// Top-level workflow document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkflowDocument {
    /// Workflow name; doubles as the action reference when the compiled workflow is registered.
    #[serde(default)]
    pub name: String,
    /// Optional descriptive copy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Optional display format hint for hosts rendering the workflow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub displayformat: Option<String>,
    /// Parameter schema keyed by parameter name, preserving author order.
    #[serde(default)]
    pub parameters: IndexMap<String, ParameterDocument>,
    /// Graph that runs before the body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup: Option<ChainDocument>,
    /// Main graph.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<ChainDocument>,
    /// Graph that always runs last.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teardown: Option<ChainDocument>,
}

/// Declares a single workflow parameter.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ParameterDocument {
    /// Type name (`int`, `string`, `double`, `float`, `decimal`, `datetime`, `timespan`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
    /// Value used when the caller does not bind the parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<JsonValue>,
    /// Whether binding fails when no value and no default exist.
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A named step graph: an entry step plus the steps it can reach.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChainDocument {
    /// Name of the first step to run. Empty or absent means the graph is empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,
    /// Step descriptors keyed by step name.
    #[serde(default)]
    pub actions: IndexMap<String, StepDocument>,
}

/// Describes one step of a graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StepDocument {
    /// Action reference resolved through the action registry.
    #[serde(default)]
    pub r#type: String,
    /// Input values keyed by parameter name. Strings of the form `${...}` are expressions.
    #[serde(default)]
    pub input: IndexMap<String, JsonValue>,
    /// Output values published into the context after the step runs.
    #[serde(default)]
    pub output: IndexMap<String, JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub onsuccess: Option<BranchGroupDocument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub onerror: Option<BranchGroupDocument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oncompleted: Option<BranchGroupDocument>,
    /// Entry of the nested graph handed to container actions such as `loop` and `for`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,
    /// Steps of the nested graph. Names here are scoped to the nested graph.
    #[serde(default)]
    pub actions: IndexMap<String, StepDocument>,
}

impl StepDocument {
    /// Returns the nested graph declared on this step, if any.
    pub fn nested_chain(&self) -> Option<ChainDocument> {
        let entry = self.entry.as_deref().filter(|entry| !entry.trim().is_empty())?;
        Some(ChainDocument {
            entry: Some(entry.to_string()),
            actions: self.actions.clone(),
        })
    }

    /// Iterates over every branch group declared on the step.
    pub fn branch_groups(&self) -> impl Iterator<Item = &BranchGroupDocument> {
        [&self.onsuccess, &self.onerror, &self.oncompleted].into_iter().flatten()
    }
}

/// Ordered set of guarded follow-up steps.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BranchGroupDocument {
    /// `single` stops after the first passing guard; anything else runs every passing guard.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub tasks: Vec<BranchTaskDocument>,
}

impl BranchGroupDocument {
    /// Returns true when the group uses first-match semantics.
    pub fn is_single(&self) -> bool {
        self.kind.as_deref().map(str::trim) == Some(SINGLE_KIND)
    }
}

/// A guarded reference to another step in the same graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BranchTaskDocument {
    /// Guard expression; absent means the task always runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub switch: Option<String>,
    /// Name of the step to run.
    pub name: String,
}
