//! # Chain graph model
//!
//! The data structures the executor walks: steps, branch groups, guards, value
//! bindings and the parameter schema of actions.
//!
//! ## Graph representation
//!
//! Step graphs may be cyclic (a retry branch pointing back at the failing step, or a
//! step that references itself). Steps therefore live in an arena, [`ChainGraph`], and
//! branches refer to their targets by [`StepId`]. A step reached from several branches
//! is a single node in the arena.
//!
//! ```rust
//! use chainflow_engine::model::{BranchGroup, GraphBuilder, GuardedStep, Step};
//!
//! let mut builder = GraphBuilder::new();
//! let deploy = builder.add_step(Step::new("deploy", "apps:deploy"));
//! let notify = builder.add_step(Step::new("notify", "slack:post"));
//! if let Some(step) = builder.step_mut(deploy) {
//!     step.on_completed = Some(BranchGroup::multiple(vec![GuardedStep::always(notify)]));
//! }
//! let graph = builder.build(deploy);
//! assert_eq!(graph.len(), 2);
//! assert_eq!(graph.entry_step().map(|step| step.name.as_str()), Some("deploy"));
//! ```

use std::{collections::HashMap, fmt, rc::Rc, sync::Arc};

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Value, json};

use crate::context::ExecutionContext;

static EXPRESSION_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\$\{(?P<exp>.+)\}").expect("expression regex should compile"));

/// Index of a step inside the [`ChainGraph`] that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StepId(pub usize);

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where the value of an input or output slot comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueSource {
    /// A fixed value carried as-is.
    Literal(Value),
    /// The body of a `${...}` expression, evaluated against the context at run time.
    Expression(String),
}

/// A named input or output slot and its value source.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueBinding {
    pub name: String,
    pub source: ValueSource,
}

impl ValueBinding {
    pub fn literal(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            source: ValueSource::Literal(value),
        }
    }

    pub fn expression(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: ValueSource::Expression(expression.into()),
        }
    }
}

/// Builds a value binding from a raw document value.
///
/// Strings containing `${...}` become expressions carrying the text between the first
/// `${` and the last `}`; everything else is kept as a literal.
pub fn parse_value(name: &str, raw: &Value) -> ValueBinding {
    if let Value::String(text) = raw
        && let Some(captures) = EXPRESSION_PATTERN.captures(text)
        && let Some(expression) = captures.name("exp")
    {
        return ValueBinding::expression(name, expression.as_str());
    }
    ValueBinding::literal(name, raw.clone())
}

/// Predicate deciding whether a guarded step runs.
#[derive(Clone, Default)]
pub enum Guard {
    #[default]
    Always,
    Never,
    /// Evaluated through the registered expression evaluator and tested for truthiness.
    Expression(String),
    /// Host-provided predicate for programmatically assembled graphs.
    Predicate(Rc<dyn Fn(&ExecutionContext) -> bool>),
}

impl Guard {
    pub fn predicate(predicate: impl Fn(&ExecutionContext) -> bool + 'static) -> Self {
        Guard::Predicate(Rc::new(predicate))
    }
}

impl fmt::Debug for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Guard::Always => f.write_str("Always"),
            Guard::Never => f.write_str("Never"),
            Guard::Expression(expression) => f.debug_tuple("Expression").field(expression).finish(),
            Guard::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// How many satisfied guards of a branch group run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionPolicy {
    /// Stop after the first guard that passes.
    Single,
    /// Run every guard that passes, in order.
    #[default]
    Multiple,
}

impl fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionPolicy::Single => f.write_str("single"),
            SelectionPolicy::Multiple => f.write_str("multiple"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GuardedStep {
    pub guard: Guard,
    pub target: StepId,
}

impl GuardedStep {
    pub fn new(guard: Guard, target: StepId) -> Self {
        Self { guard, target }
    }

    pub fn always(target: StepId) -> Self {
        Self::new(Guard::Always, target)
    }
}

/// Ordered guarded steps run after a step completes.
#[derive(Debug, Clone, Default)]
pub struct BranchGroup {
    pub policy: SelectionPolicy,
    pub steps: Vec<GuardedStep>,
}

impl BranchGroup {
    pub fn single(steps: Vec<GuardedStep>) -> Self {
        Self {
            policy: SelectionPolicy::Single,
            steps,
        }
    }

    pub fn multiple(steps: Vec<GuardedStep>) -> Self {
        Self {
            policy: SelectionPolicy::Multiple,
            steps,
        }
    }
}

/// A named reference to an action plus its bindings and branch groups.
#[derive(Debug, Clone)]
pub struct Step {
    pub name: String,
    pub action_ref: String,
    pub inputs: Vec<ValueBinding>,
    pub outputs: Vec<ValueBinding>,
    /// Nested graph handed to container actions (`loop`, `for`, workflows).
    pub sub_entry: Option<Rc<ChainGraph>>,
    pub on_success: Option<BranchGroup>,
    pub on_errors: Option<BranchGroup>,
    pub on_completed: Option<BranchGroup>,
}

impl Step {
    pub fn new(name: impl Into<String>, action_ref: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            action_ref: action_ref.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            sub_entry: None,
            on_success: None,
            on_errors: None,
            on_completed: None,
        }
    }

    /// Adds an input binding parsed from a raw value (`"${...}"` strings become expressions).
    pub fn with_input(mut self, name: &str, raw: Value) -> Self {
        self.inputs.push(parse_value(name, &raw));
        self
    }

    /// Adds an output binding parsed from a raw value.
    pub fn with_output(mut self, name: &str, raw: Value) -> Self {
        self.outputs.push(parse_value(name, &raw));
        self
    }

    pub fn with_sub_entry(mut self, graph: ChainGraph) -> Self {
        self.sub_entry = Some(Rc::new(graph));
        self
    }
}

/// Arena of steps plus the entry point of the graph.
#[derive(Debug, Clone)]
pub struct ChainGraph {
    steps: Vec<Step>,
    entry: StepId,
}

impl ChainGraph {
    /// A graph made of a single step.
    pub fn single(step: Step) -> Self {
        Self {
            steps: vec![step],
            entry: StepId(0),
        }
    }

    pub fn entry(&self) -> StepId {
        self.entry
    }

    pub fn entry_step(&self) -> Option<&Step> {
        self.step(self.entry)
    }

    pub fn step(&self, id: StepId) -> Option<&Step> {
        self.steps.get(id.0)
    }

    pub fn steps(&self) -> impl Iterator<Item = (StepId, &Step)> {
        self.steps.iter().enumerate().map(|(index, step)| (StepId(index), step))
    }

    /// Finds the first step with the given name.
    pub fn find(&self, name: &str) -> Option<StepId> {
        self.steps.iter().position(|step| step.name == name).map(StepId)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Incremental construction of a [`ChainGraph`].
#[derive(Debug, Default)]
pub struct GraphBuilder {
    steps: Vec<Step>,
    names: HashMap<String, StepId>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a step and returns its id. Later steps with the same name do not replace
    /// the name index entry of the first one.
    pub fn add_step(&mut self, step: Step) -> StepId {
        let id = StepId(self.steps.len());
        self.names.entry(step.name.clone()).or_insert(id);
        self.steps.push(step);
        id
    }

    pub fn step_mut(&mut self, id: StepId) -> Option<&mut Step> {
        self.steps.get_mut(id.0)
    }

    pub fn id_of(&self, name: &str) -> Option<StepId> {
        self.names.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn build(self, entry: StepId) -> ChainGraph {
        ChainGraph { steps: self.steps, entry }
    }
}

/// Whether an action is a leaf or a container running in its own child context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActionKind {
    /// Bound through the action's input setters.
    #[default]
    Action,
    /// Bound by writing inputs into a fresh child context.
    Workflow,
}

/// Declared type of an action parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParameterType {
    Int,
    String,
    Double,
    Float,
    Decimal,
    DateTime,
    TimeSpan,
    Bool,
    Array,
    Object,
    #[default]
    Any,
}

impl ParameterType {
    /// Parses the type names accepted in workflow documents. Matching ignores case.
    pub fn from_name(name: &str) -> Option<Self> {
        let parameter_type = match name.trim().to_ascii_lowercase().as_str() {
            "int" | "integer" | "int32" | "int64" | "long" => ParameterType::Int,
            "string" | "str" => ParameterType::String,
            "double" | "number" => ParameterType::Double,
            "float" | "single" => ParameterType::Float,
            "decimal" => ParameterType::Decimal,
            "datetime" | "date" => ParameterType::DateTime,
            "timespan" | "duration" => ParameterType::TimeSpan,
            "bool" | "boolean" => ParameterType::Bool,
            "array" | "list" => ParameterType::Array,
            "object" | "map" => ParameterType::Object,
            "any" => ParameterType::Any,
            _ => return None,
        };
        Some(parameter_type)
    }

    pub fn name(self) -> &'static str {
        match self {
            ParameterType::Int => "int",
            ParameterType::String => "string",
            ParameterType::Double => "double",
            ParameterType::Float => "float",
            ParameterType::Decimal => "decimal",
            ParameterType::DateTime => "datetime",
            ParameterType::TimeSpan => "timespan",
            ParameterType::Bool => "bool",
            ParameterType::Array => "array",
            ParameterType::Object => "object",
            ParameterType::Any => "any",
        }
    }
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One declared parameter of an action.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParameterSpec {
    pub name: String,
    pub ty: ParameterType,
    pub default: Option<Value>,
    pub required: bool,
    pub description: Option<String>,
    /// Input slot name when it differs from the parameter name.
    pub alias: Option<String>,
}

impl ParameterSpec {
    pub fn new(name: impl Into<String>, ty: ParameterType) -> Self {
        Self {
            name: name.into(),
            ty,
            ..Default::default()
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Slot the value is injected into on leaf actions.
    pub fn slot(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// Parameter schema and descriptive metadata of a registered action.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ActionMeta {
    pub action_ref: String,
    pub kind: ActionKind,
    pub parameters: Vec<ParameterSpec>,
    pub description: Option<String>,
    pub display_format: Option<String>,
}

impl ActionMeta {
    pub fn action(action_ref: impl Into<String>, parameters: Vec<ParameterSpec>) -> Self {
        Self {
            action_ref: action_ref.into(),
            kind: ActionKind::Action,
            parameters,
            ..Default::default()
        }
    }

    pub fn workflow(action_ref: impl Into<String>, parameters: Vec<ParameterSpec>) -> Self {
        Self {
            action_ref: action_ref.into(),
            kind: ActionKind::Workflow,
            parameters,
            ..Default::default()
        }
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|parameter| parameter.name == name)
    }
}

/// Outcome of executing one action.
///
/// Success is derived from the absence of an error.
#[derive(Debug, Clone, Default)]
pub struct ActionResult {
    pub result: Value,
    pub error: Option<Arc<anyhow::Error>>,
}

impl ActionResult {
    pub fn success(result: Value) -> Self {
        Self { result, error: None }
    }

    pub fn failure(error: impl Into<anyhow::Error>) -> Self {
        Self {
            result: Value::Null,
            error: Some(Arc::new(error.into())),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Error message including its cause chain, if the action failed.
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(|error| format!("{error:#}"))
    }

    /// JSON view published as the `last` variable.
    pub fn to_value(&self) -> Value {
        json!({
            "result": self.result,
            "error": self.error_message(),
            "is_success": self.is_success(),
        })
    }
}
