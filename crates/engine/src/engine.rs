//! Engine facade: wires the services a run needs onto a root context.

use std::{fmt, rc::Rc};

use serde_json::{Map, Value};
use tracing::info;

use crate::{
    compiler::CompiledWorkflow,
    context::ExecutionContext,
    error::EngineError,
    evaluator::{ExpressionEvaluator, PathEvaluator},
    executor::{run_chain, run_entry},
    model::{ActionResult, ChainGraph, ValueBinding},
    registry::{ActionEntry, ActionRegistry},
    trace::TraceSink,
};

/// Runs graphs and compiled workflows against one action registry.
///
/// Expressions are resolved with [`PathEvaluator`] unless another evaluator is set.
///
/// ```rust
/// use std::rc::Rc;
///
/// use chainflow_engine::{Engine, actions::builtin_actions, model::{ChainGraph, Step}};
/// use serde_json::{Map, json};
///
/// let engine = Engine::new(Rc::new(builtin_actions()));
/// let graph = ChainGraph::single(Step::new("count", "for").with_input("Count", json!(2)));
/// let outcome = engine.run(&graph, Map::new())?;
/// assert!(outcome.succeeded());
/// assert_eq!(outcome.values()["lastvalue"].as_array().map(Vec::len), Some(2));
/// # Ok::<(), chainflow_engine::EngineError>(())
/// ```
#[derive(Clone)]
pub struct Engine {
    registry: Rc<dyn ActionRegistry>,
    evaluator: Rc<dyn ExpressionEvaluator>,
    trace: Option<Rc<dyn TraceSink>>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine").field("trace", &self.trace.is_some()).finish_non_exhaustive()
    }
}

/// Root context and entry result of a finished run.
#[derive(Debug)]
pub struct RunOutcome {
    pub context: ExecutionContext,
    /// Result of the entry step; `None` when the graph was empty.
    pub result: Option<ActionResult>,
}

impl RunOutcome {
    /// Effective values of the root context after the run.
    pub fn values(&self) -> Map<String, Value> {
        self.context.effective_values()
    }

    /// True unless the entry step failed.
    pub fn succeeded(&self) -> bool {
        self.result.as_ref().is_none_or(ActionResult::is_success)
    }
}

impl Engine {
    pub fn new(registry: Rc<dyn ActionRegistry>) -> Self {
        Self {
            registry,
            evaluator: Rc::new(PathEvaluator),
            trace: None,
        }
    }

    pub fn with_evaluator(mut self, evaluator: Rc<dyn ExpressionEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_trace(mut self, trace: Rc<dyn TraceSink>) -> Self {
        self.trace = Some(trace);
        self
    }

    /// Creates a root context holding `inputs` with the engine services registered on it.
    pub fn root_context(&self, inputs: Map<String, Value>) -> ExecutionContext {
        let context = ExecutionContext::new();
        context.register_service::<dyn ActionRegistry>(Rc::clone(&self.registry));
        context.register_service::<dyn ExpressionEvaluator>(Rc::clone(&self.evaluator));
        if let Some(trace) = &self.trace {
            context.register_service::<dyn TraceSink>(Rc::clone(trace));
        }
        for (name, value) in inputs {
            context.set_input(name, value);
        }
        context
    }

    /// Runs `graph` in a fresh root context seeded with `inputs`.
    pub fn run(&self, graph: &ChainGraph, inputs: Map<String, Value>) -> Result<RunOutcome, EngineError> {
        let context = self.root_context(inputs);
        let result = run_chain(graph, &context)?;
        Ok(RunOutcome { context, result })
    }

    /// Runs a compiled workflow with `inputs` bound against its parameter schema.
    ///
    /// Binding failures and failing graphs are reported in the returned result; only
    /// fatal errors are returned as `Err`. On success the result holds the effective
    /// values of the workflow's context.
    pub fn run_workflow(&self, compiled: &CompiledWorkflow, inputs: Map<String, Value>) -> Result<ActionResult, EngineError> {
        info!(workflow = %compiled.name(), inputs = inputs.len(), "running workflow");
        let context = self.root_context(Map::new());
        let bindings: Vec<ValueBinding> = inputs.into_iter().map(|(name, value)| ValueBinding::literal(name, value)).collect();
        let entry = ActionEntry {
            meta: Rc::new(compiled.meta.clone()),
            action: Box::new(compiled.workflow.clone()),
        };
        let result = run_entry(entry, &bindings, &context)?;
        info!(workflow = %compiled.name(), success = result.is_success(), "workflow finished");
        Ok(result)
    }
}
