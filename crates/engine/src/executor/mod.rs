//! Chain executor: runs a step, publishes its result, then walks its branch groups.
//!
//! Each step goes through resolving, binding, running, publishing and branching.
//! Nested steps run by plain recursion on the call stack; nothing is persisted.
//!
//! - `invoke` binds inputs and runs an action with failures contained in an
//!   [`ActionResult`](crate::model::ActionResult)
//! - `branching` selects and runs the guarded steps of a branch group
//!
//! The action registry and the expression evaluator are looked up as services on the
//! context chain, so nested frames may override either.

use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    binder::evaluate_binding,
    context::ExecutionContext,
    error::EngineError,
    model::{ActionResult, ChainGraph, Step, StepId, ValueBinding},
    registry::{ActionEntry, ActionRegistry},
    trace::{TraceRecord, TraceSink},
};

mod branching;
mod invoke;

/// Variable holding the JSON view of the last result.
pub const LAST: &str = "last";
/// Variable holding the value of the last result.
pub const LAST_VALUE: &str = "lastvalue";
/// Variable holding the error message of the last result, or `null`.
pub const LAST_ERROR: &str = "lasterror";

/// Runs a graph from its entry step.
///
/// Returns the result of the entry step, or `None` for an empty graph.
pub fn run_chain(graph: &ChainGraph, context: &ExecutionContext) -> Result<Option<ActionResult>, EngineError> {
    if graph.is_empty() {
        return Ok(None);
    }
    run_step(graph, graph.entry(), context).map(Some)
}

/// Runs one step of `graph` and every branch it triggers.
///
/// Only fatal errors are returned; binding failures and action failures are reported
/// through the returned result after the error branches ran.
pub fn run_step(graph: &ChainGraph, id: StepId, context: &ExecutionContext) -> Result<ActionResult, EngineError> {
    let step = graph.step(id).ok_or_else(|| EngineError::UnknownStep(id.to_string()))?;
    let ActionEntry { meta, mut action } = resolve(&step.action_ref, context)?;
    debug!(step = %step.name, action_ref = %step.action_ref, depth = context.depth(), "resolved step action");

    if let Some(sub_entry) = &step.sub_entry
        && !action.set_sub_entry(Rc::clone(sub_entry))
    {
        debug!(step = %step.name, action_ref = %step.action_ref, "action ignores the nested graph of the step");
    }

    let (result, inputs) = invoke::execute(&meta, action.as_mut(), &step.inputs, context)?;
    if let Some(message) = result.error_message() {
        warn!(step = %step.name, action_ref = %step.action_ref, error = %message, "step failed");
    }

    let outputs = publish(step, &result, context)?;
    debug!(step = %step.name, success = result.is_success(), "step finished");
    record_trace(step, &result, inputs, outputs, context);

    branching::run_branches(graph, step, &result, context)?;
    Ok(result)
}

/// Resolves and runs a single action with declared inputs, without publishing or branching.
pub fn run_action(reference: &str, inputs: &[ValueBinding], context: &ExecutionContext) -> Result<ActionResult, EngineError> {
    run_entry(resolve(reference, context)?, inputs, context)
}

/// Binds and runs an already resolved action with the same containment as a step.
pub fn run_entry(entry: ActionEntry, inputs: &[ValueBinding], context: &ExecutionContext) -> Result<ActionResult, EngineError> {
    let ActionEntry { meta, mut action } = entry;
    let (result, _) = invoke::execute(&meta, action.as_mut(), inputs, context)?;
    Ok(result)
}

fn resolve(reference: &str, context: &ExecutionContext) -> Result<ActionEntry, EngineError> {
    let registry = context
        .get_service::<dyn ActionRegistry>()
        .ok_or(EngineError::MissingService("ActionRegistry"))?;
    registry.get_action(reference)
}

/// Writes `last`, `lastvalue` and `lasterror` for `result` into the context variables.
pub(crate) fn publish_bookkeeping(result: &ActionResult, context: &ExecutionContext) {
    context.set_var(LAST, result.to_value());
    context.set_var(LAST_VALUE, result.result.clone());
    context.set_var(LAST_ERROR, result.error_message().map(Value::String).unwrap_or(Value::Null));
}

fn publish(step: &Step, result: &ActionResult, context: &ExecutionContext) -> Result<IndexMap<String, Value>, EngineError> {
    publish_bookkeeping(result, context);
    let mut outputs = IndexMap::with_capacity(step.outputs.len());
    for output in &step.outputs {
        match evaluate_binding(output, context) {
            Ok(value) => {
                context.set_var(output.name.clone(), value.clone());
                outputs.insert(output.name.clone(), value);
            }
            Err(error) if error.is_fatal() => return Err(error),
            Err(error) => warn!(step = %step.name, output = %output.name, error = %error, "output not published"),
        }
    }
    Ok(outputs)
}

fn record_trace(
    step: &Step,
    result: &ActionResult,
    inputs: IndexMap<String, Value>,
    outputs: IndexMap<String, Value>,
    context: &ExecutionContext,
) {
    let Some(sink) = context.get_service::<dyn TraceSink>() else {
        return;
    };
    sink.record(&TraceRecord {
        depth: context.depth(),
        step: step.name.clone(),
        action_ref: step.action_ref.clone(),
        inputs,
        outputs,
        success: result.is_success(),
        error: result.error_message(),
    });
}
