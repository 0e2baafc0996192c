//! Branch group selection.

use tracing::{debug, warn};

use crate::{
    context::ExecutionContext,
    error::EngineError,
    evaluator::{ExpressionEvaluator, is_truthy},
    model::{ActionResult, BranchGroup, ChainGraph, Guard, SelectionPolicy, Step},
};

use super::{publish_bookkeeping, run_step};

/// Runs the success or error group of `step`, then its completion group.
pub(super) fn run_branches(graph: &ChainGraph, step: &Step, result: &ActionResult, context: &ExecutionContext) -> Result<(), EngineError> {
    let outcome_group = if result.is_success() { &step.on_success } else { &step.on_errors };
    if let Some(group) = outcome_group {
        run_group(graph, step, group, result, context)?;
    }
    if let Some(group) = &step.on_completed {
        run_group(graph, step, group, result, context)?;
    }
    Ok(())
}

/// Runs the guarded steps of a group in declared order.
///
/// The bookkeeping variables are reset to the triggering result before every guard.
fn run_group(
    graph: &ChainGraph,
    step: &Step,
    group: &BranchGroup,
    trigger: &ActionResult,
    context: &ExecutionContext,
) -> Result<(), EngineError> {
    debug!(step = %step.name, policy = %group.policy, guards = group.steps.len(), "running branch group");
    for guarded in &group.steps {
        publish_bookkeeping(trigger, context);
        if !guard_passes(&guarded.guard, context)? {
            continue;
        }
        run_step(graph, guarded.target, context)?;
        if group.policy == SelectionPolicy::Single {
            break;
        }
    }
    Ok(())
}

fn guard_passes(guard: &Guard, context: &ExecutionContext) -> Result<bool, EngineError> {
    match guard {
        Guard::Always => Ok(true),
        Guard::Never => Ok(false),
        Guard::Predicate(predicate) => Ok(predicate(context)),
        Guard::Expression(expression) => {
            let evaluator = context
                .get_service::<dyn ExpressionEvaluator>()
                .ok_or(EngineError::MissingService("ExpressionEvaluator"))?;
            match evaluator.evaluate(expression, context) {
                Ok(value) => Ok(is_truthy(&value)),
                Err(error) => {
                    warn!(expression = %expression, error = %format!("{error:#}"), "guard evaluation failed");
                    Ok(false)
                }
            }
        }
    }
}
