//! Binding and running one action with its failures contained.

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
};

use indexmap::IndexMap;
use serde_json::Value;
use tracing::warn;

use crate::{
    binder::{apply_inputs, resolve_inputs},
    context::ExecutionContext,
    error::EngineError,
    model::{ActionKind, ActionMeta, ActionResult, ValueBinding},
    registry::Action,
};

/// Binds `inputs` and runs `action`.
///
/// Workflow-kind actions run in a child context of `context` that is released when
/// the action returns. Returns the bound values next to the result; they are empty
/// when binding failed.
pub(super) fn execute(
    meta: &ActionMeta,
    action: &mut dyn Action,
    inputs: &[ValueBinding],
    context: &ExecutionContext,
) -> Result<(ActionResult, IndexMap<String, Value>), EngineError> {
    let values = match resolve_inputs(meta, inputs, context) {
        Ok(values) => values,
        Err(error) if error.is_fatal() => return Err(error),
        Err(error) => {
            warn!(action_ref = %meta.action_ref, error = %error, "input binding failed");
            return Ok((ActionResult::failure(error), IndexMap::new()));
        }
    };
    let result = match meta.kind {
        ActionKind::Workflow => {
            let child = context.begin_context();
            bind_and_run(meta, action, &values, &child)?
        }
        ActionKind::Action => bind_and_run(meta, action, &values, context)?,
    };
    Ok((result, values))
}

fn bind_and_run(
    meta: &ActionMeta,
    action: &mut dyn Action,
    values: &IndexMap<String, Value>,
    context: &ExecutionContext,
) -> Result<ActionResult, EngineError> {
    if let Err(error) = apply_inputs(meta, values, action, context) {
        warn!(action_ref = %meta.action_ref, error = %error, "input injection failed");
        return Ok(ActionResult::failure(error));
    }
    match panic::catch_unwind(AssertUnwindSafe(|| action.exec(context))) {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(error)) => match error.downcast::<EngineError>() {
            Ok(engine_error) if engine_error.is_fatal() => Err(engine_error),
            Ok(engine_error) => Ok(ActionResult::failure(engine_error)),
            Err(error) => Ok(ActionResult::failure(error)),
        },
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!(action_ref = %meta.action_ref, panic = %message, "action panicked");
            Ok(ActionResult::failure(EngineError::ActionPanicked(message)))
        }
    }
}

/// Extracts the message of a panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
