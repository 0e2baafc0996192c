//! Expression evaluation seam.
//!
//! Value expressions (`${...}` bindings) and string guards are handed to an
//! [`ExpressionEvaluator`] registered as a service on the execution context. Two
//! evaluators ship with the engine:
//!
//! - [`NullEvaluator`] resolves every expression to `null`.
//! - [`PathEvaluator`] resolves dotted paths such as `customer.address.city` or
//!   `items.0` (also `items[0]`) against the visible context values, with an optional
//!   leading `!` that negates the truthiness of the result. There are no operators.

use serde_json::Value;

use crate::context::ExecutionContext;

/// Evaluates expression bodies against an execution context.
pub trait ExpressionEvaluator {
    fn evaluate(&self, expression: &str, context: &ExecutionContext) -> anyhow::Result<Value>;
}

/// Evaluator that knows no expressions: every expression evaluates to `null`.
///
/// `${...}` bindings therefore bind `null`, and expression guards never pass
/// because `null` is falsy. Only `Always` guards (blank or `true`) still fire.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEvaluator;

impl ExpressionEvaluator for NullEvaluator {
    fn evaluate(&self, _expression: &str, _context: &ExecutionContext) -> anyhow::Result<Value> {
        Ok(Value::Null)
    }
}

/// Resolves dotted paths against [`ExecutionContext::lookup`].
#[derive(Debug, Default, Clone, Copy)]
pub struct PathEvaluator;

impl ExpressionEvaluator for PathEvaluator {
    fn evaluate(&self, expression: &str, context: &ExecutionContext) -> anyhow::Result<Value> {
        let trimmed = expression.trim();
        if let Some(negated) = trimmed.strip_prefix('!') {
            let value = self.evaluate(negated, context)?;
            return Ok(Value::Bool(!is_truthy(&value)));
        }
        if trimmed.is_empty() {
            anyhow::bail!("empty expression");
        }
        Ok(resolve_path(trimmed, context).unwrap_or(Value::Null))
    }
}

fn resolve_path(path: &str, context: &ExecutionContext) -> Option<Value> {
    let mut segments = path.split('.').filter(|segment| !segment.is_empty());
    let (root_key, root_indices) = split_indices(segments.next()?);
    let root = context.lookup(root_key)?;
    let mut current = &root;
    for index in root_indices {
        current = current.get(index)?;
    }
    for segment in segments {
        let (key, indices) = split_indices(segment);
        if !key.is_empty() {
            current = match current {
                Value::Array(items) => items.get(key.parse::<usize>().ok()?)?,
                other => other.get(key)?,
            };
        }
        for index in indices {
            current = current.get(index)?;
        }
    }
    Some(current.clone())
}

/// Splits `name[1][2]` into `("name", [1, 2])`.
fn split_indices(segment: &str) -> (&str, Vec<usize>) {
    let Some(open) = segment.find('[') else {
        return (segment, Vec::new());
    };
    let indices = segment[open..]
        .split('[')
        .filter_map(|part| part.strip_suffix(']'))
        .filter_map(|part| part.trim().parse::<usize>().ok())
        .collect();
    (&segment[..open], indices)
}

/// Truthiness used by guards: `null`, `false`, `0`, `""` and empty collections are false.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
