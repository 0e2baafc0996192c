//! Composite actions: workflows and the iteration constructs.
//!
//! These are actions like any other, registered in an
//! [`ActionTable`](crate::registry::ActionTable), but they drive the executor over
//! nested graphs themselves.

mod iterate;
mod workflow;

pub use iterate::{For, Loop};
pub use workflow::Workflow;

use serde_json::{Value, json};

use crate::{
    model::{ActionMeta, ParameterSpec, ParameterType},
    registry::{ActionTable, InputSetters},
};

/// Reference of the [`Loop`] action.
pub const LOOP_REF: &str = "loop";
/// Reference of the [`For`] action.
pub const FOR_REF: &str = "for";

/// Table holding the built-in container actions (`loop` and `for`).
pub fn builtin_actions() -> ActionTable {
    let mut table = ActionTable::new();
    register_builtins(&mut table);
    table
}

/// Adds the built-in container actions to an existing table.
pub fn register_builtins(table: &mut ActionTable) {
    table.register(loop_meta(), Loop::default, loop_setters());
    table.register(for_meta(), For::default, for_setters());
}

fn loop_meta() -> ActionMeta {
    ActionMeta {
        description: Some("Runs the nested graph once per item of Source".to_string()),
        ..ActionMeta::action(
            LOOP_REF,
            vec![
                ParameterSpec::new("Source", ParameterType::Array).with_description("Items to iterate"),
                ParameterSpec::new("ItemName", ParameterType::String).with_description("Variable receiving the current item"),
            ],
        )
    }
}

fn loop_setters() -> InputSetters<Loop> {
    InputSetters::new()
        .slot("Source", |action: &mut Loop, value| {
            action.source = match value {
                Value::Null => Vec::new(),
                Value::Array(items) => items,
                other => anyhow::bail!("loop source must be an array, got {other}"),
            };
            Ok(())
        })
        .slot("ItemName", |action: &mut Loop, value| {
            action.item_name = item_name(value)?;
            Ok(())
        })
}

fn for_meta() -> ActionMeta {
    ActionMeta {
        description: Some("Runs the nested graph for Count values starting at Start".to_string()),
        ..ActionMeta::action(
            FOR_REF,
            vec![
                ParameterSpec::new("Start", ParameterType::Int).with_default(json!(0)),
                ParameterSpec::new("Count", ParameterType::Int).required(),
                ParameterSpec::new("Step", ParameterType::Int).with_default(json!(1)),
                ParameterSpec::new("ItemName", ParameterType::String),
            ],
        )
    }
}

fn for_setters() -> InputSetters<For> {
    InputSetters::new()
        .slot("Start", |action: &mut For, value| {
            action.start = serde_json::from_value(value)?;
            Ok(())
        })
        .slot("Count", |action: &mut For, value| {
            action.count = serde_json::from_value(value)?;
            Ok(())
        })
        .slot("Step", |action: &mut For, value| {
            action.step = serde_json::from_value(value)?;
            Ok(())
        })
        .slot("ItemName", |action: &mut For, value| {
            action.item_name = item_name(value)?;
            Ok(())
        })
}

fn item_name(value: Value) -> anyhow::Result<String> {
    match value {
        Value::Null => Ok(String::new()),
        Value::String(name) => Ok(name),
        other => anyhow::bail!("item name must be a string, got {other}"),
    }
}
