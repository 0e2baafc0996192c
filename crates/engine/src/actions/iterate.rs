//! Iteration constructs: `loop` over a sequence and `for` over an arithmetic progression.

use std::rc::Rc;

use serde_json::Value;
use tracing::debug;

use crate::{
    context::ExecutionContext,
    executor::run_chain,
    model::{ActionResult, ChainGraph},
    registry::Action,
};

/// Runs the nested graph once per item, each time in a fresh child context.
///
/// The result is one snapshot of the calling context's effective values per item.
#[derive(Debug, Clone, Default)]
pub struct Loop {
    pub source: Vec<Value>,
    /// Child variable receiving the current item. Empty means the item is not bound.
    pub item_name: String,
    pub entry: Option<Rc<ChainGraph>>,
}

impl Action for Loop {
    fn exec(&mut self, context: &ExecutionContext) -> anyhow::Result<ActionResult> {
        let snapshots = iterate(self.source.iter().cloned().map(Ok), &self.item_name, self.entry.as_deref(), context)?;
        Ok(ActionResult::success(Value::Array(snapshots)))
    }

    fn set_sub_entry(&mut self, entry: Rc<ChainGraph>) -> bool {
        self.entry = Some(entry);
        true
    }
}

/// Runs the nested graph for `count` values `start`, `start + step`, and so on.
#[derive(Debug, Clone, Default)]
pub struct For {
    pub start: i64,
    pub count: i64,
    pub step: i64,
    pub item_name: String,
    pub entry: Option<Rc<ChainGraph>>,
}

impl For {
    /// The values the loop iterates over, produced one at a time. Empty when `count`
    /// is not positive. A value that overflows `i64` is an error at its index.
    pub fn values(&self) -> impl Iterator<Item = anyhow::Result<i64>> + '_ {
        (0..self.count.max(0)).map(move |index| {
            index
                .checked_mul(self.step)
                .and_then(|offset| self.start.checked_add(offset))
                .ok_or_else(|| anyhow::anyhow!("for value at index {index} overflows"))
        })
    }
}

impl Action for For {
    fn exec(&mut self, context: &ExecutionContext) -> anyhow::Result<ActionResult> {
        let values = self.values().map(|value| value.map(Value::from));
        let snapshots = iterate(values, &self.item_name, self.entry.as_deref(), context)?;
        Ok(ActionResult::success(Value::Array(snapshots)))
    }

    fn set_sub_entry(&mut self, entry: Rc<ChainGraph>) -> bool {
        self.entry = Some(entry);
        true
    }
}

fn iterate(
    items: impl IntoIterator<Item = anyhow::Result<Value>>,
    item_name: &str,
    entry: Option<&ChainGraph>,
    context: &ExecutionContext,
) -> anyhow::Result<Vec<Value>> {
    let mut snapshots = Vec::new();
    for (index, item) in items.into_iter().enumerate() {
        let item = item?;
        debug!(index, depth = context.depth(), item_name, "loop iteration");
        let child = context.begin_context();
        if !item_name.is_empty() {
            child.set_var(item_name, item);
        }
        if let Some(entry) = entry {
            run_chain(entry, &child)?;
        }
        snapshots.push(Value::Object(context.effective_values()));
    }
    Ok(snapshots)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn for_values_form_an_arithmetic_progression() {
        let counter = For {
            start: 0,
            count: 3,
            step: 2,
            ..Default::default()
        };
        assert_eq!(counter.values().collect::<anyhow::Result<Vec<_>>>().unwrap(), vec![0, 2, 4]);

        let down = For {
            start: 10,
            count: 3,
            step: -5,
            ..Default::default()
        };
        assert_eq!(down.values().collect::<anyhow::Result<Vec<_>>>().unwrap(), vec![10, 5, 0]);
    }

    #[test]
    fn non_positive_count_yields_nothing() {
        for count in [0, -4] {
            let counter = For {
                count,
                step: 1,
                ..Default::default()
            };
            assert_eq!(counter.values().count(), 0);
        }
    }

    #[test]
    fn overflowing_progression_is_an_error() {
        let counter = For {
            start: i64::MAX,
            count: 2,
            step: 1,
            ..Default::default()
        };
        let values: Vec<_> = counter.values().collect();
        assert_eq!(values[0].as_ref().ok(), Some(&i64::MAX));
        assert!(values[1].is_err());
    }

    #[test]
    fn huge_counts_are_generated_lazily() {
        let counter = For {
            count: i64::MAX,
            step: 3,
            ..Default::default()
        };
        let first: Vec<i64> = counter.values().take(3).map(Result::unwrap).collect();
        assert_eq!(first, vec![0, 3, 6]);
    }

    #[test]
    fn overflow_stops_the_loop_after_the_valid_iterations() {
        let context = ExecutionContext::new();
        let mut action = For {
            start: i64::MAX - 1,
            count: 3,
            step: 1,
            ..Default::default()
        };
        let error = action.exec(&context).unwrap_err();
        assert!(error.to_string().contains("index 2 overflows"));
        assert_eq!(context.child_count(), 0);
    }

    #[test]
    fn loop_without_entry_still_snapshots_each_item() {
        let context = ExecutionContext::new();
        context.set_input("region", Value::from("eu"));
        let mut action = Loop {
            source: vec![Value::from(1), Value::from(2)],
            item_name: "item".to_string(),
            entry: None,
        };
        let result = action.exec(&context).unwrap();
        let snapshots = result.result.as_array().cloned().unwrap_or_default();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0]["region"], Value::from("eu"));
        assert!(snapshots[0].get("item").is_none());
        assert_eq!(context.child_count(), 0);
    }
}
