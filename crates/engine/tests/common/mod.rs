#![allow(dead_code)]

use std::{cell::Cell, rc::Rc};

use anyhow::anyhow;
use chainflow_engine::{
    Action, ActionMeta, ActionResult, ActionTable, Engine, ExecutionContext, InputSetters, MemoryTrace, ParameterSpec, ParameterType,
    actions::register_builtins,
};
use serde_json::Value;

/// Returns its `value` input.
#[derive(Default)]
pub struct Echo {
    value: Value,
}

impl Action for Echo {
    fn exec(&mut self, _context: &ExecutionContext) -> anyhow::Result<ActionResult> {
        Ok(ActionResult::success(self.value.clone()))
    }
}

/// Always fails.
pub struct Fail;

impl Action for Fail {
    fn exec(&mut self, _context: &ExecutionContext) -> anyhow::Result<ActionResult> {
        Err(anyhow!("step failed on purpose"))
    }
}

/// Counts how many times it ran.
pub struct Counter {
    runs: Rc<Cell<usize>>,
}

impl Action for Counter {
    fn exec(&mut self, _context: &ExecutionContext) -> anyhow::Result<ActionResult> {
        self.runs.set(self.runs.get() + 1);
        Ok(ActionResult::success(Value::from(self.runs.get())))
    }
}

/// Fails until it has run three times.
pub struct Flaky {
    runs: Rc<Cell<usize>>,
}

impl Action for Flaky {
    fn exec(&mut self, _context: &ExecutionContext) -> anyhow::Result<ActionResult> {
        self.runs.set(self.runs.get() + 1);
        if self.runs.get() < 3 {
            return Err(anyhow!("attempt {} failed", self.runs.get()));
        }
        Ok(ActionResult::success(Value::from(self.runs.get())))
    }
}

/// Built-in actions plus `echo`, `fail`, and the `tick` and `flaky` counters sharing `runs`.
pub fn table(runs: &Rc<Cell<usize>>) -> ActionTable {
    let mut table = ActionTable::new();
    register_builtins(&mut table);
    table.register(
        ActionMeta::action("echo", vec![ParameterSpec::new("value", ParameterType::Any)]),
        Echo::default,
        InputSetters::new().slot("value", |echo: &mut Echo, value| {
            echo.value = value;
            Ok(())
        }),
    );
    table.register_with(ActionMeta::action("fail", Vec::new()), || -> Box<dyn Action> { Box::new(Fail) });
    let tick_runs = Rc::clone(runs);
    table.register_with(ActionMeta::action("tick", Vec::new()), move || -> Box<dyn Action> {
        Box::new(Counter {
            runs: Rc::clone(&tick_runs),
        })
    });
    let flaky_runs = Rc::clone(runs);
    table.register_with(ActionMeta::action("flaky", Vec::new()), move || -> Box<dyn Action> {
        Box::new(Flaky {
            runs: Rc::clone(&flaky_runs),
        })
    });
    table
}

pub struct Harness {
    pub engine: Engine,
    pub trace: Rc<MemoryTrace>,
    pub runs: Rc<Cell<usize>>,
}

pub fn harness() -> Harness {
    let runs = Rc::new(Cell::new(0));
    let trace = Rc::new(MemoryTrace::new());
    let engine = Engine::new(Rc::new(table(&runs))).with_trace(trace.clone());
    Harness { engine, trace, runs }
}
