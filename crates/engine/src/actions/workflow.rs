//! Setup, body and teardown graphs run as one action.

use std::{
    panic::{self, AssertUnwindSafe},
    rc::Rc,
};

use serde_json::Value;
use tracing::debug;

use crate::{
    context::ExecutionContext,
    error::EngineError,
    executor::run_chain,
    model::{ActionResult, ChainGraph},
    registry::Action,
};

/// Runs `setup` then `body` in the context it is given, and `teardown` afterwards no
/// matter how the first two ended. The result is the effective values of the context.
///
/// A fatal error or a panic raised by setup or body is re-raised once teardown ran.
#[derive(Debug, Clone, Default)]
pub struct Workflow {
    pub setup: Option<Rc<ChainGraph>>,
    pub body: Option<Rc<ChainGraph>>,
    pub teardown: Option<Rc<ChainGraph>>,
}

impl Workflow {
    pub fn new(setup: Option<ChainGraph>, body: Option<ChainGraph>, teardown: Option<ChainGraph>) -> Self {
        Self {
            setup: setup.map(Rc::new),
            body: body.map(Rc::new),
            teardown: teardown.map(Rc::new),
        }
    }
}

fn run_optional(graph: Option<&ChainGraph>, context: &ExecutionContext) -> Result<(), EngineError> {
    if let Some(graph) = graph {
        run_chain(graph, context)?;
    }
    Ok(())
}

impl Action for Workflow {
    fn exec(&mut self, context: &ExecutionContext) -> anyhow::Result<ActionResult> {
        let main = panic::catch_unwind(AssertUnwindSafe(|| {
            run_optional(self.setup.as_deref(), context)?;
            run_optional(self.body.as_deref(), context)
        }));

        debug!(depth = context.depth(), "running workflow teardown");
        let teardown = run_optional(self.teardown.as_deref(), context);

        match main {
            Err(payload) => panic::resume_unwind(payload),
            Ok(Err(error)) => return Err(error.into()),
            Ok(Ok(())) => {}
        }
        teardown?;
        Ok(ActionResult::success(Value::Object(context.effective_values())))
    }
}
