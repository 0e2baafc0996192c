//! # Graph compiler
//!
//! Turns a declarative [`WorkflowDocument`] into executable [`ChainGraph`]s.
//!
//! Steps are compiled lazily from the entry of each graph by following branch
//! references, so steps nothing reaches are not part of the result. A memo from step
//! name to [`StepId`] is consulted before a step is expanded and filled in before its
//! branch groups are compiled; a step referenced from several places, including
//! references back to itself or to an ancestor, is compiled to a single node.
//! Every nested graph (`entry`/`actions` on a step) gets a fresh memo of its own.

use std::{collections::HashMap, fmt, rc::Rc};

use chainflow_types::{BranchGroupDocument, ChainDocument, ParameterDocument, StepDocument, WorkflowDocument};
use indexmap::IndexMap;
use tracing::{debug, info};

use crate::{
    actions::Workflow,
    error::EngineError,
    model::{
        ActionKind, ActionMeta, BranchGroup, ChainGraph, GraphBuilder, Guard, GuardedStep, ParameterSpec, ParameterType,
        SelectionPolicy, Step, StepId, ValueSource, parse_value,
    },
};

/// Resolves parameter type names the engine does not know itself.
pub trait TypeResolver {
    fn resolve_type(&self, name: &str) -> Option<ParameterType>;
}

/// A compiled document: the workflow action and its schema.
#[derive(Debug, Clone)]
pub struct CompiledWorkflow {
    pub meta: ActionMeta,
    pub workflow: Workflow,
}

impl CompiledWorkflow {
    pub fn name(&self) -> &str {
        &self.meta.action_ref
    }
}

#[derive(Clone, Default)]
pub struct GraphCompiler {
    type_resolver: Option<Rc<dyn TypeResolver>>,
}

impl fmt::Debug for GraphCompiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphCompiler")
            .field("type_resolver", &self.type_resolver.is_some())
            .finish()
    }
}

struct ChainBuild<'doc> {
    actions: &'doc IndexMap<String, StepDocument>,
    builder: GraphBuilder,
    memo: HashMap<String, StepId>,
}

impl GraphCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type_resolver(mut self, resolver: Rc<dyn TypeResolver>) -> Self {
        self.type_resolver = Some(resolver);
        self
    }

    /// Compiles the parameter schema and the setup, body and teardown graphs of a document.
    pub fn compile(&self, document: &WorkflowDocument) -> Result<CompiledWorkflow, EngineError> {
        let name = document.name.trim();
        if name.is_empty() {
            return Err(EngineError::Document("workflow is missing the required 'name'".to_string()));
        }
        let parameters = document
            .parameters
            .iter()
            .map(|(parameter, declaration)| self.parameter(parameter, declaration))
            .collect::<Result<Vec<_>, _>>()?;
        let meta = ActionMeta {
            action_ref: name.to_string(),
            kind: ActionKind::Workflow,
            parameters,
            description: document.description.clone(),
            display_format: document.displayformat.clone(),
        };

        let setup = self.build_optional(document.setup.as_ref())?;
        let body = self.build_optional(document.body.as_ref())?;
        let teardown = self.build_optional(document.teardown.as_ref())?;
        info!(
            workflow = %name,
            parameters = meta.parameters.len(),
            setup_steps = step_count(&setup),
            body_steps = step_count(&body),
            teardown_steps = step_count(&teardown),
            "compiled workflow"
        );
        Ok(CompiledWorkflow {
            meta,
            workflow: Workflow {
                setup: setup.map(Rc::new),
                body: body.map(Rc::new),
                teardown: teardown.map(Rc::new),
            },
        })
    }

    /// Compiles one graph starting at its entry. A blank or absent entry yields `None`.
    pub fn build_chain(&self, chain: &ChainDocument) -> Result<Option<ChainGraph>, EngineError> {
        let Some(entry) = chain.entry.as_deref().map(str::trim).filter(|entry| !entry.is_empty()) else {
            return Ok(None);
        };
        let mut build = ChainBuild {
            actions: &chain.actions,
            builder: GraphBuilder::new(),
            memo: HashMap::new(),
        };
        let entry = self.build_step(&mut build, entry)?;
        debug!(entry = %entry, steps = build.builder.len(), "compiled graph");
        Ok(Some(build.builder.build(entry)))
    }

    fn build_optional(&self, chain: Option<&ChainDocument>) -> Result<Option<ChainGraph>, EngineError> {
        match chain {
            Some(chain) => self.build_chain(chain),
            None => Ok(None),
        }
    }

    fn build_step(&self, build: &mut ChainBuild<'_>, name: &str) -> Result<StepId, EngineError> {
        if let Some(id) = build.memo.get(name) {
            return Ok(*id);
        }
        let actions = build.actions;
        let document = actions.get(name).ok_or_else(|| EngineError::UnknownStep(name.to_string()))?;

        let mut step = Step::new(name, document.r#type.trim());
        step.inputs = document.input.iter().map(|(slot, raw)| parse_value(slot, raw)).collect();
        step.outputs = document.output.iter().map(|(slot, raw)| parse_value(slot, raw)).collect();
        step.sub_entry = match document.nested_chain() {
            Some(nested) => self.build_chain(&nested)?.map(Rc::new),
            None => None,
        };

        let id = build.builder.add_step(step);
        build.memo.insert(name.to_string(), id);

        let on_success = self.build_group(build, document.onsuccess.as_ref())?;
        let on_errors = self.build_group(build, document.onerror.as_ref())?;
        let on_completed = self.build_group(build, document.oncompleted.as_ref())?;
        if let Some(step) = build.builder.step_mut(id) {
            step.on_success = on_success;
            step.on_errors = on_errors;
            step.on_completed = on_completed;
        }
        Ok(id)
    }

    fn build_group(&self, build: &mut ChainBuild<'_>, group: Option<&BranchGroupDocument>) -> Result<Option<BranchGroup>, EngineError> {
        let Some(group) = group else {
            return Ok(None);
        };
        let mut steps = Vec::with_capacity(group.tasks.len());
        for task in &group.tasks {
            let target = self.build_step(build, task.name.trim())?;
            steps.push(GuardedStep::new(parse_guard(task.switch.as_deref()), target));
        }
        let policy = if group.is_single() {
            SelectionPolicy::Single
        } else {
            SelectionPolicy::Multiple
        };
        Ok(Some(BranchGroup { policy, steps }))
    }

    fn parameter(&self, name: &str, declaration: &ParameterDocument) -> Result<ParameterSpec, EngineError> {
        let ty = match declaration.r#type.as_deref().map(str::trim).filter(|ty| !ty.is_empty()) {
            None => ParameterType::Any,
            Some(type_name) => ParameterType::from_name(type_name)
                .or_else(|| self.type_resolver.as_ref().and_then(|resolver| resolver.resolve_type(type_name)))
                .ok_or_else(|| EngineError::UnknownType(type_name.to_string()))?,
        };
        Ok(ParameterSpec {
            name: name.to_string(),
            ty,
            default: declaration.default.clone().filter(|value| !value.is_null()),
            required: declaration.required,
            description: declaration.description.clone(),
            alias: None,
        })
    }
}

/// Parses a guard string. Blank and `true` always pass, `false` never does, anything
/// else (optionally wrapped in `${...}`) is an expression.
pub fn parse_guard(switch: Option<&str>) -> Guard {
    let Some(text) = switch.map(str::trim).filter(|text| !text.is_empty()) else {
        return Guard::Always;
    };
    if text.eq_ignore_ascii_case("true") {
        return Guard::Always;
    }
    if text.eq_ignore_ascii_case("false") {
        return Guard::Never;
    }
    match parse_value("switch", &serde_json::Value::String(text.to_string())).source {
        ValueSource::Expression(expression) => Guard::Expression(expression),
        ValueSource::Literal(_) => Guard::Expression(text.to_string()),
    }
}

fn step_count(graph: &Option<ChainGraph>) -> usize {
    graph.as_ref().map_or(0, ChainGraph::len)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(yaml: &str) -> WorkflowDocument {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn body(compiled: &CompiledWorkflow) -> &ChainGraph {
        compiled.workflow.body.as_deref().unwrap()
    }

    #[test]
    fn mutually_referencing_steps_compile_to_single_nodes() {
        let compiled = GraphCompiler::new()
            .compile(&document(
                r#"
name: ping-pong
body:
  entry: A
  actions:
    A:
      type: ping
      onsuccess:
        tasks:
          - name: B
    B:
      type: pong
      onerror:
        tasks:
          - name: A
"#,
            ))
            .unwrap();
        let graph = body(&compiled);
        assert_eq!(graph.len(), 2);
        let a = graph.find("A").unwrap();
        let b = graph.find("B").unwrap();
        assert_eq!(graph.entry(), a);

        let a_step = graph.step(a).unwrap();
        let b_step = graph.step(b).unwrap();
        assert_eq!(a_step.on_success.as_ref().unwrap().steps[0].target, b);
        assert_eq!(b_step.on_errors.as_ref().unwrap().steps[0].target, a);
    }

    #[test]
    fn padded_names_compile_and_lint_the_same_way() {
        let document = document(
            r#"
name: padded
body:
  entry: " first "
  actions:
    first:
      type: echo
      onsuccess:
        tasks:
          - name: " second "
    second:
      type: echo
"#,
        );
        assert!(chainflow_types::document_issues(&document).is_empty());
        let compiled = GraphCompiler::new().compile(&document).unwrap();
        let graph = body(&compiled);
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.entry_step().map(|step| step.name.as_str()), Some("first"));
        assert!(graph.find("second").is_some());
    }

    #[test]
    fn self_references_and_shared_targets_are_memoised() {
        let compiled = GraphCompiler::new()
            .compile(&document(
                r#"
name: retry
body:
  entry: fetch
  actions:
    fetch:
      type: http
      onerror:
        kind: single
        tasks:
          - switch: "${retries}"
            name: fetch
          - name: report
      oncompleted:
        tasks:
          - name: report
    report:
      type: log
    orphan:
      type: log
"#,
            ))
            .unwrap();
        let graph = body(&compiled);
        assert_eq!(graph.len(), 2, "unreachable steps are not compiled");
        let fetch = graph.find("fetch").unwrap();
        let report = graph.find("report").unwrap();
        let step = graph.step(fetch).unwrap();
        let on_errors = step.on_errors.as_ref().unwrap();
        assert_eq!(on_errors.policy, SelectionPolicy::Single);
        assert_eq!(on_errors.steps[0].target, fetch);
        assert!(matches!(&on_errors.steps[0].guard, Guard::Expression(expression) if expression == "retries"));
        assert_eq!(on_errors.steps[1].target, report);
        let on_completed = step.on_completed.as_ref().unwrap();
        assert_eq!(on_completed.policy, SelectionPolicy::Multiple);
        assert_eq!(on_completed.steps[0].target, report);
    }

    #[test]
    fn nested_graphs_use_their_own_memo() {
        let compiled = GraphCompiler::new()
            .compile(&document(
                r#"
name: nested
body:
  entry: each
  actions:
    each:
      type: loop
      input:
        Source: "${items}"
        ItemName: item
      entry: each
      actions:
        each:
          type: echo
          input:
            value: "${item}"
"#,
            ))
            .unwrap();
        let graph = body(&compiled);
        assert_eq!(graph.len(), 1);
        let outer = graph.entry_step().unwrap();
        assert_eq!(outer.action_ref, "loop");
        assert_eq!(outer.inputs[0].source, ValueSource::Expression("items".to_string()));
        let nested = outer.sub_entry.as_ref().unwrap();
        assert_eq!(nested.len(), 1);
        let inner = nested.entry_step().unwrap();
        assert_eq!(inner.name, "each");
        assert_eq!(inner.action_ref, "echo");
        assert!(inner.sub_entry.is_none());
    }

    #[test]
    fn unknown_branch_target_is_an_unknown_step() {
        let error = GraphCompiler::new()
            .compile(&document(
                r#"
name: broken
body:
  entry: start
  actions:
    start:
      type: echo
      onsuccess:
        tasks:
          - name: finish
"#,
            ))
            .unwrap_err();
        assert!(matches!(&error, EngineError::UnknownStep(name) if name == "finish"));
        assert!(error.is_fatal());
    }

    #[test]
    fn blank_entry_yields_no_graph() {
        let chain = ChainDocument {
            entry: Some("  ".to_string()),
            ..Default::default()
        };
        assert!(GraphCompiler::new().build_chain(&chain).unwrap().is_none());
        assert!(GraphCompiler::new().build_chain(&ChainDocument::default()).unwrap().is_none());
    }

    #[test]
    fn parameters_compile_into_the_workflow_schema() {
        let compiled = GraphCompiler::new()
            .compile(&document(
                r#"
name: billing
description: Monthly billing run
displayformat: "{month}"
parameters:
  month:
    type: int
    required: true
  amount:
    type: Decimal
    default: "10.50"
  payload: {}
"#,
            ))
            .unwrap();
        assert_eq!(compiled.name(), "billing");
        assert_eq!(compiled.meta.kind, ActionKind::Workflow);
        assert_eq!(compiled.meta.display_format.as_deref(), Some("{month}"));
        let month = compiled.meta.parameter("month").unwrap();
        assert_eq!(month.ty, ParameterType::Int);
        assert!(month.required);
        let amount = compiled.meta.parameter("amount").unwrap();
        assert_eq!(amount.ty, ParameterType::Decimal);
        assert_eq!(amount.default, Some(serde_json::json!("10.50")));
        assert_eq!(compiled.meta.parameter("payload").unwrap().ty, ParameterType::Any);
        assert!(compiled.workflow.body.is_none());
    }

    struct Customers;

    impl TypeResolver for Customers {
        fn resolve_type(&self, name: &str) -> Option<ParameterType> {
            (name == "Customer").then_some(ParameterType::Object)
        }
    }

    #[test]
    fn unknown_types_need_a_resolver() {
        let yaml = r#"
name: crm
parameters:
  who:
    type: Customer
"#;
        let error = GraphCompiler::new().compile(&document(yaml)).unwrap_err();
        assert!(matches!(&error, EngineError::UnknownType(name) if name == "Customer"));

        let compiled = GraphCompiler::new()
            .with_type_resolver(Rc::new(Customers))
            .compile(&document(yaml))
            .unwrap();
        assert_eq!(compiled.meta.parameter("who").unwrap().ty, ParameterType::Object);
    }

    #[test]
    fn guard_strings_parse_into_guards() {
        assert!(matches!(parse_guard(None), Guard::Always));
        assert!(matches!(parse_guard(Some("  ")), Guard::Always));
        assert!(matches!(parse_guard(Some("TRUE")), Guard::Always));
        assert!(matches!(parse_guard(Some("false")), Guard::Never));
        assert!(matches!(parse_guard(Some("${ready}")), Guard::Expression(expression) if expression == "ready"));
        assert!(matches!(parse_guard(Some("!failed")), Guard::Expression(expression) if expression == "!failed"));
    }

    #[test]
    fn missing_name_is_a_document_error() {
        let error = GraphCompiler::new().compile(&WorkflowDocument::default()).unwrap_err();
        assert!(matches!(error, EngineError::Document(_)));
    }
}
