use std::rc::Rc;

use anyhow::{Context, Result};
use chainflow_engine::{
    Action, ActionMeta, ActionResult, ActionTable, CompiledWorkflow, Engine, ExecutionContext, GraphCompiler, InputSetters, MemoryTrace,
    ParameterSpec, ParameterType, actions::register_builtins, load_workflow_file,
};
use chainflow_types::document_issues;
use clap::{Arg, ArgAction, ArgMatches, Command};
use serde_json::{Map, Value};
use tracing::{info, warn};

fn main() -> Result<()> {
    init_tracing();
    let matches = cli().get_matches();
    match matches.subcommand() {
        Some(("check", sub)) => check_cmd(sub),
        Some(("run", sub)) => run_cmd(sub),
        _ => {
            println!("Available subcommands: check, run");
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn cli() -> Command {
    let file = Arg::new("file").required(true).action(ArgAction::Set).help("Path to a workflow YAML/JSON document");
    Command::new("chainflow")
        .about("Compile and run action chain workflows")
        .subcommand(Command::new("check").about("Validate and compile a workflow document").arg(file.clone()))
        .subcommand(
            Command::new("run")
                .about("Run a workflow document with the built-in actions")
                .arg(file)
                .arg(
                    Arg::new("input")
                        .long("input")
                        .short('i')
                        .action(ArgAction::Append)
                        .value_name("KEY=VALUE")
                        .help("Workflow input; VALUE is parsed as JSON when possible"),
                )
                .arg(
                    Arg::new("trace")
                        .long("trace")
                        .action(ArgAction::SetTrue)
                        .help("Print the per-step trace after the result"),
                ),
        )
}

fn load(sub: &ArgMatches) -> Result<CompiledWorkflow> {
    let file = sub.get_one::<String>("file").context("missing workflow file")?;
    let document = load_workflow_file(file).with_context(|| format!("failed to load {file}"))?;
    for issue in document_issues(&document) {
        warn!(file = %file, issue = %issue, "workflow document issue");
    }
    let compiled = GraphCompiler::new()
        .compile(&document)
        .with_context(|| format!("failed to compile {file}"))?;
    Ok(compiled)
}

fn check_cmd(sub: &ArgMatches) -> Result<()> {
    let compiled = load(sub)?;
    let graph_size = |graph: &Option<Rc<chainflow_engine::ChainGraph>>| graph.as_ref().map_or(0, |graph| graph.len());
    let summary = serde_json::json!({
        "name": compiled.name(),
        "description": compiled.meta.description,
        "parameters": compiled
            .meta
            .parameters
            .iter()
            .map(|parameter| serde_json::json!({
                "name": parameter.name,
                "type": parameter.ty.to_string(),
                "required": parameter.required,
                "default": parameter.default,
            }))
            .collect::<Vec<_>>(),
        "steps": {
            "setup": graph_size(&compiled.workflow.setup),
            "body": graph_size(&compiled.workflow.body),
            "teardown": graph_size(&compiled.workflow.teardown),
        },
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn run_cmd(sub: &ArgMatches) -> Result<()> {
    let compiled = load(sub)?;
    let inputs = parse_inputs(sub.get_many::<String>("input").into_iter().flatten())?;

    let mut table = host_actions();
    table.register_workflow(&compiled);
    let trace = Rc::new(MemoryTrace::new());
    let engine = Engine::new(Rc::new(table)).with_trace(trace.clone());

    let result = engine.run_workflow(&compiled, inputs)?;
    info!(workflow = %compiled.name(), success = result.is_success(), steps = trace.len(), "run complete");
    println!("{}", serde_json::to_string_pretty(&result.to_value())?);
    if sub.get_flag("trace") {
        println!("{}", serde_json::to_string_pretty(&trace.records())?);
    }
    if let Some(message) = result.error_message() {
        anyhow::bail!("workflow '{}' failed: {message}", compiled.name());
    }
    Ok(())
}

fn parse_inputs<'a>(pairs: impl Iterator<Item = &'a String>) -> Result<Map<String, Value>> {
    let mut inputs = Map::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .with_context(|| format!("input '{pair}' must be KEY=VALUE"))?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        inputs.insert(key.trim().to_string(), value);
    }
    Ok(inputs)
}

/// Returns its `value` input.
#[derive(Default)]
struct Echo {
    value: Value,
}

impl Action for Echo {
    fn exec(&mut self, _context: &ExecutionContext) -> anyhow::Result<ActionResult> {
        Ok(ActionResult::success(self.value.clone()))
    }
}

/// Logs its `message` input and returns it.
#[derive(Default)]
struct Log {
    message: String,
}

impl Action for Log {
    fn exec(&mut self, context: &ExecutionContext) -> anyhow::Result<ActionResult> {
        info!(depth = context.depth(), message = %self.message, "log action");
        Ok(ActionResult::success(Value::String(self.message.clone())))
    }
}

/// Built-in container actions plus the `echo` and `log` host actions.
fn host_actions() -> ActionTable {
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
    table.register(
        ActionMeta::action("log", vec![ParameterSpec::new("message", ParameterType::String).required()]),
        Log::default,
        InputSetters::new().slot("message", |log: &mut Log, value| {
            log.message = match value {
                Value::String(message) => message,
                other => other.to_string(),
            };
            Ok(())
        }),
    );
    table
}
