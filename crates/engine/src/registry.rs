//! Action registration and lookup.
//!
//! The executor never constructs actions itself. It asks the [`ActionRegistry`]
//! service on the context chain for a fresh [`ActionEntry`] (schema plus instance)
//! each time a step runs. [`ActionTable`] is the registry shipped with the engine:
//! an explicit table from action reference to schema and constructor, populated at
//! startup.
//!
//! Leaf actions declare their input slots up front with [`InputSetters`], a map from
//! slot name to a typed setter, so binding needs no runtime reflection.

use std::{collections::HashMap, fmt, rc::Rc};

use indexmap::IndexMap;
use serde_json::Value;

use crate::{
    compiler::CompiledWorkflow,
    context::ExecutionContext,
    error::EngineError,
    model::{ActionMeta, ActionResult, ChainGraph},
};

/// Executable unit dispatched by the engine.
pub trait Action {
    /// Runs the action. Errors are contained by the executor and routed to the step's
    /// error branches unless they are fatal [`EngineError`]s.
    fn exec(&mut self, context: &ExecutionContext) -> anyhow::Result<ActionResult>;

    /// Injects a bound parameter value. Returns `Ok(false)` when the action has no such slot.
    fn bind_input(&mut self, _slot: &str, _value: Value) -> anyhow::Result<bool> {
        Ok(false)
    }

    /// Receives the nested graph of the step. Returns `false` for actions that are not containers.
    fn set_sub_entry(&mut self, _entry: Rc<ChainGraph>) -> bool {
        false
    }
}

/// A resolved action: its schema and a fresh instance.
pub struct ActionEntry {
    pub meta: Rc<ActionMeta>,
    pub action: Box<dyn Action>,
}

impl fmt::Debug for ActionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionEntry").field("meta", &self.meta).finish_non_exhaustive()
    }
}

/// Maps action references to action instances.
pub trait ActionRegistry {
    /// Resolves `reference`, failing with [`EngineError::UnresolvedAction`] when it is unknown.
    fn get_action(&self, reference: &str) -> Result<ActionEntry, EngineError>;
}

type Setter<A> = Box<dyn Fn(&mut A, Value) -> anyhow::Result<()>>;

/// Typed input slots of a leaf action.
pub struct InputSetters<A> {
    slots: HashMap<String, Setter<A>>,
}

impl<A> InputSetters<A> {
    pub fn new() -> Self {
        Self { slots: HashMap::new() }
    }

    /// Declares a slot and the setter that stores its value.
    pub fn slot(mut self, name: impl Into<String>, setter: impl Fn(&mut A, Value) -> anyhow::Result<()> + 'static) -> Self {
        self.slots.insert(name.into(), Box::new(setter));
        self
    }

    pub fn has_slot(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    /// Attaches the setters to an action instance.
    pub fn bind(self, action: A) -> BoundAction<A> {
        BoundAction {
            action,
            setters: Rc::new(self),
        }
    }
}

impl<A> Default for InputSetters<A> {
    fn default() -> Self {
        Self::new()
    }
}

/// An action instance paired with its input setters.
pub struct BoundAction<A> {
    action: A,
    setters: Rc<InputSetters<A>>,
}

impl<A> BoundAction<A> {
    pub fn inner(&self) -> &A {
        &self.action
    }
}

impl<A: Action> Action for BoundAction<A> {
    fn exec(&mut self, context: &ExecutionContext) -> anyhow::Result<ActionResult> {
        self.action.exec(context)
    }

    fn bind_input(&mut self, slot: &str, value: Value) -> anyhow::Result<bool> {
        match self.setters.slots.get(slot) {
            Some(setter) => {
                setter(&mut self.action, value)?;
                Ok(true)
            }
            None => self.action.bind_input(slot, value),
        }
    }

    fn set_sub_entry(&mut self, entry: Rc<ChainGraph>) -> bool {
        self.action.set_sub_entry(entry)
    }
}

type Constructor = Box<dyn Fn() -> Box<dyn Action>>;

struct Registration {
    meta: Rc<ActionMeta>,
    construct: Constructor,
}

/// Registration table from action reference to schema and constructor.
///
/// Registering a reference twice replaces the earlier registration.
#[derive(Default)]
pub struct ActionTable {
    entries: IndexMap<String, Registration>,
}

impl ActionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a leaf or container action built by `construct`, with typed input slots.
    pub fn register<A, F>(&mut self, meta: ActionMeta, construct: F, setters: InputSetters<A>) -> &mut Self
    where
        A: Action + 'static,
        F: Fn() -> A + 'static,
    {
        let setters = Rc::new(setters);
        self.register_with(meta, move || -> Box<dyn Action> {
            Box::new(BoundAction {
                action: construct(),
                setters: Rc::clone(&setters),
            })
        })
    }

    /// Registers an action from a constructor returning a boxed instance.
    pub fn register_with<F>(&mut self, meta: ActionMeta, construct: F) -> &mut Self
    where
        F: Fn() -> Box<dyn Action> + 'static,
    {
        self.entries.insert(
            meta.action_ref.clone(),
            Registration {
                meta: Rc::new(meta),
                construct: Box::new(construct),
            },
        );
        self
    }

    /// Registers a compiled workflow under its name so other graphs can run it as a step.
    pub fn register_workflow(&mut self, compiled: &CompiledWorkflow) -> &mut Self {
        let workflow = compiled.workflow.clone();
        self.register_with(compiled.meta.clone(), move || -> Box<dyn Action> { Box::new(workflow.clone()) })
    }

    pub fn contains(&self, reference: &str) -> bool {
        self.entries.contains_key(reference)
    }

    pub fn meta(&self, reference: &str) -> Option<Rc<ActionMeta>> {
        self.entries.get(reference).map(|registration| Rc::clone(&registration.meta))
    }

    /// Registered references in registration order.
    pub fn references(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for ActionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionTable")
            .field("references", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ActionRegistry for ActionTable {
    fn get_action(&self, reference: &str) -> Result<ActionEntry, EngineError> {
        let registration = self
            .entries
            .get(reference)
            .ok_or_else(|| EngineError::UnresolvedAction(reference.to_string()))?;
        Ok(ActionEntry {
            meta: Rc::clone(&registration.meta),
            action: (registration.construct)(),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::model::{ParameterSpec, ParameterType};

    #[derive(Default)]
    struct Greet {
        name: String,
    }

    impl Action for Greet {
        fn exec(&mut self, _context: &ExecutionContext) -> anyhow::Result<ActionResult> {
            Ok(ActionResult::success(json!(format!("hello {}", self.name))))
        }
    }

    fn table() -> ActionTable {
        let mut table = ActionTable::new();
        table.register(
            ActionMeta::action("greet", vec![ParameterSpec::new("name", ParameterType::String)]),
            Greet::default,
            InputSetters::new().slot("name", |greet: &mut Greet, value| {
                greet.name = serde_json::from_value(value)?;
                Ok(())
            }),
        );
        table
    }

    #[test]
    fn unknown_references_are_unresolved_actions() {
        let error = table().get_action("wave").unwrap_err();
        assert!(matches!(&error, EngineError::UnresolvedAction(reference) if reference == "wave"));
        assert!(error.is_fatal());
    }

    #[test]
    fn each_lookup_constructs_a_fresh_instance() {
        let table = table();
        let context = ExecutionContext::new();
        let mut first = table.get_action("greet").unwrap();
        assert!(first.action.bind_input("name", json!("Ada")).unwrap());
        assert_eq!(first.action.exec(&context).unwrap().result, json!("hello Ada"));

        let mut second = table.get_action("greet").unwrap();
        assert_eq!(second.action.exec(&context).unwrap().result, json!("hello "));
        assert!(Rc::ptr_eq(&first.meta, &second.meta));
    }

    #[test]
    fn unknown_slots_are_reported_not_bound() {
        let mut entry = table().get_action("greet").unwrap();
        assert!(!entry.action.bind_input("surname", json!("Lovelace")).unwrap());
        assert!(entry.action.bind_input("name", json!(5)).is_err());
        assert!(!entry.action.set_sub_entry(Rc::new(ChainGraph::single(crate::model::Step::new("x", "y")))));
    }

    #[test]
    fn table_lists_references_in_registration_order() {
        let mut table = table();
        table.register_with(ActionMeta::action("wave", Vec::new()), || -> Box<dyn Action> { Box::new(Greet::default()) });
        assert_eq!(table.references().collect::<Vec<_>>(), vec!["greet", "wave"]);
        assert!(table.contains("wave"));
        assert_eq!(table.meta("greet").map(|meta| meta.parameters.len()), Some(1));
    }
}
