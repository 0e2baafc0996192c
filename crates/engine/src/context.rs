//! Hierarchical execution context.
//!
//! Every step runs against an [`ExecutionContext`]: a node in a tree holding the
//! node's `inputs`, the `vars` published by steps, and a small typed service
//! registry. Lookups walk from the node towards the root and stop at the first
//! level that defines the key, so nested frames shadow their ancestors.
//!
//! Child frames are only created through [`ExecutionContext::begin_context`], which
//! hands back a [`ContextScope`]. Dropping the scope removes the child from its
//! parent's child set, on every exit path including unwinding.
//!
//! ```rust
//! use chainflow_engine::ExecutionContext;
//! use serde_json::json;
//!
//! let root = ExecutionContext::new();
//! root.set_input("region", json!("eu"));
//! {
//!     let child = root.begin_context();
//!     child.set_var("region", json!("us"));
//!     assert_eq!(child.depth(), 2);
//!     assert_eq!(child.lookup("region"), Some(json!("us")));
//!     assert_eq!(root.child_count(), 1);
//! }
//! assert_eq!(root.child_count(), 0);
//! ```

use std::{
    any::{Any, TypeId},
    cell::RefCell,
    collections::HashMap,
    fmt,
    ops::Deref,
    rc::{Rc, Weak},
};

use serde_json::{Map, Value};

struct ContextNode {
    depth: usize,
    parent: Option<Weak<ContextNode>>,
    inputs: RefCell<Map<String, Value>>,
    vars: RefCell<Map<String, Value>>,
    children: RefCell<Vec<Rc<ContextNode>>>,
    services: RefCell<HashMap<TypeId, Box<dyn Any>>>,
}

impl ContextNode {
    fn new(depth: usize, parent: Option<Weak<ContextNode>>) -> Self {
        Self {
            depth,
            parent,
            inputs: RefCell::new(Map::new()),
            vars: RefCell::new(Map::new()),
            children: RefCell::new(Vec::new()),
            services: RefCell::new(HashMap::new()),
        }
    }
}

/// Handle onto one frame of the execution tree.
///
/// Cloning the handle is cheap and yields another reference to the same frame.
/// Frames are single-threaded: the tree is built from `Rc` and `RefCell`.
#[derive(Clone)]
pub struct ExecutionContext {
    node: Rc<ContextNode>,
}

impl ExecutionContext {
    /// Creates a root context (depth 1, no parent).
    pub fn new() -> Self {
        Self {
            node: Rc::new(ContextNode::new(1, None)),
        }
    }

    /// Opens a child frame one level deeper than `self`.
    ///
    /// The child is registered in this frame's child set until the returned scope is
    /// dropped.
    pub fn begin_context(&self) -> ContextScope<'_> {
        let node = Rc::new(ContextNode::new(self.node.depth + 1, Some(Rc::downgrade(&self.node))));
        self.node.children.borrow_mut().push(Rc::clone(&node));
        ContextScope {
            parent: self,
            child: ExecutionContext { node },
        }
    }

    /// Forgets a child frame. Returns whether it was still registered.
    pub fn release_context(&self, child: &ExecutionContext) -> bool {
        let mut children = self.node.children.borrow_mut();
        match children.iter().position(|candidate| Rc::ptr_eq(candidate, &child.node)) {
            Some(index) => {
                children.remove(index);
                true
            }
            None => false,
        }
    }

    /// Nesting depth; the root is 1.
    pub fn depth(&self) -> usize {
        self.node.depth
    }

    /// Returns the parent frame, or `None` for a root.
    pub fn parent(&self) -> Option<ExecutionContext> {
        let node = self.node.parent.as_ref()?.upgrade()?;
        Some(ExecutionContext { node })
    }

    /// Number of child frames currently open under this one.
    pub fn child_count(&self) -> usize {
        self.node.children.borrow().len()
    }

    /// Returns true when both handles point at the same frame.
    pub fn same_frame(&self, other: &ExecutionContext) -> bool {
        Rc::ptr_eq(&self.node, &other.node)
    }

    /// Reads an input defined on this frame only.
    pub fn input(&self, name: &str) -> Option<Value> {
        self.node.inputs.borrow().get(name).cloned()
    }

    pub fn set_input(&self, name: impl Into<String>, value: Value) {
        self.node.inputs.borrow_mut().insert(name.into(), value);
    }

    /// Reads a variable defined on this frame only.
    pub fn var(&self, name: &str) -> Option<Value> {
        self.node.vars.borrow().get(name).cloned()
    }

    pub fn set_var(&self, name: impl Into<String>, value: Value) {
        self.node.vars.borrow_mut().insert(name.into(), value);
    }

    /// Snapshot of this frame's own inputs.
    pub fn inputs(&self) -> Map<String, Value> {
        self.node.inputs.borrow().clone()
    }

    /// Snapshot of this frame's own variables.
    pub fn vars(&self) -> Map<String, Value> {
        self.node.vars.borrow().clone()
    }

    /// Registers a service on this frame, replacing any earlier registration of the same type.
    ///
    /// Trait objects are registered under their trait type:
    /// `context.register_service::<dyn ActionRegistry>(Rc::new(table))`.
    pub fn register_service<T: ?Sized + 'static>(&self, service: Rc<T>) {
        self.node.services.borrow_mut().insert(TypeId::of::<T>(), Box::new(service));
    }

    /// Looks a service up on this frame, then on each ancestor in turn.
    pub fn get_service<T: ?Sized + 'static>(&self) -> Option<Rc<T>> {
        let local = self
            .node
            .services
            .borrow()
            .get(&TypeId::of::<T>())
            .and_then(|service| service.downcast_ref::<Rc<T>>())
            .cloned();
        match local {
            Some(service) => Some(service),
            None => self.parent()?.get_service::<T>(),
        }
    }

    /// Looks a single name up, nearest frame first, variables before inputs.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        let mut current = Some(self.clone());
        while let Some(context) = current {
            if let Some(value) = context.var(name).or_else(|| context.input(name)) {
                return Some(value);
            }
            current = context.parent();
        }
        None
    }

    /// Merges every visible value into one map.
    ///
    /// Walks from this frame to the root, adding each level's variables and then its
    /// inputs, never overwriting a key a nearer level already contributed.
    pub fn effective_values(&self) -> Map<String, Value> {
        let mut merged = Map::new();
        let mut current = Some(self.clone());
        while let Some(context) = current {
            merge_missing(&context.node.vars.borrow(), &mut merged);
            merge_missing(&context.node.inputs.borrow(), &mut merged);
            current = context.parent();
        }
        merged
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("depth", &self.node.depth)
            .field("inputs", &self.node.inputs.borrow())
            .field("vars", &self.node.vars.borrow())
            .field("children", &self.child_count())
            .finish()
    }
}

fn merge_missing(from: &Map<String, Value>, into: &mut Map<String, Value>) {
    for (key, value) in from {
        if !into.contains_key(key) {
            into.insert(key.clone(), value.clone());
        }
    }
}

/// A child frame that is released from its parent when dropped.
pub struct ContextScope<'parent> {
    parent: &'parent ExecutionContext,
    child: ExecutionContext,
}

impl ContextScope<'_> {
    /// Handle onto the child frame.
    pub fn context(&self) -> &ExecutionContext {
        &self.child
    }
}

impl Deref for ContextScope<'_> {
    type Target = ExecutionContext;

    fn deref(&self) -> &Self::Target {
        &self.child
    }
}

impl Drop for ContextScope<'_> {
    fn drop(&mut self) {
        self.parent.release_context(&self.child);
    }
}
