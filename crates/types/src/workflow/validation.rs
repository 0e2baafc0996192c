//! Structural checks for workflow documents.
//!
//! The compiler only expands steps reachable from an entry, so a typo in a branch
//! that never gets reached would otherwise go unnoticed until the graph is edited.
//! These routines walk every declared step instead and report each problem as a
//! human-readable line, in authoring order.

use std::collections::HashSet;

use indexmap::IndexMap;

use super::{ChainDocument, StepDocument, WorkflowDocument};

/// Collect every structural problem found in the document.
///
/// An empty result means the document is well formed. The checks are:
/// - the workflow has a name;
/// - every step declares an action `type`;
/// - every `entry` and branch task names a step declared in the same graph;
/// - every declared step is reachable from its graph's entry.
pub fn document_issues(document: &WorkflowDocument) -> Vec<String> {
    let mut issues = Vec::new();
    if document.name.trim().is_empty() {
        issues.push("workflow is missing the required 'name'".to_string());
    }

    for (section, chain) in [("setup", &document.setup), ("body", &document.body), ("teardown", &document.teardown)] {
        if let Some(chain) = chain {
            chain_issues(section, chain, &mut issues);
        }
    }
    issues
}

fn chain_issues(scope: &str, chain: &ChainDocument, issues: &mut Vec<String>) {
    let entry = chain.entry.as_deref().map(str::trim).unwrap_or_default();
    if entry.is_empty() {
        if !chain.actions.is_empty() {
            issues.push(format!("{scope}: graph declares steps but no entry"));
        }
        return;
    }
    if !chain.actions.contains_key(entry) {
        issues.push(format!("{scope}: entry '{entry}' is not declared"));
    }

    for (name, step) in &chain.actions {
        let path = format!("{scope}.{name}");
        if step.r#type.trim().is_empty() {
            issues.push(format!("{path}: step is missing the action 'type'"));
        }
        for task in step.branch_groups().flat_map(|group| group.tasks.iter()) {
            let target = task.name.trim();
            if !chain.actions.contains_key(target) {
                issues.push(format!("{path}: branch references unknown step '{target}'"));
            }
        }
        if let Some(nested) = step.nested_chain() {
            chain_issues(&path, &nested, issues);
        } else if !step.actions.is_empty() {
            issues.push(format!("{path}: nested steps declared without an entry"));
        }
    }

    let reachable = reachable_steps(entry, &chain.actions);
    for name in chain.actions.keys().filter(|name| !reachable.contains(name.as_str())) {
        issues.push(format!("{scope}.{name}: step is unreachable from entry '{entry}'"));
    }
}

fn reachable_steps<'a>(entry: &'a str, actions: &'a IndexMap<String, StepDocument>) -> HashSet<&'a str> {
    let mut seen = HashSet::new();
    let mut pending = vec![entry];
    while let Some(name) = pending.pop() {
        let Some(step) = actions.get(name) else {
            continue;
        };
        if !seen.insert(name) {
            continue;
        }
        pending.extend(step.branch_groups().flat_map(|group| group.tasks.iter()).map(|task| task.name.trim()));
    }
    seen
}
