//! Folder searches around a rule set, filtered by read permission.

use std::collections::{HashSet, VecDeque};

use crate::error::RuleServiceError;
use crate::graph::{AssocFilter, NodeGraph};
use crate::linking::{expect_rule_set, linking_folders, rule_set_owner};
use crate::permission::PermissionChecker;
use crate::types::{Aspect, NodeRef};

/// Folders below the owner of `rule_set` that inherit it, breadth-first in
/// child order, at most `max_results`.
///
/// Non-folders are skipped. A folder carrying the "ignore inherited rules"
/// aspect is excluded along with everything below it, and so is a folder
/// `user` cannot read. The owner itself is not included.
///
/// # Errors
///
/// Returns [`RuleSetError::NotARuleSetNode`](crate::RuleSetError::NotARuleSetNode)
/// when `rule_set` is not a rule-set node.
pub fn folders_inheriting_rule_set(
    graph: &dyn NodeGraph,
    permissions: &dyn PermissionChecker,
    user: Option<&str>,
    rule_set: NodeRef,
    max_results: usize,
) -> Result<Vec<NodeRef>, RuleServiceError> {
    expect_rule_set(graph, rule_set)?;
    let Some(owner) = rule_set_owner(graph, rule_set)? else {
        return Ok(Vec::new());
    };

    let filter = AssocFilter::hierarchical();
    let mut found = Vec::new();
    let mut seen = HashSet::from([owner]);
    let mut queue: VecDeque<NodeRef> = graph
        .child_assocs(owner, &filter)?
        .into_iter()
        .map(|a| a.child)
        .collect();

    while let Some(node) = queue.pop_front() {
        if found.len() >= max_results {
            break;
        }
        if !seen.insert(node) {
            continue;
        }
        let is_folder = graph.node_type(node).is_ok_and(|t| t.is_folder());
        if !is_folder
            || graph.has_aspect(node, &Aspect::IGNORE_INHERITED_RULES)
            || !permissions.has_read_permission(node, user)
        {
            continue;
        }
        found.push(node);
        queue.extend(graph.child_assocs(node, &filter)?.into_iter().map(|a| a.child));
    }
    Ok(found)
}

/// Folders linking to `rule_set` that `user` can read, at most
/// `max_results`.
///
/// # Errors
///
/// Returns [`RuleSetError::NotARuleSetNode`](crate::RuleSetError::NotARuleSetNode)
/// when `rule_set` is not a rule-set node.
pub fn folders_linking_to_rule_set(
    graph: &dyn NodeGraph,
    permissions: &dyn PermissionChecker,
    user: Option<&str>,
    rule_set: NodeRef,
    max_results: usize,
) -> Result<Vec<NodeRef>, RuleServiceError> {
    expect_rule_set(graph, rule_set)?;
    Ok(linking_folders(graph, rule_set)?
        .into_iter()
        .filter(|f| permissions.has_read_permission(*f, user))
        .take(max_results)
        .collect())
}
