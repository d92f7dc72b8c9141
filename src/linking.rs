//! Rule-set ownership and linking.
//!
//! A folder reaches its rule set through a rule-folder association. The
//! primary association marks the owner. A secondary one is a link: the
//! folder shares the owner's rules and has none of its own.

use tracing::info;

use crate::error::RuleServiceError;
use crate::graph::{AssocFilter, GraphError, NodeGraph};
use crate::resolver::RuleSetResolver;
use crate::types::{Aspect, AssocType, ChildAssoc, NodeRef, NodeType, RuleSetError};

fn rule_folder_assocs(
    graph: &dyn NodeGraph,
    folder: NodeRef,
) -> Result<Vec<ChildAssoc>, GraphError> {
    graph.child_assocs(folder, &AssocFilter::of_type(AssocType::RuleFolder))
}

/// The rule set `folder` owns or links to, if any.
///
/// # Errors
///
/// Returns [`GraphError::NodeNotFound`] if `folder` does not exist.
pub fn rule_set_node(graph: &dyn NodeGraph, folder: NodeRef) -> Result<Option<NodeRef>, GraphError> {
    let assocs = rule_folder_assocs(graph, folder)?;
    Ok(assocs
        .iter()
        .find(|a| a.primary)
        .or_else(|| assocs.first())
        .map(|a| a.child))
}

/// The rule set `folder` owns.
///
/// # Errors
///
/// Returns [`RuleSetError::MultipleOwnedRuleSets`] if the folder owns more
/// than one.
pub fn owned_rule_set_node(
    graph: &dyn NodeGraph,
    folder: NodeRef,
) -> Result<Option<NodeRef>, RuleServiceError> {
    let owned = graph.child_assocs(
        folder,
        &AssocFilter::of_type(AssocType::RuleFolder).primary(),
    )?;
    match owned.as_slice() {
        [] => Ok(None),
        [one] => Ok(Some(one.child)),
        _ => Err(RuleSetError::MultipleOwnedRuleSets(folder).into()),
    }
}

/// The shared rule set `folder` links to, if it is linked.
///
/// # Errors
///
/// Returns [`GraphError::NodeNotFound`] if `folder` does not exist.
pub fn linked_rule_set_node(
    graph: &dyn NodeGraph,
    folder: NodeRef,
) -> Result<Option<NodeRef>, GraphError> {
    Ok(rule_folder_assocs(graph, folder)?
        .into_iter()
        .find(|a| !a.primary)
        .map(|a| a.child))
}

/// # Errors
///
/// Returns [`GraphError::NodeNotFound`] if `folder` does not exist.
pub fn is_linked_to_rule_node(graph: &dyn NodeGraph, folder: NodeRef) -> Result<bool, GraphError> {
    Ok(linked_rule_set_node(graph, folder)?.is_some())
}

/// The folder owning a rule-set node.
///
/// # Errors
///
/// Returns [`GraphError::NodeNotFound`] if `rule_set` does not exist.
pub fn rule_set_owner(graph: &dyn NodeGraph, rule_set: NodeRef) -> Result<Option<NodeRef>, GraphError> {
    Ok(graph
        .parent_assocs(
            rule_set,
            &AssocFilter::of_type(AssocType::RuleFolder).primary(),
        )?
        .first()
        .map(|a| a.parent))
}

/// The folder whose rule set `folder` links to.
///
/// # Errors
///
/// Returns [`GraphError::NodeNotFound`] if `folder` does not exist.
pub fn linked_to_rule_node(graph: &dyn NodeGraph, folder: NodeRef) -> Result<Option<NodeRef>, GraphError> {
    match linked_rule_set_node(graph, folder)? {
        Some(rule_set) => rule_set_owner(graph, rule_set),
        None => Ok(None),
    }
}

/// Folders linking to the rule set `folder` owns, in association order.
///
/// # Errors
///
/// Returns [`GraphError::NodeNotFound`] if `folder` does not exist.
pub fn linked_from_rule_nodes(
    graph: &dyn NodeGraph,
    folder: NodeRef,
) -> Result<Vec<NodeRef>, RuleServiceError> {
    match owned_rule_set_node(graph, folder)? {
        Some(rule_set) => Ok(linking_folders(graph, rule_set)?),
        None => Ok(Vec::new()),
    }
}

/// Non-owning parents of a rule-set node.
pub(crate) fn linking_folders(
    graph: &dyn NodeGraph,
    rule_set: NodeRef,
) -> Result<Vec<NodeRef>, GraphError> {
    Ok(graph
        .parent_assocs(rule_set, &AssocFilter::of_type(AssocType::RuleFolder))?
        .into_iter()
        .filter(|a| !a.primary)
        .map(|a| a.parent)
        .collect())
}

/// Whether more than one folder reaches the rule set.
///
/// # Errors
///
/// Returns [`GraphError::NodeNotFound`] if `rule_set` does not exist.
pub fn is_rule_set_shared(graph: &dyn NodeGraph, rule_set: NodeRef) -> Result<bool, GraphError> {
    Ok(graph
        .parent_assocs(rule_set, &AssocFilter::of_type(AssocType::RuleFolder))?
        .len()
        > 1)
}

/// Whether `folder` owns, links to, or inherits the rule set.
///
/// # Errors
///
/// Returns [`GraphError::NodeNotFound`] if either node does not exist.
pub fn is_rule_set_associated_with_folder(
    graph: &dyn NodeGraph,
    resolver: &RuleSetResolver,
    rule_set: NodeRef,
    folder: NodeRef,
) -> Result<bool, GraphError> {
    let holders: Vec<NodeRef> = graph
        .parent_assocs(rule_set, &AssocFilter::of_type(AssocType::RuleFolder))?
        .into_iter()
        .map(|a| a.parent)
        .collect();
    if holders.is_empty() {
        return Ok(false);
    }
    Ok(resolver
        .nodes_supplying_rule_sets(graph, folder)?
        .iter()
        .any(|n| holders.contains(n)))
}

/// Make `to` share the rule set of `from`.
///
/// An empty rule set owned by `to` is discarded first, and an existing link
/// from `to` is replaced.
///
/// # Errors
///
/// Returns [`RuleSetError::SelfLink`] when `from` is `to`,
/// [`RuleSetError::NothingToLink`] when `from` has no rule set, and
/// [`RuleSetError::AlreadyOwnsRules`] when `to` owns rules of its own.
pub fn link(graph: &dyn NodeGraph, from: NodeRef, to: NodeRef) -> Result<NodeRef, RuleServiceError> {
    if from == to {
        return Err(RuleSetError::SelfLink(to).into());
    }
    if !graph.exists(to) {
        return Err(RuleServiceError::NotFound(to));
    }
    let rule_set = rule_set_node(graph, from)?.ok_or(RuleSetError::NothingToLink(from))?;

    if let Some(owned) = owned_rule_set_node(graph, to)? {
        if owned == rule_set {
            return Err(RuleSetError::SelfLink(to).into());
        }
        let has_rules = !graph
            .child_assocs(owned, &AssocFilter::of_type(AssocType::Rule).limit(1))?
            .is_empty();
        if has_rules {
            return Err(RuleSetError::AlreadyOwnsRules(to).into());
        }
        graph.delete_node(owned)?;
    }
    if let Some(previous) = linked_rule_set_node(graph, to)? {
        if previous == rule_set {
            return Ok(rule_set);
        }
        graph.remove_child(to, previous)?;
    }

    graph.add_child(to, rule_set, AssocType::RuleFolder)?;
    graph.add_aspect(to, Aspect::RULES)?;
    info!(%from, %to, %rule_set, "linked rule set");
    Ok(rule_set)
}

/// Break the link from `folder` to a shared rule set. Returns whether a link
/// was removed.
///
/// # Errors
///
/// Returns [`GraphError::NodeNotFound`] if `folder` does not exist.
pub fn unlink(graph: &dyn NodeGraph, folder: NodeRef) -> Result<bool, RuleServiceError> {
    let Some(rule_set) = linked_rule_set_node(graph, folder)? else {
        return Ok(false);
    };
    graph.remove_child(folder, rule_set)?;
    if owned_rule_set_node(graph, folder)?.is_none() {
        graph.remove_aspect(folder, &Aspect::RULES)?;
    }
    info!(%folder, %rule_set, "unlinked rule set");
    Ok(true)
}

/// Check that `node` is a rule-set node.
pub(crate) fn expect_rule_set(graph: &dyn NodeGraph, node: NodeRef) -> Result<(), RuleServiceError> {
    if graph.node_type(node)? != NodeType::RuleSet {
        return Err(RuleSetError::NotARuleSetNode(node).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::InMemoryGraph;

    fn folder(graph: &InMemoryGraph, parent: NodeRef, name: &str) -> NodeRef {
        graph
            .create_node(parent, AssocType::Contains, name, NodeType::Folder)
            .unwrap()
            .child
    }

    fn with_rule_set(graph: &InMemoryGraph, folder: NodeRef, rules: usize) -> NodeRef {
        let set = graph
            .create_node(folder, AssocType::RuleFolder, "rules", NodeType::RuleSet)
            .unwrap()
            .child;
        for i in 0..rules {
            graph
                .create_node(set, AssocType::Rule, &format!("rule{i}"), NodeType::Rule)
                .unwrap();
        }
        graph.add_aspect(folder, Aspect::RULES).unwrap();
        set
    }

    #[test]
    fn link_and_unlink() {
        let graph = InMemoryGraph::new();
        let a = folder(&graph, graph.root(), "a");
        let b = folder(&graph, graph.root(), "b");
        let set = with_rule_set(&graph, a, 1);

        assert_eq!(link(&graph, a, b).unwrap(), set);
        assert!(is_linked_to_rule_node(&graph, b).unwrap());
        assert!(!is_linked_to_rule_node(&graph, a).unwrap());
        assert_eq!(rule_set_node(&graph, b).unwrap(), Some(set));
        assert_eq!(linked_to_rule_node(&graph, b).unwrap(), Some(a));
        assert_eq!(linked_from_rule_nodes(&graph, a).unwrap(), vec![b]);
        assert!(is_rule_set_shared(&graph, set).unwrap());
        assert!(graph.has_aspect(b, &Aspect::RULES));

        assert!(unlink(&graph, b).unwrap());
        assert!(!is_linked_to_rule_node(&graph, b).unwrap());
        assert!(!graph.has_aspect(b, &Aspect::RULES));
        assert!(!is_rule_set_shared(&graph, set).unwrap());
        assert!(!unlink(&graph, b).unwrap());
    }

    #[test]
    fn link_refuses_folder_with_rules() {
        let graph = InMemoryGraph::new();
        let a = folder(&graph, graph.root(), "a");
        let b = folder(&graph, graph.root(), "b");
        with_rule_set(&graph, a, 1);
        with_rule_set(&graph, b, 2);
        assert!(matches!(
            link(&graph, a, b),
            Err(RuleServiceError::RuleSet(RuleSetError::AlreadyOwnsRules(n))) if n == b
        ));
    }

    #[test]
    fn link_discards_empty_owned_set() {
        let graph = InMemoryGraph::new();
        let a = folder(&graph, graph.root(), "a");
        let b = folder(&graph, graph.root(), "b");
        let shared = with_rule_set(&graph, a, 1);
        let empty = with_rule_set(&graph, b, 0);
        link(&graph, a, b).unwrap();
        assert!(!graph.exists(empty));
        assert_eq!(rule_set_node(&graph, b).unwrap(), Some(shared));
    }

    #[test]
    fn relink_replaces_previous_link() {
        let graph = InMemoryGraph::new();
        let a = folder(&graph, graph.root(), "a");
        let b = folder(&graph, graph.root(), "b");
        let c = folder(&graph, graph.root(), "c");
        with_rule_set(&graph, a, 1);
        let c_set = with_rule_set(&graph, c, 1);
        link(&graph, a, b).unwrap();
        link(&graph, c, b).unwrap();
        assert_eq!(rule_set_node(&graph, b).unwrap(), Some(c_set));
        assert!(linked_from_rule_nodes(&graph, a).unwrap().is_empty());
    }

    #[test]
    fn link_errors() {
        let graph = InMemoryGraph::new();
        let a = folder(&graph, graph.root(), "a");
        let b = folder(&graph, graph.root(), "b");
        assert!(matches!(
            link(&graph, a, b),
            Err(RuleServiceError::RuleSet(RuleSetError::NothingToLink(_)))
        ));
        with_rule_set(&graph, a, 1);
        assert!(matches!(
            link(&graph, a, a),
            Err(RuleServiceError::RuleSet(RuleSetError::SelfLink(_)))
        ));
    }

    #[test]
    fn association_follows_inheritance() {
        let graph = InMemoryGraph::new();
        let a = folder(&graph, graph.root(), "a");
        let child = folder(&graph, a, "child");
        let other = folder(&graph, graph.root(), "other");
        let set = with_rule_set(&graph, a, 1);
        let resolver = RuleSetResolver::new();

        assert!(is_rule_set_associated_with_folder(&graph, &resolver, set, a).unwrap());
        assert!(is_rule_set_associated_with_folder(&graph, &resolver, set, child).unwrap());
        assert!(!is_rule_set_associated_with_folder(&graph, &resolver, set, other).unwrap());

        graph
            .add_aspect(child, Aspect::IGNORE_INHERITED_RULES)
            .unwrap();
        let grandchild = folder(&graph, child, "grandchild");
        assert!(!is_rule_set_associated_with_folder(&graph, &resolver, set, grandchild).unwrap());
    }

    #[test]
    fn multiple_owned_sets_is_an_error() {
        let graph = InMemoryGraph::new();
        let a = folder(&graph, graph.root(), "a");
        with_rule_set(&graph, a, 0);
        with_rule_set(&graph, a, 0);
        assert!(matches!(
            owned_rule_set_node(&graph, a),
            Err(RuleServiceError::RuleSet(RuleSetError::MultipleOwnedRuleSets(_)))
        ));
    }
}
