//! Walks the hierarchy upward to find the nodes whose rule sets apply to a
//! node.

use std::collections::HashSet;

use crate::graph::{AssocFilter, GraphError, NodeGraph};
use crate::types::{Aspect, NodeRef};

/// Breadth-first ancestor walk over hierarchical parent associations.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleSetResolver {
    ignore_aspect_on_target: bool,
}

impl RuleSetResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Let the "ignore inherited rules" aspect on the start node cut off its
    /// own ancestors too.
    #[must_use]
    pub fn ignore_aspect_on_target(mut self, enabled: bool) -> Self {
        self.ignore_aspect_on_target = enabled;
        self
    }

    /// Every node whose rule set may apply to `node`: its hierarchical
    /// ancestors and `node` itself, each once.
    ///
    /// Nodes are ordered by depth, furthest level first. Within a level they
    /// keep the order in which the graph returned their child's parent
    /// associations. `node` is always last. A node carrying
    /// [`Aspect::IGNORE_INHERITED_RULES`] is included but its parents are not
    /// visited.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NodeNotFound`] if `node` does not exist.
    pub fn nodes_supplying_rule_sets(
        &self,
        graph: &dyn NodeGraph,
        node: NodeRef,
    ) -> Result<Vec<NodeRef>, GraphError> {
        if !graph.exists(node) {
            return Err(GraphError::NodeNotFound(node));
        }

        let filter = AssocFilter::hierarchical();
        let mut seen = HashSet::from([node]);
        let mut levels = vec![vec![node]];
        let mut frontier = vec![node];

        while !frontier.is_empty() {
            let mut next = Vec::new();
            for &current in &frontier {
                let stops_here = graph.has_aspect(current, &Aspect::IGNORE_INHERITED_RULES)
                    && (current != node || self.ignore_aspect_on_target);
                if stops_here {
                    continue;
                }
                for assoc in graph.parent_assocs(current, &filter)? {
                    if seen.insert(assoc.parent) {
                        next.push(assoc.parent);
                    }
                }
            }
            if !next.is_empty() {
                levels.push(next.clone());
            }
            frontier = next;
        }

        Ok(levels.into_iter().rev().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::InMemoryGraph;
    use crate::types::{AssocType, NodeType};

    fn folder(graph: &InMemoryGraph, parent: NodeRef, name: &str) -> NodeRef {
        graph
            .create_node(parent, AssocType::Contains, name, NodeType::Folder)
            .unwrap()
            .child
    }

    #[test]
    fn single_node() {
        let graph = InMemoryGraph::new();
        let a = folder(&graph, graph.root(), "a");
        graph.add_aspect(a, Aspect::IGNORE_INHERITED_RULES).unwrap();
        let nodes = RuleSetResolver::new()
            .nodes_supplying_rule_sets(&graph, a)
            .unwrap();
        assert_eq!(nodes, vec![graph.root(), a]);
    }

    #[test]
    fn ignore_on_target_when_enabled() {
        let graph = InMemoryGraph::new();
        let a = folder(&graph, graph.root(), "a");
        graph.add_aspect(a, Aspect::IGNORE_INHERITED_RULES).unwrap();
        let nodes = RuleSetResolver::new()
            .ignore_aspect_on_target(true)
            .nodes_supplying_rule_sets(&graph, a)
            .unwrap();
        assert_eq!(nodes, vec![a]);
    }

    #[test]
    fn diamond_visits_each_parent_before_grandparent() {
        let graph = InMemoryGraph::new();
        let a = folder(&graph, graph.root(), "a");
        let b = folder(&graph, a, "b");
        let c = folder(&graph, a, "c");
        let d = folder(&graph, b, "d");
        graph.add_child(c, d, AssocType::Contains).unwrap();
        graph.add_aspect(a, Aspect::IGNORE_INHERITED_RULES).unwrap();

        let nodes = RuleSetResolver::new()
            .nodes_supplying_rule_sets(&graph, d)
            .unwrap();
        assert_eq!(nodes, vec![a, b, c, d]);
    }

    #[test]
    fn membership_edges_are_not_followed() {
        let graph = InMemoryGraph::new();
        let group = graph
            .create_node(graph.root(), AssocType::Member, "group", NodeType::Container)
            .unwrap()
            .child;
        let user = folder(&graph, graph.root(), "user");
        graph.add_child(group, user, AssocType::Member).unwrap();
        let nodes = RuleSetResolver::new()
            .nodes_supplying_rule_sets(&graph, user)
            .unwrap();
        assert_eq!(nodes, vec![graph.root(), user]);
    }

    #[test]
    fn cycle_terminates() {
        let graph = InMemoryGraph::allowing_cycles();
        let a = folder(&graph, graph.root(), "a");
        let b = folder(&graph, a, "b");
        let c = folder(&graph, b, "c");
        graph.add_child(c, a, AssocType::Contains).unwrap();

        let nodes = RuleSetResolver::new()
            .nodes_supplying_rule_sets(&graph, c)
            .unwrap();
        assert_eq!(nodes.len(), 4);
        assert_eq!(nodes.last(), Some(&c));
        assert!(nodes.contains(&a) && nodes.contains(&b) && nodes.contains(&graph.root()));
    }

    #[test]
    fn missing_node() {
        let graph = InMemoryGraph::new();
        assert!(matches!(
            RuleSetResolver::new().nodes_supplying_rule_sets(&graph, NodeRef::new(42)),
            Err(GraphError::NodeNotFound(_))
        ));
    }
}
