use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use parking_lot::RwLock;

use super::{AssocFilter, GraphError, GraphEvent, NodeGraph};
use crate::types::{
    Aspect, AssocType, ChildAssoc, NodeRef, NodeType, PROP_CONTENT, PROP_NAME, Properties, Value,
};

#[derive(Debug, Clone, Copy)]
struct Edge {
    node: NodeRef,
    assoc_type: AssocType,
    primary: bool,
}

#[derive(Debug)]
struct NodeRecord {
    node_type: NodeType,
    aspects: BTreeSet<Aspect>,
    properties: Properties,
    children: Vec<Edge>,
    parents: Vec<Edge>,
}

impl NodeRecord {
    fn new(node_type: NodeType) -> Self {
        Self {
            node_type,
            aspects: BTreeSet::new(),
            properties: Properties::new(),
            children: Vec::new(),
            parents: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct GraphState {
    nodes: HashMap<NodeRef, NodeRecord>,
    next_id: u64,
    revision: u64,
    events: Vec<GraphEvent>,
}

impl GraphState {
    fn record(&self, node: NodeRef) -> Result<&NodeRecord, GraphError> {
        self.nodes.get(&node).ok_or(GraphError::NodeNotFound(node))
    }

    fn record_mut(&mut self, node: NodeRef) -> Result<&mut NodeRecord, GraphError> {
        self.nodes
            .get_mut(&node)
            .ok_or(GraphError::NodeNotFound(node))
    }

    fn allocate(&mut self, node_type: NodeType) -> NodeRef {
        self.next_id += 1;
        let node = NodeRef::new(self.next_id);
        self.nodes.insert(node, NodeRecord::new(node_type));
        node
    }

    fn link(
        &mut self,
        parent: NodeRef,
        child: NodeRef,
        assoc_type: AssocType,
        primary: bool,
    ) -> Result<ChildAssoc, GraphError> {
        let parent_record = self.record_mut(parent)?;
        parent_record.children.push(Edge {
            node: child,
            assoc_type,
            primary,
        });
        let nth_sibling = parent_record.children.len() - 1;
        self.record_mut(child)?.parents.push(Edge {
            node: parent,
            assoc_type,
            primary,
        });
        self.revision += 1;
        Ok(ChildAssoc {
            parent,
            child,
            assoc_type,
            primary,
            nth_sibling,
        })
    }

    /// Remove the first association from `parent` to `child` matching `pred`.
    fn unlink(
        &mut self,
        parent: NodeRef,
        child: NodeRef,
        pred: impl Fn(&Edge) -> bool,
    ) -> Option<Edge> {
        let parent_record = self.nodes.get_mut(&parent)?;
        let pos = parent_record
            .children
            .iter()
            .position(|e| e.node == child && pred(e))?;
        let edge = parent_record.children.remove(pos);
        if let Some(child_record) = self.nodes.get_mut(&child)
            && let Some(pos) = child_record.parents.iter().position(|e| {
                e.node == parent && e.assoc_type == edge.assoc_type && e.primary == edge.primary
            })
        {
            child_record.parents.remove(pos);
        }
        self.revision += 1;
        Some(edge)
    }

    /// Whether `candidate` is `node` or reachable upward from it.
    fn is_ancestor_or_self(&self, candidate: NodeRef, node: NodeRef) -> bool {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([node]);
        while let Some(current) = queue.pop_front() {
            if current == candidate {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(record) = self.nodes.get(&current) {
                queue.extend(record.parents.iter().map(|e| e.node));
            }
        }
        false
    }

    fn delete_subtree(&mut self, node: NodeRef) {
        let mut doomed = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            let Some(record) = self.nodes.get(&current) else {
                continue;
            };
            doomed.push(current);
            stack.extend(
                record
                    .children
                    .iter()
                    .rev()
                    .filter(|e| e.primary)
                    .map(|e| e.node),
            );
        }

        for current in doomed {
            let Some(record) = self.nodes.remove(&current) else {
                continue;
            };
            for edge in &record.parents {
                if let Some(parent) = self.nodes.get_mut(&edge.node) {
                    parent.children.retain(|e| e.node != current);
                }
            }
            for edge in &record.children {
                if let Some(child) = self.nodes.get_mut(&edge.node) {
                    child.parents.retain(|e| e.node != current);
                }
            }
            self.events.push(GraphEvent::NodeDeleted {
                node: current,
                node_type: record.node_type,
                parents: record
                    .parents
                    .iter()
                    .map(|e| (e.node, e.assoc_type))
                    .collect(),
            });
        }
        self.revision += 1;
    }
}

/// A [`NodeGraph`] held entirely in memory.
///
/// Starts with a single root container. By default hierarchical cycles are
/// rejected the way a persistent store would; [`allowing_cycles()`](Self::allowing_cycles)
/// builds a store that accepts them.
///
/// Every change appends a [`GraphEvent`] that stays in memory until
/// [`take_events()`](NodeGraph::take_events) drains it. An embedding that
/// never calls [`RuleService::process_graph_events()`](crate::RuleService::process_graph_events)
/// must drain the log itself; [`event_backlog()`](Self::event_backlog)
/// reports its size.
#[derive(Debug)]
pub struct InMemoryGraph {
    state: RwLock<GraphState>,
    root: NodeRef,
    allow_cycles: bool,
}

impl Default for InMemoryGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::build(false)
    }

    /// A store whose `add_child` accepts associations that close a cycle.
    #[must_use]
    pub fn allowing_cycles() -> Self {
        Self::build(true)
    }

    /// Number of recorded events not yet taken.
    #[must_use]
    pub fn event_backlog(&self) -> usize {
        self.state.read().events.len()
    }

    fn build(allow_cycles: bool) -> Self {
        let mut state = GraphState::default();
        let root = state.allocate(NodeType::Container);
        if let Some(record) = state.nodes.get_mut(&root) {
            record
                .properties
                .insert(PROP_NAME.to_owned(), Value::from("root"));
        }
        Self {
            state: RwLock::new(state),
            root,
            allow_cycles,
        }
    }

    #[must_use]
    pub fn root(&self) -> NodeRef {
        self.root
    }

    /// Number of live nodes, root included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NodeGraph for InMemoryGraph {
    fn exists(&self, node: NodeRef) -> bool {
        self.state.read().nodes.contains_key(&node)
    }

    fn node_type(&self, node: NodeRef) -> Result<NodeType, GraphError> {
        Ok(self.state.read().record(node)?.node_type.clone())
    }

    fn has_aspect(&self, node: NodeRef, aspect: &Aspect) -> bool {
        self.state
            .read()
            .nodes
            .get(&node)
            .is_some_and(|r| r.aspects.contains(aspect))
    }

    fn aspects(&self, node: NodeRef) -> Result<Vec<Aspect>, GraphError> {
        Ok(self
            .state
            .read()
            .record(node)?
            .aspects
            .iter()
            .cloned()
            .collect())
    }

    fn add_aspect(&self, node: NodeRef, aspect: Aspect) -> Result<(), GraphError> {
        let mut state = self.state.write();
        if state.record_mut(node)?.aspects.insert(aspect.clone()) {
            state.revision += 1;
            state.events.push(GraphEvent::AspectAdded { node, aspect });
        }
        Ok(())
    }

    fn remove_aspect(&self, node: NodeRef, aspect: &Aspect) -> Result<(), GraphError> {
        let mut state = self.state.write();
        if state.record_mut(node)?.aspects.remove(aspect) {
            state.revision += 1;
            state.events.push(GraphEvent::AspectRemoved {
                node,
                aspect: aspect.clone(),
            });
        }
        Ok(())
    }

    fn property(&self, node: NodeRef, key: &str) -> Option<Value> {
        self.state
            .read()
            .nodes
            .get(&node)
            .and_then(|r| r.properties.get(key).cloned())
    }

    fn properties(&self, node: NodeRef) -> Result<Properties, GraphError> {
        Ok(self.state.read().record(node)?.properties.clone())
    }

    fn set_properties(&self, node: NodeRef, properties: Properties) -> Result<(), GraphError> {
        let mut state = self.state.write();
        let record = state.record_mut(node)?;
        let mut changed = Vec::new();
        for (key, value) in properties {
            if record.properties.get(&key) != Some(&value) {
                changed.push(key.clone());
                record.properties.insert(key, value);
            }
        }
        if !changed.is_empty() {
            state.revision += 1;
            state
                .events
                .push(GraphEvent::PropertiesUpdated { node, changed });
        }
        Ok(())
    }

    fn write_content(&self, node: NodeRef, content: &str) -> Result<(), GraphError> {
        let mut state = self.state.write();
        let record = state.record_mut(node)?;
        let created = record
            .properties
            .insert(PROP_CONTENT.to_owned(), Value::from(content))
            .is_none();
        state
            .events
            .push(GraphEvent::ContentWritten { node, created });
        Ok(())
    }

    fn create_node(
        &self,
        parent: NodeRef,
        assoc_type: AssocType,
        name: &str,
        node_type: NodeType,
    ) -> Result<ChildAssoc, GraphError> {
        let mut state = self.state.write();
        state.record(parent)?;
        let child = state.allocate(node_type.clone());
        state
            .record_mut(child)?
            .properties
            .insert(PROP_NAME.to_owned(), Value::from(name));
        let assoc = state.link(parent, child, assoc_type, true)?;
        state.events.push(GraphEvent::NodeCreated {
            parent,
            child,
            assoc_type,
            node_type,
        });
        Ok(assoc)
    }

    fn add_child(
        &self,
        parent: NodeRef,
        child: NodeRef,
        assoc_type: AssocType,
    ) -> Result<ChildAssoc, GraphError> {
        let mut state = self.state.write();
        state.record(parent)?;
        state.record(child)?;
        if !self.allow_cycles && state.is_ancestor_or_self(child, parent) {
            return Err(GraphError::CyclicChildRelationship { parent, child });
        }
        let assoc = state.link(parent, child, assoc_type, false)?;
        state.events.push(GraphEvent::ChildAdded {
            parent,
            child,
            assoc_type,
        });
        Ok(assoc)
    }

    fn remove_child(&self, parent: NodeRef, child: NodeRef) -> Result<(), GraphError> {
        let mut state = self.state.write();
        let mut edges = state
            .record(parent)?
            .children
            .iter()
            .filter(|e| e.node == child)
            .peekable();
        if edges.peek().is_none() {
            return Err(GraphError::AssociationNotFound { parent, child });
        }
        let only_primary = edges.all(|e| e.primary);
        if only_primary {
            state.delete_subtree(child);
            return Ok(());
        }
        if let Some(edge) = state.unlink(parent, child, |e| !e.primary) {
            state.events.push(GraphEvent::ChildRemoved {
                parent,
                child,
                assoc_type: edge.assoc_type,
            });
        }
        Ok(())
    }

    fn delete_node(&self, node: NodeRef) -> Result<(), GraphError> {
        if node == self.root {
            return Err(GraphError::RootNode(node));
        }
        let mut state = self.state.write();
        state.record(node)?;
        state.delete_subtree(node);
        Ok(())
    }

    fn move_node(&self, node: NodeRef, new_parent: NodeRef) -> Result<ChildAssoc, GraphError> {
        if node == self.root {
            return Err(GraphError::RootNode(node));
        }
        let mut state = self.state.write();
        state.record(new_parent)?;
        let primary_parent = state
            .record(node)?
            .parents
            .iter()
            .find(|e| e.primary)
            .copied()
            .ok_or(GraphError::NodeNotFound(node))?;
        if state.is_ancestor_or_self(node, new_parent) {
            return Err(GraphError::CyclicChildRelationship {
                parent: new_parent,
                child: node,
            });
        }
        state.unlink(primary_parent.node, node, |e| e.primary);
        let assoc = state.link(new_parent, node, primary_parent.assoc_type, true)?;
        state.events.push(GraphEvent::ChildRemoved {
            parent: primary_parent.node,
            child: node,
            assoc_type: primary_parent.assoc_type,
        });
        state.events.push(GraphEvent::ChildAdded {
            parent: new_parent,
            child: node,
            assoc_type: primary_parent.assoc_type,
        });
        Ok(assoc)
    }

    fn copy_node(&self, node: NodeRef, new_parent: NodeRef) -> Result<NodeRef, GraphError> {
        let mut state = self.state.write();
        state.record(new_parent)?;
        let source = state.record(node)?;
        let node_type = source.node_type.clone();
        let properties = source.properties.clone();
        let aspects: BTreeSet<Aspect> = source
            .aspects
            .iter()
            .filter(|a| **a != Aspect::RULES)
            .cloned()
            .collect();

        let copy = state.allocate(node_type.clone());
        let record = state.record_mut(copy)?;
        record.properties = properties;
        record.aspects = aspects;
        state.link(new_parent, copy, AssocType::Contains, true)?;
        state.events.push(GraphEvent::NodeCreated {
            parent: new_parent,
            child: copy,
            assoc_type: AssocType::Contains,
            node_type,
        });
        Ok(copy)
    }

    fn child_assocs(
        &self,
        parent: NodeRef,
        filter: &AssocFilter,
    ) -> Result<Vec<ChildAssoc>, GraphError> {
        let state = self.state.read();
        let assocs = state
            .record(parent)?
            .children
            .iter()
            .enumerate()
            .map(|(nth_sibling, e)| ChildAssoc {
                parent,
                child: e.node,
                assoc_type: e.assoc_type,
                primary: e.primary,
                nth_sibling,
            })
            .filter(|a| filter.matches(a))
            .take(filter.max_results().unwrap_or(usize::MAX))
            .collect();
        Ok(assocs)
    }

    fn parent_assocs(
        &self,
        child: NodeRef,
        filter: &AssocFilter,
    ) -> Result<Vec<ChildAssoc>, GraphError> {
        let state = self.state.read();
        let assocs = state
            .record(child)?
            .parents
            .iter()
            .map(|e| {
                let nth_sibling = state
                    .nodes
                    .get(&e.node)
                    .and_then(|p| {
                        p.children.iter().position(|c| {
                            c.node == child && c.assoc_type == e.assoc_type && c.primary == e.primary
                        })
                    })
                    .unwrap_or_default();
                ChildAssoc {
                    parent: e.node,
                    child,
                    assoc_type: e.assoc_type,
                    primary: e.primary,
                    nth_sibling,
                }
            })
            .filter(|a| filter.matches(a))
            .take(filter.max_results().unwrap_or(usize::MAX))
            .collect();
        Ok(assocs)
    }

    fn set_child_position(
        &self,
        parent: NodeRef,
        child: NodeRef,
        index: usize,
    ) -> Result<(), GraphError> {
        let mut state = self.state.write();
        let record = state.record_mut(parent)?;
        let current = record
            .children
            .iter()
            .position(|e| e.node == child)
            .ok_or(GraphError::AssociationNotFound { parent, child })?;
        if index >= record.children.len() {
            return Err(GraphError::PositionOutOfRange { parent, index });
        }
        let edge = record.children.remove(current);
        record.children.insert(index, edge);
        state.revision += 1;
        Ok(())
    }

    fn revision(&self) -> u64 {
        self.state.read().revision
    }

    fn take_events(&self) -> Vec<GraphEvent> {
        std::mem::take(&mut self.state.write().events)
    }
}
