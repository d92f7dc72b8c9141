//! The node-graph store the rule engine runs on.
//!
//! The engine only ever talks to the store through [`NodeGraph`]. An
//! in-memory implementation, [`InMemoryGraph`], is provided for embedding
//! and for tests.

mod memory;

use thiserror::Error;

use crate::types::{Aspect, AssocType, ChildAssoc, NodeRef, NodeType, Properties, Value};

pub use memory::InMemoryGraph;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("node {0} does not exist")]
    NodeNotFound(NodeRef),

    #[error("associating {child} under {parent} would create a cyclic child relationship")]
    CyclicChildRelationship { parent: NodeRef, child: NodeRef },

    #[error("no association from {parent} to {child}")]
    AssociationNotFound { parent: NodeRef, child: NodeRef },

    #[error("position {index} is out of range for the children of {parent}")]
    PositionOutOfRange { parent: NodeRef, index: usize },

    #[error("the store root {0} cannot be deleted or moved")]
    RootNode(NodeRef),
}

/// Restricts which associations an association query returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssocFilter {
    assoc_type: Option<AssocType>,
    primary_only: bool,
    hierarchical_only: bool,
    limit: Option<usize>,
}

impl AssocFilter {
    /// Match every association.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn of_type(assoc_type: AssocType) -> Self {
        Self {
            assoc_type: Some(assoc_type),
            ..Self::default()
        }
    }

    /// Match containment-style associations only.
    #[must_use]
    pub fn hierarchical() -> Self {
        Self {
            hierarchical_only: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn primary(mut self) -> Self {
        self.primary_only = true;
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn max_results(&self) -> Option<usize> {
        self.limit
    }

    #[must_use]
    pub fn matches(&self, assoc: &ChildAssoc) -> bool {
        self.assoc_type.is_none_or(|t| t == assoc.assoc_type)
            && (!self.primary_only || assoc.primary)
            && (!self.hierarchical_only || assoc.assoc_type.is_hierarchical())
    }
}

/// A lifecycle change recorded by the store, drained with
/// [`NodeGraph::take_events()`].
#[derive(Debug, Clone, PartialEq)]
pub enum GraphEvent {
    NodeCreated {
        parent: NodeRef,
        child: NodeRef,
        assoc_type: AssocType,
        node_type: NodeType,
    },
    /// An existing node gained a parent (secondary association or move).
    ChildAdded {
        parent: NodeRef,
        child: NodeRef,
        assoc_type: AssocType,
    },
    /// A node lost a parent without being deleted.
    ChildRemoved {
        parent: NodeRef,
        child: NodeRef,
        assoc_type: AssocType,
    },
    NodeDeleted {
        node: NodeRef,
        node_type: NodeType,
        /// Former parents in association order, with the association type.
        parents: Vec<(NodeRef, AssocType)>,
    },
    ContentWritten {
        node: NodeRef,
        /// True for the first write to the node.
        created: bool,
    },
    PropertiesUpdated {
        node: NodeRef,
        changed: Vec<String>,
    },
    AspectAdded {
        node: NodeRef,
        aspect: Aspect,
    },
    AspectRemoved {
        node: NodeRef,
        aspect: Aspect,
    },
}

/// A transactional node-graph store.
///
/// Association queries return associations in a stable order: children in
/// sibling order, parents in the order the associations were created. The
/// rule engine treats that order as authoritative.
pub trait NodeGraph: Send + Sync {
    fn exists(&self, node: NodeRef) -> bool;

    /// # Errors
    ///
    /// Returns [`GraphError::NodeNotFound`] if the node does not exist.
    fn node_type(&self, node: NodeRef) -> Result<NodeType, GraphError>;

    /// False for nodes that do not exist.
    fn has_aspect(&self, node: NodeRef, aspect: &Aspect) -> bool;

    /// # Errors
    ///
    /// Returns [`GraphError::NodeNotFound`] if the node does not exist.
    fn aspects(&self, node: NodeRef) -> Result<Vec<Aspect>, GraphError>;

    /// Adding an aspect the node already has is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NodeNotFound`] if the node does not exist.
    fn add_aspect(&self, node: NodeRef, aspect: Aspect) -> Result<(), GraphError>;

    /// Removing an aspect the node does not have is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NodeNotFound`] if the node does not exist.
    fn remove_aspect(&self, node: NodeRef, aspect: &Aspect) -> Result<(), GraphError>;

    /// `None` when the node or the property does not exist.
    fn property(&self, node: NodeRef, key: &str) -> Option<Value>;

    /// # Errors
    ///
    /// Returns [`GraphError::NodeNotFound`] if the node does not exist.
    fn properties(&self, node: NodeRef) -> Result<Properties, GraphError>;

    /// Merge the given properties into the node's properties.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NodeNotFound`] if the node does not exist.
    fn set_properties(&self, node: NodeRef, properties: Properties) -> Result<(), GraphError>;

    /// # Errors
    ///
    /// Returns [`GraphError::NodeNotFound`] if the node does not exist.
    fn set_property(&self, node: NodeRef, key: &str, value: Value) -> Result<(), GraphError> {
        let mut properties = Properties::new();
        properties.insert(key.to_owned(), value);
        self.set_properties(node, properties)
    }

    /// # Errors
    ///
    /// Returns [`GraphError::NodeNotFound`] if the node does not exist.
    fn write_content(&self, node: NodeRef, content: &str) -> Result<(), GraphError>;

    /// Create a node under `parent` through a new primary association.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NodeNotFound`] if the parent does not exist.
    fn create_node(
        &self,
        parent: NodeRef,
        assoc_type: AssocType,
        name: &str,
        node_type: NodeType,
    ) -> Result<ChildAssoc, GraphError>;

    /// Add a secondary association from `parent` to an existing `child`.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::CyclicChildRelationship`] if `child` is `parent`
    /// or one of its ancestors, and [`GraphError::NodeNotFound`] if either
    /// node is missing.
    fn add_child(
        &self,
        parent: NodeRef,
        child: NodeRef,
        assoc_type: AssocType,
    ) -> Result<ChildAssoc, GraphError>;

    /// Remove the association from `parent` to `child`. When `parent` holds
    /// both a secondary and the primary association to `child`, the
    /// secondary one goes; removing the primary association deletes the
    /// child.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::AssociationNotFound`] if no such association
    /// exists.
    fn remove_child(&self, parent: NodeRef, child: NodeRef) -> Result<(), GraphError>;

    /// Delete a node, its primary descendants, and every association
    /// pointing at any of them.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NodeNotFound`] if the node does not exist.
    fn delete_node(&self, node: NodeRef) -> Result<(), GraphError>;

    /// Re-home a node's primary association under `new_parent`.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::CyclicChildRelationship`] if `new_parent` lies
    /// below `node`.
    fn move_node(&self, node: NodeRef, new_parent: NodeRef) -> Result<ChildAssoc, GraphError>;

    /// Shallow copy of a node (type, aspects, properties) under `new_parent`.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NodeNotFound`] if either node is missing.
    fn copy_node(&self, node: NodeRef, new_parent: NodeRef) -> Result<NodeRef, GraphError>;

    /// # Errors
    ///
    /// Returns [`GraphError::NodeNotFound`] if the node does not exist.
    fn child_assocs(
        &self,
        parent: NodeRef,
        filter: &AssocFilter,
    ) -> Result<Vec<ChildAssoc>, GraphError>;

    /// # Errors
    ///
    /// Returns [`GraphError::NodeNotFound`] if the node does not exist.
    fn parent_assocs(
        &self,
        child: NodeRef,
        filter: &AssocFilter,
    ) -> Result<Vec<ChildAssoc>, GraphError>;

    /// Move `child` to `index` among `parent`'s children, shifting the
    /// siblings in between by one.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::PositionOutOfRange`] if `index` is not a valid
    /// position.
    fn set_child_position(
        &self,
        parent: NodeRef,
        child: NodeRef,
        index: usize,
    ) -> Result<(), GraphError>;

    /// Counter bumped by every change that can alter a rule lookup: nodes
    /// created or deleted, associations added, removed or reordered, aspects
    /// toggled, properties changed. Content writes do not count.
    fn revision(&self) -> u64;

    /// Drain the events recorded since the previous call. Events accumulate
    /// until drained.
    fn take_events(&self) -> Vec<GraphEvent>;
}
