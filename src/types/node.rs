use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Property holding a node's name. Changing only this property is a rename.
pub const PROP_NAME: &str = "name";

/// Property holding the written content of a content node.
pub const PROP_CONTENT: &str = "content";

/// Opaque reference to a node in the graph store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeRef(u64);

impl NodeRef {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node://{}", self.0)
    }
}

/// The type of a node. Rule-set and rule nodes are the only types the rule
/// engine creates itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeType {
    Folder,
    Container,
    Content,
    RuleSet,
    Rule,
    Other(String),
}

impl NodeType {
    /// Whether nodes of this type can hold rules and inherit them.
    #[must_use]
    pub fn is_folder(&self) -> bool {
        matches!(self, NodeType::Folder | NodeType::Container)
    }

    /// Whether the node belongs to the rule engine's own storage.
    #[must_use]
    pub fn is_rule_storage(&self) -> bool {
        matches!(self, NodeType::RuleSet | NodeType::Rule)
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeType::Folder => write!(f, "folder"),
            NodeType::Container => write!(f, "container"),
            NodeType::Content => write!(f, "content"),
            NodeType::RuleSet => write!(f, "rule-set"),
            NodeType::Rule => write!(f, "rule"),
            NodeType::Other(name) => write!(f, "{name}"),
        }
    }
}

/// A tag attached to a node that enables optional behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Aspect(Cow<'static, str>);

impl Aspect {
    /// Carried by every folder that owns or links to a rule set.
    pub const RULES: Aspect = Aspect(Cow::Borrowed("rules"));

    /// Stops rule inheritance from the carrying node's ancestors.
    pub const IGNORE_INHERITED_RULES: Aspect = Aspect(Cow::Borrowed("ignore-inherited-rules"));

    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Aspect {
    fn from(name: &str) -> Self {
        Aspect::new(name)
    }
}

impl fmt::Display for Aspect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The type of a parent/child association.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssocType {
    /// Folder containment.
    Contains,
    /// Generic child association.
    Children,
    /// Folder to rule-set node.
    RuleFolder,
    /// Rule-set node to rule node.
    Rule,
    /// Group or user membership. Not a hierarchy edge.
    Member,
}

impl AssocType {
    /// Only containment-style associations count as hierarchy edges for
    /// rule inheritance.
    #[must_use]
    pub fn is_hierarchical(self) -> bool {
        matches!(self, AssocType::Contains | AssocType::Children)
    }
}

/// A parent/child association as returned by the graph store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChildAssoc {
    pub parent: NodeRef,
    pub child: NodeRef,
    pub assoc_type: AssocType,
    pub primary: bool,
    /// Position among the parent's children.
    pub nth_sibling: usize,
}
