//! Rule persistence and resolved rule lists.
//!
//! Rules live in the graph: each is a rule node under its folder's rule-set
//! node, ordered by sibling position, with its fields held as properties.

use std::collections::HashSet;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::action::ActionService;
use crate::cache::RuleCache;
use crate::error::RuleServiceError;
use crate::graph::{AssocFilter, GraphError, NodeGraph};
use crate::linking::{
    linked_rule_set_node, linking_folders, owned_rule_set_node, rule_set_node, rule_set_owner,
};
use crate::resolver::RuleSetResolver;
use crate::types::{
    Action, Aspect, AssocType, NodeRef, NodeType, Properties, Rule, RuleSetError, RuleType, Value,
};

const PROP_TITLE: &str = "title";
const PROP_DESCRIPTION: &str = "description";
const PROP_RULE_TYPES: &str = "rule-types";
const PROP_APPLIED_TO_CHILDREN: &str = "applied-to-children";
const PROP_EXECUTE_ASYNCHRONOUSLY: &str = "execute-asynchronously";
const PROP_DISABLED: &str = "disabled";
const PROP_ACTION: &str = "action";

const RULE_SET_NAME: &str = "rules";

fn encode_rule(rule: &Rule) -> Result<Properties, RuleServiceError> {
    let types: Vec<&str> = rule.rule_types.iter().map(|t| t.name()).collect();
    let mut props = Properties::new();
    props.insert(PROP_TITLE.to_owned(), Value::from(rule.title.as_str()));
    props.insert(
        PROP_DESCRIPTION.to_owned(),
        Value::from(rule.description.as_deref().unwrap_or_default()),
    );
    props.insert(PROP_RULE_TYPES.to_owned(), Value::from(types.join(",")));
    props.insert(
        PROP_APPLIED_TO_CHILDREN.to_owned(),
        Value::Bool(rule.applied_to_children),
    );
    props.insert(
        PROP_EXECUTE_ASYNCHRONOUSLY.to_owned(),
        Value::Bool(rule.execute_asynchronously),
    );
    props.insert(PROP_DISABLED.to_owned(), Value::Bool(rule.disabled));
    props.insert(
        PROP_ACTION.to_owned(),
        Value::from(serde_json::to_string(&rule.action)?),
    );
    Ok(props)
}

fn decode_rule(graph: &dyn NodeGraph, node: NodeRef) -> Result<Rule, RuleServiceError> {
    if graph.node_type(node)? != NodeType::Rule {
        return Err(RuleSetError::NotARuleNode(node).into());
    }
    let props = graph.properties(node)?;
    let text = |key: &str| props.get(key).and_then(Value::as_str).unwrap_or_default();
    let flag = |key: &str| props.get(key).and_then(Value::as_bool).unwrap_or_default();

    let rule_types = text(PROP_RULE_TYPES)
        .split(',')
        .filter(|s| !s.is_empty())
        .map(str::parse::<RuleType>)
        .collect::<Result<Vec<_>, _>>()?;
    let action: Option<Action> = match props.get(PROP_ACTION).and_then(Value::as_str) {
        Some(json) => serde_json::from_str(json)
            .map_err(|source| RuleServiceError::CorruptRule { node, source })?,
        None => None,
    };
    let description = Some(text(PROP_DESCRIPTION))
        .filter(|d| !d.is_empty())
        .map(str::to_owned);

    Ok(Rule {
        node_ref: Some(node),
        title: text(PROP_TITLE).to_owned(),
        description,
        rule_types,
        action,
        applied_to_children: flag(PROP_APPLIED_TO_CHILDREN),
        execute_asynchronously: flag(PROP_EXECUTE_ASYNCHRONOUSLY),
        disabled: flag(PROP_DISABLED),
    })
}

/// The rule set holding a rule node.
fn rule_set_of(graph: &dyn NodeGraph, rule_node: NodeRef) -> Result<Option<NodeRef>, GraphError> {
    Ok(graph
        .parent_assocs(rule_node, &AssocFilter::of_type(AssocType::Rule).primary())?
        .first()
        .map(|a| a.parent))
}

fn rule_nodes(graph: &dyn NodeGraph, rule_set: NodeRef) -> Result<Vec<NodeRef>, GraphError> {
    Ok(graph
        .child_assocs(rule_set, &AssocFilter::of_type(AssocType::Rule))?
        .into_iter()
        .map(|a| a.child)
        .collect())
}

/// Reads and writes rules, and serves resolved rule lists through a
/// [`RuleCache`].
#[derive(Debug, Default)]
pub struct RuleStore {
    resolver: RuleSetResolver,
    cache: RuleCache,
    disabled_folders: RwLock<HashSet<NodeRef>>,
    disabled_rules: RwLock<HashSet<NodeRef>>,
    disabled_types: RwLock<HashSet<RuleType>>,
}

impl RuleStore {
    #[must_use]
    pub fn new(resolver: RuleSetResolver) -> Self {
        Self {
            resolver,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn resolver(&self) -> &RuleSetResolver {
        &self.resolver
    }

    #[must_use]
    pub fn cache(&self) -> &RuleCache {
        &self.cache
    }

    /// Rules applying to `node`, optionally restricted to one rule type.
    ///
    /// With `include_inherited`, each supplying node contributes, in
    /// resolver order, the rules it holds that apply to children; `node`
    /// itself contributes all of its rules. A rule reached twice is listed
    /// once, at its first position. Disabled rules are included.
    ///
    /// A node that does not exist has no rules.
    ///
    /// # Errors
    ///
    /// Returns [`RuleServiceError::CorruptRule`] when a stored rule cannot be
    /// read back.
    pub fn get_rules(
        &self,
        graph: &dyn NodeGraph,
        node: NodeRef,
        include_inherited: bool,
        rule_type: Option<RuleType>,
    ) -> Result<Vec<Rule>, RuleServiceError> {
        if !graph.exists(node) {
            return Ok(Vec::new());
        }
        let revision = graph.revision();
        let rules = match self.cache.get(node, include_inherited, revision) {
            Some(rules) => rules,
            None => {
                let rules = if include_inherited {
                    self.inherited_rules(graph, node)?
                } else {
                    self.rules_of(graph, node)?
                };
                self.cache
                    .insert(node, include_inherited, revision, rules.clone());
                rules
            }
        };
        Ok(match rule_type {
            Some(t) => rules.into_iter().filter(|r| r.has_type(t)).collect(),
            None => rules,
        })
    }

    fn inherited_rules(
        &self,
        graph: &dyn NodeGraph,
        node: NodeRef,
    ) -> Result<Vec<Rule>, RuleServiceError> {
        let mut seen = HashSet::new();
        let mut rules = Vec::new();
        for supplier in self.resolver.nodes_supplying_rule_sets(graph, node)? {
            let inherited = supplier != node;
            for rule in self.rules_of(graph, supplier)? {
                if inherited && !rule.applied_to_children {
                    continue;
                }
                if let Some(rule_node) = rule.node_ref
                    && !seen.insert(rule_node)
                {
                    continue;
                }
                rules.push(rule);
            }
        }
        Ok(rules)
    }

    /// Rules held by the rule set `folder` owns or links to, in order.
    ///
    /// # Errors
    ///
    /// Returns [`RuleServiceError::CorruptRule`] when a stored rule cannot be
    /// read back.
    pub fn rules_of(
        &self,
        graph: &dyn NodeGraph,
        folder: NodeRef,
    ) -> Result<Vec<Rule>, RuleServiceError> {
        let Some(rule_set) = rule_set_node(graph, folder)? else {
            return Ok(Vec::new());
        };
        rule_nodes(graph, rule_set)?
            .into_iter()
            .map(|n| decode_rule(graph, n))
            .collect()
    }

    /// # Errors
    ///
    /// Returns [`RuleServiceError::NotFound`] when the node does not exist and
    /// [`RuleSetError::NotARuleNode`] when it is not a rule.
    pub fn get_rule(
        &self,
        graph: &dyn NodeGraph,
        rule_node: NodeRef,
    ) -> Result<Rule, RuleServiceError> {
        if !graph.exists(rule_node) {
            return Err(RuleServiceError::NotFound(rule_node));
        }
        decode_rule(graph, rule_node)
    }

    /// The folder owning the rule set that holds `rule_node`.
    ///
    /// # Errors
    ///
    /// Returns [`RuleServiceError::NotFound`] when the node does not exist.
    pub fn get_owning_node(
        &self,
        graph: &dyn NodeGraph,
        rule_node: NodeRef,
    ) -> Result<Option<NodeRef>, RuleServiceError> {
        if !graph.exists(rule_node) {
            return Err(RuleServiceError::NotFound(rule_node));
        }
        match rule_set_of(graph, rule_node)? {
            Some(rule_set) => Ok(rule_set_owner(graph, rule_set)?),
            None => Ok(None),
        }
    }

    /// The rule set `folder` owns, refusing folders that are linked.
    fn writable_rule_set(
        &self,
        graph: &dyn NodeGraph,
        folder: NodeRef,
    ) -> Result<Option<NodeRef>, RuleServiceError> {
        if !graph.exists(folder) {
            return Err(RuleServiceError::NotFound(folder));
        }
        if linked_rule_set_node(graph, folder)?.is_some() {
            return Err(RuleSetError::LinkedFolderReadOnly(folder).into());
        }
        owned_rule_set_node(graph, folder)
    }

    /// The rule set owned by `folder` that holds `rule`.
    fn owned_rule_location(
        &self,
        graph: &dyn NodeGraph,
        folder: NodeRef,
        rule: &Rule,
    ) -> Result<(NodeRef, NodeRef), RuleServiceError> {
        let rule_node = rule
            .node_ref
            .ok_or_else(|| RuleSetError::UnsavedRule(rule.title.clone()))?;
        let owned = self.writable_rule_set(graph, folder)?;
        if !graph.exists(rule_node) {
            return Err(RuleServiceError::NotFound(rule_node));
        }
        match owned {
            Some(rule_set) if rule_set_of(graph, rule_node)? == Some(rule_set) => {
                Ok((rule_set, rule_node))
            }
            _ => Err(RuleSetError::RuleNotInRuleSet {
                rule: rule_node,
                folder,
            }
            .into()),
        }
    }

    /// Create or update `rule` in the rule set owned by `folder`.
    ///
    /// A new rule is appended to the rule set, which is created on demand,
    /// and gets its node reference. The rule is fully validated before the
    /// graph is touched.
    ///
    /// # Errors
    ///
    /// Returns [`RuleServiceError::Validation`] for an incomplete rule or an
    /// unknown action or condition type, and
    /// [`RuleSetError::LinkedFolderReadOnly`] when `folder` is linked.
    pub fn save_rule(
        &self,
        graph: &dyn NodeGraph,
        actions: &ActionService,
        folder: NodeRef,
        rule: &mut Rule,
    ) -> Result<(), RuleServiceError> {
        rule.validate()?;
        if let Some(action) = &rule.action {
            actions.validate(&rule.title, action)?;
        }
        let props = encode_rule(rule)?;

        match rule.node_ref {
            Some(_) => {
                let (_, rule_node) = self.owned_rule_location(graph, folder, rule)?;
                graph.set_properties(rule_node, props)?;
                debug!(%folder, rule = %rule_node, title = %rule.title, "rule updated");
            }
            None => {
                let rule_set = match self.writable_rule_set(graph, folder)? {
                    Some(rule_set) => rule_set,
                    None => {
                        graph
                            .create_node(
                                folder,
                                AssocType::RuleFolder,
                                RULE_SET_NAME,
                                NodeType::RuleSet,
                            )?
                            .child
                    }
                };
                graph.add_aspect(folder, Aspect::RULES)?;
                let rule_node = graph
                    .create_node(rule_set, AssocType::Rule, &rule.title, NodeType::Rule)?
                    .child;
                graph.set_properties(rule_node, props)?;
                rule.node_ref = Some(rule_node);
                info!(%folder, rule = %rule_node, title = %rule.title, "rule saved");
            }
        }
        self.cache.invalidate_all();
        Ok(())
    }

    /// Delete `rule` from the rule set owned by `folder`. An emptied rule set
    /// is removed along with the rules aspect.
    ///
    /// # Errors
    ///
    /// Returns [`RuleSetError::RuleNotInRuleSet`] when `folder` does not own
    /// the rule.
    pub fn remove_rule(
        &self,
        graph: &dyn NodeGraph,
        folder: NodeRef,
        rule: &Rule,
    ) -> Result<(), RuleServiceError> {
        let (rule_set, rule_node) = self.owned_rule_location(graph, folder, rule)?;
        graph.delete_node(rule_node)?;
        self.disabled_rules.write().remove(&rule_node);
        info!(%folder, rule = %rule_node, "rule removed");
        if rule_nodes(graph, rule_set)?.is_empty() {
            self.remove_rule_set(graph, folder, rule_set)?;
        }
        self.cache.invalidate_all();
        Ok(())
    }

    /// Delete every rule `folder` owns, together with its rule set. Folders
    /// linked to the rule set lose the rules aspect.
    ///
    /// # Errors
    ///
    /// Returns [`RuleSetError::LinkedFolderReadOnly`] when `folder` is linked.
    pub fn remove_all_rules(
        &self,
        graph: &dyn NodeGraph,
        folder: NodeRef,
    ) -> Result<(), RuleServiceError> {
        if let Some(rule_set) = self.writable_rule_set(graph, folder)? {
            let rules = rule_nodes(graph, rule_set)?;
            {
                let mut disabled = self.disabled_rules.write();
                for rule_node in &rules {
                    disabled.remove(rule_node);
                }
            }
            self.remove_rule_set(graph, folder, rule_set)?;
            info!(%folder, removed = rules.len(), "all rules removed");
        }
        self.cache.invalidate_all();
        Ok(())
    }

    fn remove_rule_set(
        &self,
        graph: &dyn NodeGraph,
        owner: NodeRef,
        rule_set: NodeRef,
    ) -> Result<(), RuleServiceError> {
        let linkers = linking_folders(graph, rule_set)?;
        graph.delete_node(rule_set)?;
        for folder in std::iter::once(owner).chain(linkers) {
            if graph.exists(folder) {
                graph.remove_aspect(folder, &Aspect::RULES)?;
            }
        }
        Ok(())
    }

    /// Move `rule` to `index` within the rule set owned by `folder`. The
    /// rules in between shift by one.
    ///
    /// # Errors
    ///
    /// Returns [`RuleSetError::PositionOutOfRange`] when `index` is not below
    /// the number of rules.
    pub fn set_rule_position(
        &self,
        graph: &dyn NodeGraph,
        folder: NodeRef,
        rule: &Rule,
        index: usize,
    ) -> Result<(), RuleServiceError> {
        let (rule_set, rule_node) = self.owned_rule_location(graph, folder, rule)?;
        let len = rule_nodes(graph, rule_set)?.len();
        if index >= len {
            return Err(RuleSetError::PositionOutOfRange { index, len }.into());
        }
        graph.set_child_position(rule_set, rule_node, index)?;
        self.cache.invalidate_all();
        debug!(%folder, rule = %rule_node, index, "rule moved");
        Ok(())
    }

    /// Number of rules in the rule set `folder` owns or links to.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NodeNotFound`] if `folder` does not exist.
    pub fn count_rules(&self, graph: &dyn NodeGraph, folder: NodeRef) -> Result<usize, GraphError> {
        match rule_set_node(graph, folder)? {
            Some(rule_set) => Ok(rule_nodes(graph, rule_set)?.len()),
            None => Ok(0),
        }
    }

    #[must_use]
    pub fn has_rules(&self, graph: &dyn NodeGraph, folder: NodeRef) -> bool {
        graph.has_aspect(folder, &Aspect::RULES) && self.count_rules(graph, folder).unwrap_or(0) > 0
    }

    pub fn enable_rules(&self, folder: NodeRef) {
        self.disabled_folders.write().remove(&folder);
    }

    pub fn disable_rules(&self, folder: NodeRef) {
        self.disabled_folders.write().insert(folder);
    }

    #[must_use]
    pub fn rules_enabled(&self, folder: NodeRef) -> bool {
        !self.disabled_folders.read().contains(&folder)
    }

    pub fn enable_rule(&self, rule_node: NodeRef) {
        self.disabled_rules.write().remove(&rule_node);
    }

    pub fn disable_rule(&self, rule_node: NodeRef) {
        self.disabled_rules.write().insert(rule_node);
    }

    #[must_use]
    pub fn is_rule_enabled(&self, rule_node: NodeRef) -> bool {
        !self.disabled_rules.read().contains(&rule_node)
    }

    pub fn enable_rule_type(&self, rule_type: RuleType) {
        self.disabled_types.write().remove(&rule_type);
    }

    pub fn disable_rule_type(&self, rule_type: RuleType) {
        self.disabled_types.write().insert(rule_type);
    }

    #[must_use]
    pub fn is_rule_type_enabled(&self, rule_type: RuleType) -> bool {
        !self.disabled_types.read().contains(&rule_type)
    }
}
