use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::action::Action;
use super::error::ValidationError;
use super::node::NodeRef;

/// The class of lifecycle events a rule reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleType {
    /// Items created in or added to the folder.
    Inbound,
    /// Items deleted from or moved out of the folder.
    Outbound,
    /// Items in the folder whose content or properties change.
    Update,
}

impl RuleType {
    #[must_use]
    pub fn all() -> &'static [RuleType] {
        &[RuleType::Inbound, RuleType::Outbound, RuleType::Update]
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            RuleType::Inbound => "inbound",
            RuleType::Outbound => "outbound",
            RuleType::Update => "update",
        }
    }

    #[must_use]
    pub fn display_label(self) -> &'static str {
        match self {
            RuleType::Inbound => "Items are created or enter this folder",
            RuleType::Outbound => "Items are deleted or leave this folder",
            RuleType::Update => "Items are updated",
        }
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RuleType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RuleType::all()
            .iter()
            .copied()
            .find(|t| t.name() == s)
            .ok_or_else(|| ValidationError::UnknownRuleType {
                name: s.to_owned(),
            })
    }
}

/// A rule: when an event of one of its types happens in the folder, run
/// the action against the node the event is about.
///
/// A rule gets its node reference when first saved with
/// [`RuleService::save_rule()`](crate::RuleService::save_rule); two rules
/// loaded from the same rule node compare equal.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub(crate) node_ref: Option<NodeRef>,
    pub title: String,
    pub description: Option<String>,
    pub rule_types: Vec<RuleType>,
    pub action: Option<Action>,
    pub applied_to_children: bool,
    pub execute_asynchronously: bool,
    pub disabled: bool,
}

impl Rule {
    /// Create an unsaved inbound rule with the given title and no action.
    #[must_use]
    pub fn new(title: &str) -> Self {
        Self {
            node_ref: None,
            title: title.to_owned(),
            description: None,
            rule_types: vec![RuleType::Inbound],
            action: None,
            applied_to_children: false,
            execute_asynchronously: false,
            disabled: false,
        }
    }

    /// The rule node holding this rule, once saved.
    #[must_use]
    pub fn node_ref(&self) -> Option<NodeRef> {
        self.node_ref
    }

    #[must_use]
    pub fn description(mut self, description: &str) -> Self {
        self.description = Some(description.to_owned());
        self
    }

    /// Replace the rule types with a single type.
    #[must_use]
    pub fn rule_type(mut self, rule_type: RuleType) -> Self {
        self.rule_types = vec![rule_type];
        self
    }

    #[must_use]
    pub fn rule_types(mut self, rule_types: &[RuleType]) -> Self {
        self.rule_types = rule_types.to_vec();
        self
    }

    #[must_use]
    pub fn action(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }

    #[must_use]
    pub fn applied_to_children(mut self, applied: bool) -> Self {
        self.applied_to_children = applied;
        self
    }

    #[must_use]
    pub fn asynchronous(mut self, asynchronous: bool) -> Self {
        self.execute_asynchronously = asynchronous;
        self
    }

    #[must_use]
    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    #[must_use]
    pub fn has_type(&self, rule_type: RuleType) -> bool {
        self.rule_types.contains(&rule_type)
    }

    /// Check the invariants every stored rule must satisfy.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when the title is blank, the action is
    /// missing, or no rule type is set.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::MissingTitle);
        }
        if self.rule_types.is_empty() {
            return Err(ValidationError::NoRuleTypes {
                title: self.title.clone(),
            });
        }
        if self.action.is_none() {
            return Err(ValidationError::MissingAction {
                title: self.title.clone(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let types: Vec<&str> = self.rule_types.iter().map(|t| t.name()).collect();
        write!(f, "Rule(\"{}\", [{}])", self.title, types.join(", "))
    }
}
