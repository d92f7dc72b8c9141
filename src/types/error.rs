use thiserror::Error;

use super::node::NodeRef;

/// A rule that cannot be stored as given.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("rule title is required")]
    MissingTitle,

    #[error("rule '{title}' has no action")]
    MissingAction { title: String },

    #[error("rule '{title}' has no rule type")]
    NoRuleTypes { title: String },

    #[error("unknown rule type '{name}'")]
    UnknownRuleType { name: String },

    #[error("unknown action type '{name}' in rule '{rule}'")]
    UnknownActionType { rule: String, name: String },

    #[error("unknown condition type '{name}' in rule '{rule}'")]
    UnknownConditionType { rule: String, name: String },
}

/// An operation that is invalid given the current state of the rule sets,
/// as opposed to a malformed rule.
#[derive(Debug, Error)]
pub enum RuleSetError {
    #[error("{0} owns more than one rule set")]
    MultipleOwnedRuleSets(NodeRef),

    #[error("{0} is linked to another folder's rule set; its rules are read-only")]
    LinkedFolderReadOnly(NodeRef),

    #[error("{0} already owns rules and cannot be linked to another rule set")]
    AlreadyOwnsRules(NodeRef),

    #[error("{0} has no rule set to link to")]
    NothingToLink(NodeRef),

    #[error("{0} cannot be linked to its own rule set")]
    SelfLink(NodeRef),

    #[error("rule {rule} is not in the rule set owned by {folder}")]
    RuleNotInRuleSet { rule: NodeRef, folder: NodeRef },

    #[error("rule {0} has not been saved")]
    UnsavedRule(String),

    #[error("{0} is not a rule node")]
    NotARuleNode(NodeRef),

    #[error("{0} is not a rule-set node")]
    NotARuleSetNode(NodeRef),

    #[error("position {index} is out of range for a rule set of {len} rules")]
    PositionOutOfRange { index: usize, len: usize },
}
