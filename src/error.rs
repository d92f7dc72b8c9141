use thiserror::Error;

use crate::action::ActionError;
use crate::config::ConfigError;
use crate::graph::GraphError;
use crate::types::{NodeRef, RuleSetError, ValidationError};

/// Unified error type returned by [`RuleService`](crate::RuleService).
///
/// Callers can tell bad input ([`Validation`](Self::Validation)) apart from
/// operations that are invalid for the current rule sets
/// ([`RuleSet`](Self::RuleSet)) and from missing permissions.
#[derive(Debug, Error)]
pub enum RuleServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    RuleSet(#[from] RuleSetError),

    #[error("user '{user}' lacks change permissions on {node}")]
    AccessDenied { node: NodeRef, user: String },

    #[error("node {0} does not exist")]
    NotFound(NodeRef),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Action(#[from] ActionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("rule node {node} holds an unreadable action: {source}")]
    CorruptRule {
        node: NodeRef,
        source: serde_json::Error,
    },

    #[error("failed to encode action: {0}")]
    Encode(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_is_transparent() {
        let err: RuleServiceError = ValidationError::MissingTitle.into();
        assert_eq!(err.to_string(), "rule title is required");
        assert!(matches!(err, RuleServiceError::Validation(_)));
    }

    #[test]
    fn access_denied_message() {
        let err = RuleServiceError::AccessDenied {
            node: NodeRef::new(3),
            user: "bob".into(),
        };
        assert_eq!(
            err.to_string(),
            "user 'bob' lacks change permissions on node://3"
        );
    }

    #[test]
    fn graph_error_converts() {
        let err: RuleServiceError = GraphError::NodeNotFound(NodeRef::new(9)).into();
        assert_eq!(err.to_string(), "node node://9 does not exist");
    }
}
