pub mod action;
mod auth;
mod cache;
mod config;
mod error;
mod execution;
mod graph;
mod linking;
mod permission;
mod resolver;
mod service;
mod store;
mod traversal;
mod types;

pub use action::{ActionError, ActionExecuter, ActionService, ConditionEvaluator};
pub use auth::AuthenticationContext;
pub use cache::CacheStats;
pub use config::{ConfigError, RuleServiceConfig};
pub use error::RuleServiceError;
pub use execution::{PendingRuleExecution, Trigger, triggers_for};
pub use graph::{AssocFilter, GraphError, GraphEvent, InMemoryGraph, NodeGraph};
pub use permission::{AllowAll, InMemoryPermissions, PermissionChecker};
pub use resolver::RuleSetResolver;
pub use service::RuleService;
pub use types::{
    Action, ActionCondition, Aspect, AssocType, ChildAssoc, CompareOp, ExecutionReport, NodeRef,
    NodeType, PROP_CONTENT, PROP_NAME, Properties, Rule, RuleExecution, RuleSetError, RuleType,
    ValidationError, Value,
};
