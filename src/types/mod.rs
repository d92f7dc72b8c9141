mod action;
mod error;
mod node;
mod report;
mod rule;
mod value;

pub use action::{Action, ActionCondition};
pub use error::{RuleSetError, ValidationError};
pub use node::{AssocType, Aspect, ChildAssoc, NodeRef, NodeType, PROP_CONTENT, PROP_NAME};
pub use report::{ExecutionReport, RuleExecution};
pub use rule::{Rule, RuleType};
pub use value::{CompareOp, Properties, Value};
