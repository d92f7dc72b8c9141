//! The action execution facility.
//!
//! Rules name their actions and conditions by type name. [`ActionService`]
//! maps those names to handlers; the rule engine never interprets an
//! action's parameters itself.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::graph::{GraphError, NodeGraph};
use crate::types::{
    Action, ActionCondition, Aspect, CompareOp, NodeRef, PROP_NAME, Properties, ValidationError,
    Value,
};

pub const ADD_FEATURES: &str = "add-features";
pub const REMOVE_FEATURES: &str = "remove-features";
pub const SET_PROPERTY_VALUE: &str = "set-property-value";
pub const COPY: &str = "copy";
pub const MOVE: &str = "move";

pub const NO_CONDITION: &str = "no-condition";
pub const HAS_ASPECT: &str = "has-aspect";
pub const COMPARE_PROPERTY_VALUE: &str = "compare-property-value";

pub const PARAM_ASPECT_NAME: &str = "aspect-name";
pub const PARAM_ASPECT: &str = "aspect";
pub const PARAM_PROPERTY: &str = "property";
pub const PARAM_VALUE: &str = "value";
pub const PARAM_OPERATION: &str = "operation";
pub const PARAM_DESTINATION_FOLDER: &str = "destination-folder";

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("no action executer registered for '{0}'")]
    UnknownExecuter(String),

    #[error("no condition evaluator registered for '{0}'")]
    UnknownEvaluator(String),

    #[error("'{handler}' requires parameter '{param}'")]
    MissingParameter { handler: String, param: String },

    #[error("parameter '{param}' of '{handler}' must be {expected}")]
    InvalidParameter {
        handler: String,
        param: String,
        expected: &'static str,
    },

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Carries out one action type against the actioned-upon node.
pub trait ActionExecuter: Send + Sync {
    /// # Errors
    ///
    /// Returns [`ActionError`] when a parameter is missing or the graph
    /// rejects the change.
    fn execute(
        &self,
        graph: &dyn NodeGraph,
        action: &Action,
        actioned_upon: NodeRef,
    ) -> Result<(), ActionError>;
}

/// Decides whether an action applies to the actioned-upon node.
pub trait ConditionEvaluator: Send + Sync {
    /// The result before the condition's `invert` flag is applied.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError`] when a parameter is missing or malformed.
    fn evaluate(
        &self,
        graph: &dyn NodeGraph,
        condition: &ActionCondition,
        actioned_upon: NodeRef,
    ) -> Result<bool, ActionError>;
}

fn string_param<'a>(
    handler: &str,
    params: &'a Properties,
    key: &str,
) -> Result<&'a str, ActionError> {
    let value = params.get(key).ok_or_else(|| ActionError::MissingParameter {
        handler: handler.to_owned(),
        param: key.to_owned(),
    })?;
    value.as_str().ok_or_else(|| ActionError::InvalidParameter {
        handler: handler.to_owned(),
        param: key.to_owned(),
        expected: "a string",
    })
}

fn node_param(
    handler: &str,
    params: &Properties,
    key: &str,
) -> Result<NodeRef, ActionError> {
    let value = params.get(key).ok_or_else(|| ActionError::MissingParameter {
        handler: handler.to_owned(),
        param: key.to_owned(),
    })?;
    value.as_node().ok_or_else(|| ActionError::InvalidParameter {
        handler: handler.to_owned(),
        param: key.to_owned(),
        expected: "a node reference",
    })
}

/// Adds the aspect named by `aspect-name`.
#[derive(Debug, Default)]
pub struct AddFeatures;

impl ActionExecuter for AddFeatures {
    fn execute(
        &self,
        graph: &dyn NodeGraph,
        action: &Action,
        actioned_upon: NodeRef,
    ) -> Result<(), ActionError> {
        let aspect = string_param(ADD_FEATURES, &action.params, PARAM_ASPECT_NAME)?;
        graph.add_aspect(actioned_upon, Aspect::new(aspect))?;
        Ok(())
    }
}

/// Removes the aspect named by `aspect-name`.
#[derive(Debug, Default)]
pub struct RemoveFeatures;

impl ActionExecuter for RemoveFeatures {
    fn execute(
        &self,
        graph: &dyn NodeGraph,
        action: &Action,
        actioned_upon: NodeRef,
    ) -> Result<(), ActionError> {
        let aspect = string_param(REMOVE_FEATURES, &action.params, PARAM_ASPECT_NAME)?;
        graph.remove_aspect(actioned_upon, &Aspect::new(aspect))?;
        Ok(())
    }
}

/// Sets `property` to `value`.
#[derive(Debug, Default)]
pub struct SetPropertyValue;

impl ActionExecuter for SetPropertyValue {
    fn execute(
        &self,
        graph: &dyn NodeGraph,
        action: &Action,
        actioned_upon: NodeRef,
    ) -> Result<(), ActionError> {
        let property = string_param(SET_PROPERTY_VALUE, &action.params, PARAM_PROPERTY)?;
        let value = action
            .get_param(PARAM_VALUE)
            .cloned()
            .ok_or_else(|| ActionError::MissingParameter {
                handler: SET_PROPERTY_VALUE.to_owned(),
                param: PARAM_VALUE.to_owned(),
            })?;
        graph.set_property(actioned_upon, property, value)?;
        Ok(())
    }
}

/// Copies the node into `destination-folder`.
#[derive(Debug, Default)]
pub struct CopyNode;

impl ActionExecuter for CopyNode {
    fn execute(
        &self,
        graph: &dyn NodeGraph,
        action: &Action,
        actioned_upon: NodeRef,
    ) -> Result<(), ActionError> {
        let destination = node_param(COPY, &action.params, PARAM_DESTINATION_FOLDER)?;
        graph.copy_node(actioned_upon, destination)?;
        Ok(())
    }
}

/// Moves the node into `destination-folder`.
#[derive(Debug, Default)]
pub struct MoveNode;

impl ActionExecuter for MoveNode {
    fn execute(
        &self,
        graph: &dyn NodeGraph,
        action: &Action,
        actioned_upon: NodeRef,
    ) -> Result<(), ActionError> {
        let destination = node_param(MOVE, &action.params, PARAM_DESTINATION_FOLDER)?;
        graph.move_node(actioned_upon, destination)?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct NoCondition;

impl ConditionEvaluator for NoCondition {
    fn evaluate(
        &self,
        _graph: &dyn NodeGraph,
        _condition: &ActionCondition,
        _actioned_upon: NodeRef,
    ) -> Result<bool, ActionError> {
        Ok(true)
    }
}

/// True when the node carries the aspect named by `aspect`.
#[derive(Debug, Default)]
pub struct HasAspect;

impl ConditionEvaluator for HasAspect {
    fn evaluate(
        &self,
        graph: &dyn NodeGraph,
        condition: &ActionCondition,
        actioned_upon: NodeRef,
    ) -> Result<bool, ActionError> {
        let aspect = string_param(HAS_ASPECT, &condition.params, PARAM_ASPECT)?;
        Ok(graph.has_aspect(actioned_upon, &Aspect::new(aspect)))
    }
}

/// Compares a node property (`name` unless `property` is given) to `value`.
///
/// A string `value` containing `*` is matched as a wildcard pattern.
/// Otherwise `operation` selects the comparison, `equals` by default.
#[derive(Debug, Default)]
pub struct ComparePropertyValue;

fn parse_operation(name: &str) -> Option<CompareOp> {
    match name {
        "equals" => Some(CompareOp::Eq),
        "not-equals" => Some(CompareOp::Neq),
        "greater-than" => Some(CompareOp::Gt),
        "greater-than-equal" => Some(CompareOp::Gte),
        "less-than" => Some(CompareOp::Lt),
        "less-than-equal" => Some(CompareOp::Lte),
        _ => None,
    }
}

impl ConditionEvaluator for ComparePropertyValue {
    fn evaluate(
        &self,
        graph: &dyn NodeGraph,
        condition: &ActionCondition,
        actioned_upon: NodeRef,
    ) -> Result<bool, ActionError> {
        let property = match condition.params.get(PARAM_PROPERTY) {
            Some(value) => value.as_str().ok_or_else(|| ActionError::InvalidParameter {
                handler: COMPARE_PROPERTY_VALUE.to_owned(),
                param: PARAM_PROPERTY.to_owned(),
                expected: "a string",
            })?,
            None => PROP_NAME,
        };
        let expected =
            condition
                .params
                .get(PARAM_VALUE)
                .ok_or_else(|| ActionError::MissingParameter {
                    handler: COMPARE_PROPERTY_VALUE.to_owned(),
                    param: PARAM_VALUE.to_owned(),
                })?;
        let op = match condition.params.get(PARAM_OPERATION) {
            Some(op) => op
                .as_str()
                .and_then(parse_operation)
                .ok_or_else(|| ActionError::InvalidParameter {
                    handler: COMPARE_PROPERTY_VALUE.to_owned(),
                    param: PARAM_OPERATION.to_owned(),
                    expected: "a comparison operation",
                })?,
            None => CompareOp::Eq,
        };

        let Some(actual) = graph.property(actioned_upon, property) else {
            return Ok(false);
        };
        if op == CompareOp::Eq
            && let Value::String(pattern) = expected
            && pattern.contains('*')
        {
            return Ok(actual.matches_pattern(pattern));
        }
        Ok(actual.compare(op, expected).unwrap_or(false))
    }
}

/// Registry of action executers and condition evaluators, keyed by type name.
#[derive(Clone)]
pub struct ActionService {
    executers: HashMap<String, Arc<dyn ActionExecuter>>,
    evaluators: HashMap<String, Arc<dyn ConditionEvaluator>>,
}

impl Default for ActionService {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for ActionService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut executers: Vec<&str> = self.executers.keys().map(String::as_str).collect();
        let mut evaluators: Vec<&str> = self.evaluators.keys().map(String::as_str).collect();
        executers.sort_unstable();
        evaluators.sort_unstable();
        f.debug_struct("ActionService")
            .field("executers", &executers)
            .field("evaluators", &evaluators)
            .finish()
    }
}

impl ActionService {
    /// A registry with nothing registered.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            executers: HashMap::new(),
            evaluators: HashMap::new(),
        }
    }

    /// A registry holding the built-in executers and evaluators.
    #[must_use]
    pub fn with_builtins() -> Self {
        Self::empty()
            .executer(ADD_FEATURES, Arc::new(AddFeatures))
            .executer(REMOVE_FEATURES, Arc::new(RemoveFeatures))
            .executer(SET_PROPERTY_VALUE, Arc::new(SetPropertyValue))
            .executer(COPY, Arc::new(CopyNode))
            .executer(MOVE, Arc::new(MoveNode))
            .evaluator(NO_CONDITION, Arc::new(NoCondition))
            .evaluator(HAS_ASPECT, Arc::new(HasAspect))
            .evaluator(COMPARE_PROPERTY_VALUE, Arc::new(ComparePropertyValue))
    }

    #[must_use]
    pub fn executer(mut self, name: &str, executer: Arc<dyn ActionExecuter>) -> Self {
        self.register_executer(name, executer);
        self
    }

    #[must_use]
    pub fn evaluator(mut self, name: &str, evaluator: Arc<dyn ConditionEvaluator>) -> Self {
        self.register_evaluator(name, evaluator);
        self
    }

    /// Register an executer, replacing any previous one with the same name.
    pub fn register_executer(&mut self, name: &str, executer: Arc<dyn ActionExecuter>) {
        self.executers.insert(name.to_owned(), executer);
    }

    /// Register an evaluator, replacing any previous one with the same name.
    pub fn register_evaluator(&mut self, name: &str, evaluator: Arc<dyn ConditionEvaluator>) {
        self.evaluators.insert(name.to_owned(), evaluator);
    }

    #[must_use]
    pub fn has_executer(&self, name: &str) -> bool {
        name == Action::COMPOSITE || self.executers.contains_key(name)
    }

    #[must_use]
    pub fn has_evaluator(&self, name: &str) -> bool {
        self.evaluators.contains_key(name)
    }

    /// Check that every action and condition type `action` references is
    /// registered.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnknownActionType`] or
    /// [`ValidationError::UnknownConditionType`] naming the first unknown type.
    pub fn validate(&self, rule_title: &str, action: &Action) -> Result<(), ValidationError> {
        if let Some(name) = action
            .action_names()
            .into_iter()
            .find(|n| !self.has_executer(n))
        {
            return Err(ValidationError::UnknownActionType {
                rule: rule_title.to_owned(),
                name: name.to_owned(),
            });
        }
        if let Some(name) = action
            .condition_names()
            .into_iter()
            .find(|n| !self.has_evaluator(n))
        {
            return Err(ValidationError::UnknownConditionType {
                rule: rule_title.to_owned(),
                name: name.to_owned(),
            });
        }
        Ok(())
    }

    /// Evaluate the action's own conditions. All must hold.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::UnknownEvaluator`] for an unregistered
    /// condition, or the evaluator's error.
    pub fn evaluate_conditions(
        &self,
        graph: &dyn NodeGraph,
        action: &Action,
        actioned_upon: NodeRef,
    ) -> Result<bool, ActionError> {
        for condition in &action.conditions {
            let evaluator = self
                .evaluators
                .get(&condition.name)
                .ok_or_else(|| ActionError::UnknownEvaluator(condition.name.clone()))?;
            let passed = evaluator.evaluate(graph, condition, actioned_upon)? != condition.invert;
            if !passed {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Evaluate the action's conditions and, if they hold, run it.
    ///
    /// Sub-actions of a composite action are each guarded by their own
    /// conditions. Returns whether the top-level conditions held.
    ///
    /// # Errors
    ///
    /// Returns the first [`ActionError`] raised by an evaluator or executer.
    pub fn execute(
        &self,
        graph: &dyn NodeGraph,
        action: &Action,
        actioned_upon: NodeRef,
    ) -> Result<bool, ActionError> {
        if !self.evaluate_conditions(graph, action, actioned_upon)? {
            debug!(action = %action.name, node = %actioned_upon, "conditions not met");
            return Ok(false);
        }
        if action.is_composite() {
            for sub in &action.actions {
                self.execute(graph, sub, actioned_upon)?;
            }
            return Ok(true);
        }
        let executer = self
            .executers
            .get(&action.name)
            .ok_or_else(|| ActionError::UnknownExecuter(action.name.clone()))?;
        executer.execute(graph, action, actioned_upon)?;
        debug!(action = %action.name, node = %actioned_upon, "action executed");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::InMemoryGraph;
    use crate::types::{AssocType, NodeType};

    fn doc(graph: &InMemoryGraph, name: &str) -> NodeRef {
        graph
            .create_node(graph.root(), AssocType::Contains, name, NodeType::Content)
            .unwrap()
            .child
    }

    #[test]
    fn add_features_adds_aspect() {
        let graph = InMemoryGraph::new();
        let node = doc(&graph, "a.txt");
        let actions = ActionService::with_builtins();
        let action = Action::new(ADD_FEATURES).param(PARAM_ASPECT_NAME, "versionable");
        assert!(actions.execute(&graph, &action, node).unwrap());
        assert!(graph.has_aspect(node, &Aspect::new("versionable")));
    }

    #[test]
    fn missing_parameter_is_reported() {
        let graph = InMemoryGraph::new();
        let node = doc(&graph, "a.txt");
        let err = ActionService::with_builtins()
            .execute(&graph, &Action::new(ADD_FEATURES), node)
            .unwrap_err();
        assert!(matches!(err, ActionError::MissingParameter { param, .. } if param == PARAM_ASPECT_NAME));
    }

    #[test]
    fn wildcard_name_condition() {
        let graph = InMemoryGraph::new();
        let jpg = doc(&graph, "photo.jpg");
        let txt = doc(&graph, "notes.txt");
        let actions = ActionService::with_builtins();
        let action = Action::new(ADD_FEATURES)
            .param(PARAM_ASPECT_NAME, "image")
            .condition(ActionCondition::new(COMPARE_PROPERTY_VALUE).param(PARAM_VALUE, "*.jpg"));
        assert!(actions.execute(&graph, &action, jpg).unwrap());
        assert!(!actions.execute(&graph, &action, txt).unwrap());
        assert!(graph.has_aspect(jpg, &Aspect::new("image")));
        assert!(!graph.has_aspect(txt, &Aspect::new("image")));
    }

    #[test]
    fn inverted_condition() {
        let graph = InMemoryGraph::new();
        let node = doc(&graph, "a.txt");
        let actions = ActionService::with_builtins();
        let cond = ActionCondition::new(HAS_ASPECT)
            .param(PARAM_ASPECT, "locked")
            .inverted();
        let action = Action::new(ADD_FEATURES)
            .param(PARAM_ASPECT_NAME, "locked")
            .condition(cond);
        assert!(actions.execute(&graph, &action, node).unwrap());
        // now locked, so the inverted condition fails
        assert!(!actions.execute(&graph, &action, node).unwrap());
    }

    #[test]
    fn numeric_comparison() {
        let graph = InMemoryGraph::new();
        let node = doc(&graph, "a.txt");
        graph.set_property(node, "size", Value::Int(10)).unwrap();
        let actions = ActionService::with_builtins();
        let cond = ActionCondition::new(COMPARE_PROPERTY_VALUE)
            .param(PARAM_PROPERTY, "size")
            .param(PARAM_VALUE, 5_i64)
            .param(PARAM_OPERATION, "greater-than");
        let action = Action::new(ADD_FEATURES)
            .param(PARAM_ASPECT_NAME, "large")
            .condition(cond);
        assert!(actions.execute(&graph, &action, node).unwrap());
    }

    #[test]
    fn composite_runs_guarded_sub_actions() {
        let graph = InMemoryGraph::new();
        let node = doc(&graph, "a.txt");
        let actions = ActionService::with_builtins();
        let action = Action::composite()
            .then(Action::new(ADD_FEATURES).param(PARAM_ASPECT_NAME, "one"))
            .then(
                Action::new(ADD_FEATURES)
                    .param(PARAM_ASPECT_NAME, "two")
                    .condition(ActionCondition::new(NO_CONDITION).inverted()),
            )
            .then(Action::new(SET_PROPERTY_VALUE).param(PARAM_PROPERTY, "title").param(PARAM_VALUE, "done"));
        assert!(actions.execute(&graph, &action, node).unwrap());
        assert!(graph.has_aspect(node, &Aspect::new("one")));
        assert!(!graph.has_aspect(node, &Aspect::new("two")));
        assert_eq!(graph.property(node, "title"), Some(Value::from("done")));
    }

    #[test]
    fn copy_and_move() {
        let graph = InMemoryGraph::new();
        let node = doc(&graph, "a.txt");
        let dest = graph
            .create_node(graph.root(), AssocType::Contains, "dest", NodeType::Folder)
            .unwrap()
            .child;
        let actions = ActionService::with_builtins();
        actions
            .execute(&graph, &Action::new(COPY).param(PARAM_DESTINATION_FOLDER, dest), node)
            .unwrap();
        assert_eq!(
            graph
                .child_assocs(dest, &crate::graph::AssocFilter::all())
                .unwrap()
                .len(),
            1
        );
        actions
            .execute(&graph, &Action::new(MOVE).param(PARAM_DESTINATION_FOLDER, dest), node)
            .unwrap();
        let primary = graph
            .parent_assocs(node, &crate::graph::AssocFilter::all().primary())
            .unwrap();
        assert_eq!(primary[0].parent, dest);
    }

    #[test]
    fn validate_reports_unknown_types() {
        let actions = ActionService::with_builtins();
        let bad_action = Action::composite().then(Action::new("teleport"));
        assert!(matches!(
            actions.validate("r", &bad_action),
            Err(ValidationError::UnknownActionType { name, .. }) if name == "teleport"
        ));
        let bad_condition =
            Action::new(ADD_FEATURES).condition(ActionCondition::new("is-shiny"));
        assert!(matches!(
            actions.validate("r", &bad_condition),
            Err(ValidationError::UnknownConditionType { name, .. }) if name == "is-shiny"
        ));
        assert!(actions.validate("r", &Action::new(COPY)).is_ok());
    }

    #[test]
    fn custom_executer_registration() {
        struct Touch;
        impl ActionExecuter for Touch {
            fn execute(
                &self,
                graph: &dyn NodeGraph,
                _action: &Action,
                node: NodeRef,
            ) -> Result<(), ActionError> {
                graph.set_property(node, "touched", Value::Bool(true))?;
                Ok(())
            }
        }
        let graph = InMemoryGraph::new();
        let node = doc(&graph, "a.txt");
        let actions = ActionService::empty().executer("touch", Arc::new(Touch));
        assert!(actions.has_executer("touch"));
        assert!(!actions.has_executer(ADD_FEATURES));
        actions.execute(&graph, &Action::new("touch"), node).unwrap();
        assert_eq!(graph.property(node, "touched"), Some(Value::Bool(true)));
    }
}
