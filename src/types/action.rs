use serde::{Deserialize, Serialize};

use super::value::{Properties, Value};

/// A named condition evaluated against the actioned-upon node before an
/// action runs. Evaluation is delegated to the registered evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionCondition {
    pub name: String,
    #[serde(default)]
    pub params: Properties,
    #[serde(default)]
    pub invert: bool,
}

impl ActionCondition {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            params: Properties::new(),
            invert: false,
        }
    }

    #[must_use]
    pub fn param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_owned(), value.into());
        self
    }

    /// Negate the evaluator's result.
    #[must_use]
    pub fn inverted(mut self) -> Self {
        self.invert = !self.invert;
        self
    }
}

/// An action bound to a rule: a type name resolved through the action
/// registry, its parameters, and the conditions guarding it.
///
/// A composite action carries no parameters of its own and runs its
/// sub-actions in order, each guarded by its own conditions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub name: String,
    #[serde(default)]
    pub params: Properties,
    #[serde(default)]
    pub conditions: Vec<ActionCondition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<Action>,
}

impl Action {
    /// Type name of composite actions.
    pub const COMPOSITE: &'static str = "composite-action";

    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            params: Properties::new(),
            conditions: Vec::new(),
            actions: Vec::new(),
        }
    }

    #[must_use]
    pub fn composite() -> Self {
        Self::new(Self::COMPOSITE)
    }

    #[must_use]
    pub fn is_composite(&self) -> bool {
        self.name == Self::COMPOSITE
    }

    #[must_use]
    pub fn param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_owned(), value.into());
        self
    }

    #[must_use]
    pub fn condition(mut self, condition: ActionCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Append a sub-action to a composite action.
    #[must_use]
    pub fn then(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    #[must_use]
    pub fn get_param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    /// Every action type name referenced by this action, sub-actions included.
    pub(crate) fn action_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        collect_action_names(self, &mut names);
        names
    }

    /// Every condition type name referenced by this action, sub-actions included.
    pub(crate) fn condition_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.conditions.iter().map(|c| c.name.as_str()).collect();
        for sub in &self.actions {
            names.extend(sub.condition_names());
        }
        names
    }
}

fn collect_action_names<'a>(action: &'a Action, out: &mut Vec<&'a str>) {
    if action.is_composite() {
        for sub in &action.actions {
            collect_action_names(sub, out);
        }
    } else {
        out.push(action.name.as_str());
    }
}
