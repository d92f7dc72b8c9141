//! Firing rules in response to graph events.
//!
//! Graph events are mapped to (folder, node, rule type) triggers. Each
//! applicable rule runs inline, or is queued as a [`PendingRuleExecution`]
//! when it is asynchronous or no user is authenticated. Within one pass a
//! rule runs at most once per actioned-upon node, so a rule whose action
//! re-triggers itself cannot loop.

use std::collections::{HashSet, VecDeque};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::action::ActionService;
use crate::auth::AuthenticationContext;
use crate::error::RuleServiceError;
use crate::graph::{AssocFilter, GraphEvent, NodeGraph};
use crate::linking::rule_set_node;
use crate::store::RuleStore;
use crate::types::{
    AssocType, Aspect, ExecutionReport, NodeRef, NodeType, PROP_NAME, Rule, RuleExecution,
    RuleType, ValidationError,
};

/// A rule waiting to be run against a node.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRuleExecution {
    pub owning_folder: NodeRef,
    pub actioned_upon: NodeRef,
    pub rule: Rule,
}

/// Queue of deferred rule executions, drained by
/// [`RuleService::execute_pending_rules()`](crate::RuleService::execute_pending_rules).
#[derive(Debug, Default)]
pub struct PendingRules {
    queue: Mutex<VecDeque<PendingRuleExecution>>,
}

impl PendingRules {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: PendingRuleExecution) {
        self.queue.lock().push_back(entry);
    }

    /// Remove and return every queued entry, oldest first.
    pub fn take_all(&self) -> Vec<PendingRuleExecution> {
        self.queue.lock().drain(..).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn clear(&self) {
        self.queue.lock().clear();
    }
}

/// A lifecycle event seen from one folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trigger {
    pub folder: NodeRef,
    pub actioned_upon: NodeRef,
    pub rule_type: RuleType,
}

impl Trigger {
    fn new(folder: NodeRef, actioned_upon: NodeRef, rule_type: RuleType) -> Self {
        Self {
            folder,
            actioned_upon,
            rule_type,
        }
    }
}

fn is_rule_storage(graph: &dyn NodeGraph, node: NodeRef) -> bool {
    graph.node_type(node).is_ok_and(|t| t.is_rule_storage())
}

fn primary_parent(graph: &dyn NodeGraph, node: NodeRef) -> Option<NodeRef> {
    graph
        .parent_assocs(node, &AssocFilter::hierarchical().primary())
        .ok()?
        .first()
        .map(|a| a.parent)
}

/// Map a graph event to the folders whose rules it triggers.
///
/// Inbound: a node created in or added to a folder. Outbound: a node
/// removed from or deleted out of a folder. Update: content rewritten, or
/// properties changed other than by a plain rename. Events about rule-set
/// and rule nodes trigger nothing.
#[must_use]
pub fn triggers_for(graph: &dyn NodeGraph, event: &GraphEvent) -> Vec<Trigger> {
    match event {
        GraphEvent::NodeCreated {
            parent,
            child,
            assoc_type,
            node_type,
        } if assoc_type.is_hierarchical() && !node_type.is_rule_storage() => {
            vec![Trigger::new(*parent, *child, RuleType::Inbound)]
        }
        GraphEvent::ChildAdded {
            parent,
            child,
            assoc_type,
        } if assoc_type.is_hierarchical() && !is_rule_storage(graph, *child) => {
            vec![Trigger::new(*parent, *child, RuleType::Inbound)]
        }
        GraphEvent::ChildRemoved {
            parent,
            child,
            assoc_type,
        } if assoc_type.is_hierarchical() && !is_rule_storage(graph, *child) => {
            vec![Trigger::new(*parent, *child, RuleType::Outbound)]
        }
        GraphEvent::NodeDeleted {
            node,
            node_type,
            parents,
        } if !node_type.is_rule_storage() => parents
            .iter()
            .filter(|(_, assoc_type)| assoc_type.is_hierarchical())
            .map(|(parent, _)| Trigger::new(*parent, *node, RuleType::Outbound))
            .collect(),
        GraphEvent::ContentWritten {
            node,
            created: false,
        } if !is_rule_storage(graph, *node) => primary_parent(graph, *node)
            .map(|parent| Trigger::new(parent, *node, RuleType::Update))
            .into_iter()
            .collect(),
        GraphEvent::PropertiesUpdated { node, changed }
            if !changed.iter().all(|k| k == PROP_NAME) && !is_rule_storage(graph, *node) =>
        {
            primary_parent(graph, *node)
                .map(|parent| Trigger::new(parent, *node, RuleType::Update))
                .into_iter()
                .collect()
        }
        _ => Vec::new(),
    }
}

/// Bookkeeping for one processing pass.
#[derive(Debug)]
pub(crate) struct ExecutionPass {
    executed: HashSet<(NodeRef, NodeRef)>,
    report: ExecutionReport,
    started: Instant,
}

impl ExecutionPass {
    pub(crate) fn new() -> Self {
        Self {
            executed: HashSet::new(),
            report: ExecutionReport::default(),
            started: Instant::now(),
        }
    }

    pub(crate) fn finish(mut self) -> ExecutionReport {
        self.report.set_duration(self.started.elapsed());
        self.report
    }
}

/// The pieces of a [`RuleService`](crate::RuleService) a pass needs.
pub(crate) struct Executor<'a> {
    pub graph: &'a dyn NodeGraph,
    pub store: &'a RuleStore,
    pub actions: &'a ActionService,
    pub auth: &'a AuthenticationContext,
    pub pending: &'a PendingRules,
    pub rules_enabled: bool,
    pub max_rounds: usize,
}

impl Executor<'_> {
    /// Evaluate the rule's conditions and run its action. Returns whether
    /// the action ran.
    pub(crate) fn execute_rule(
        &self,
        rule: &Rule,
        actioned_upon: NodeRef,
    ) -> Result<bool, RuleServiceError> {
        let action = rule
            .action
            .as_ref()
            .ok_or_else(|| ValidationError::MissingAction {
                title: rule.title.clone(),
            })?;
        Ok(self.actions.execute(self.graph, action, actioned_upon)?)
    }

    fn run(&self, pass: &mut ExecutionPass, rule: &Rule, rule_node: NodeRef, node: NodeRef) {
        let execution = RuleExecution {
            rule: rule_node,
            actioned_upon: node,
        };
        pass.executed.insert((rule_node, node));
        if !self.graph.exists(node) {
            debug!(rule = %rule_node, %node, "actioned-upon node no longer exists");
            pass.report.record_skipped(execution);
            return;
        }
        match self.execute_rule(rule, node) {
            Ok(true) => {
                debug!(rule = %rule_node, %node, title = %rule.title, "rule executed");
                pass.report.record_executed(execution);
            }
            Ok(false) => pass.report.record_skipped(execution),
            Err(e) => {
                warn!(rule = %rule_node, %node, error = %e, "rule execution failed");
                pass.report.record_failed(execution);
            }
        }
    }

    fn fire(&self, trigger: &Trigger, pass: &mut ExecutionPass) -> Result<(), RuleServiceError> {
        if !self.rules_enabled
            || !self.store.rules_enabled(trigger.folder)
            || !self.store.is_rule_type_enabled(trigger.rule_type)
        {
            return Ok(());
        }
        let rules =
            self.store
                .get_rules(self.graph, trigger.folder, true, Some(trigger.rule_type))?;
        for rule in rules {
            let Some(rule_node) = rule.node_ref() else {
                continue;
            };
            let execution = RuleExecution {
                rule: rule_node,
                actioned_upon: trigger.actioned_upon,
            };
            let owner_disabled = match self.store.get_owning_node(self.graph, rule_node) {
                Ok(owner) => owner.is_some_and(|owner| !self.store.rules_enabled(owner)),
                Err(e) => {
                    warn!(rule = %rule_node, error = %e, "owning folder lookup failed");
                    pass.report.record_failed(execution);
                    continue;
                }
            };
            if rule.disabled || !self.store.is_rule_enabled(rule_node) || owner_disabled {
                pass.report.record_skipped(execution);
                continue;
            }
            if pass.executed.contains(&(rule_node, trigger.actioned_upon)) {
                debug!(rule = %rule_node, node = %trigger.actioned_upon, "already executed in this pass");
                pass.report.record_skipped(execution);
                continue;
            }
            if rule.execute_asynchronously || !self.auth.is_authenticated() {
                debug!(rule = %rule_node, node = %trigger.actioned_upon, "rule queued");
                self.pending.push(PendingRuleExecution {
                    owning_folder: trigger.folder,
                    actioned_upon: trigger.actioned_upon,
                    rule,
                });
                pass.report.record_queued(execution);
                continue;
            }
            self.run(pass, &rule, rule_node, trigger.actioned_upon);
        }
        Ok(())
    }

    /// Drop the rules aspect from folders whose linked rule set was deleted.
    fn clean_up(&self, event: &GraphEvent) -> Result<(), RuleServiceError> {
        if let GraphEvent::NodeDeleted {
            node,
            node_type: NodeType::RuleSet,
            parents,
        } = event
        {
            self.store.cache().invalidate_all();
            for (folder, _) in parents
                .iter()
                .filter(|(_, assoc_type)| *assoc_type == AssocType::RuleFolder)
            {
                if self.graph.exists(*folder) && rule_set_node(self.graph, *folder)?.is_none() {
                    self.graph.remove_aspect(*folder, &Aspect::RULES)?;
                    debug!(%folder, rule_set = %node, "rule set deleted, rules aspect removed");
                }
            }
        }
        Ok(())
    }

    /// Process graph events until none are left or the round cap is hit.
    /// An event whose rules cannot be resolved is logged and recorded in
    /// the report; the rest of the batch still runs.
    pub(crate) fn pump(&self, pass: &mut ExecutionPass) {
        for _ in 0..self.max_rounds {
            let events = self.graph.take_events();
            if events.is_empty() {
                return;
            }
            for event in &events {
                if let Err(e) = self.clean_up(event) {
                    warn!(?event, error = %e, "rule set clean-up failed");
                    pass.report.record_error(e.to_string());
                }
                for trigger in triggers_for(self.graph, event) {
                    if let Err(e) = self.fire(&trigger, pass) {
                        warn!(
                            folder = %trigger.folder,
                            node = %trigger.actioned_upon,
                            rule_type = ?trigger.rule_type,
                            error = %e,
                            "could not resolve rules for trigger"
                        );
                        pass.report.record_error(e.to_string());
                    }
                }
            }
        }
        warn!(
            rounds = self.max_rounds,
            "trigger round limit reached, remaining events deferred"
        );
    }

    /// Run every pending entry once, including entries queued by the rules
    /// it runs. Succeeds without an authenticated user.
    pub(crate) fn drain(&self, pass: &mut ExecutionPass) {
        for _ in 0..self.max_rounds {
            let batch = self.pending.take_all();
            if batch.is_empty() {
                return;
            }
            for entry in batch {
                let Some(rule_node) = entry.rule.node_ref() else {
                    continue;
                };
                if pass.executed.contains(&(rule_node, entry.actioned_upon)) {
                    pass.report.record_skipped(RuleExecution {
                        rule: rule_node,
                        actioned_upon: entry.actioned_upon,
                    });
                    continue;
                }
                self.run(pass, &entry.rule, rule_node, entry.actioned_upon);
            }
            self.pump(pass);
        }
        if !self.pending.is_empty() {
            warn!(
                remaining = self.pending.len(),
                "pending rule drain hit the round limit"
            );
        }
    }
}

pub(crate) fn log_report(what: &str, report: &ExecutionReport) {
    if !report.is_empty() {
        info!(
            executed = report.executed().len(),
            queued = report.queued().len(),
            skipped = report.skipped().len(),
            failed = report.failed().len(),
            errors = report.errors().len(),
            duration = ?report.duration(),
            "{what} finished"
        );
    }
}
