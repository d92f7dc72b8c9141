use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;

use crate::action::ActionService;
use crate::auth::AuthenticationContext;
use crate::cache::CacheStats;
use crate::config::RuleServiceConfig;
use crate::error::RuleServiceError;
use crate::execution::{ExecutionPass, Executor, PendingRuleExecution, PendingRules, log_report};
use crate::graph::NodeGraph;
use crate::linking;
use crate::permission::{AllowAll, PermissionChecker};
use crate::resolver::RuleSetResolver;
use crate::store::RuleStore;
use crate::traversal;
use crate::types::{ExecutionReport, NodeRef, Rule, RuleType};

/// Rule management and execution over a [`NodeGraph`].
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use rulegraph::{Action, AssocType, InMemoryGraph, NodeGraph, NodeType, Rule, RuleService};
///
/// let graph = Arc::new(InMemoryGraph::new());
/// let folder = graph
///     .create_node(graph.root(), AssocType::Contains, "inbox", NodeType::Folder)
///     .unwrap()
///     .child;
/// let service = RuleService::new(graph.clone());
///
/// let mut rule = Rule::new("tag everything")
///     .action(Action::new("add-features").param("aspect-name", "tagged"));
/// service.save_rule(folder, &mut rule).unwrap();
/// assert_eq!(service.get_rules(folder, true).unwrap().len(), 1);
/// ```
pub struct RuleService {
    graph: Arc<dyn NodeGraph>,
    actions: ActionService,
    permissions: Arc<dyn PermissionChecker>,
    auth: Arc<AuthenticationContext>,
    store: RuleStore,
    pending: PendingRules,
    config: RuleServiceConfig,
    enabled: AtomicBool,
}

impl std::fmt::Debug for RuleService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleService")
            .field("actions", &self.actions)
            .field("store", &self.store)
            .field("pending", &self.pending.len())
            .field("config", &self.config)
            .field("enabled", &self.enabled.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl RuleService {
    /// A service with the built-in actions, no permission restrictions, an
    /// unauthenticated context and the default configuration.
    #[must_use]
    pub fn new(graph: Arc<dyn NodeGraph>) -> Self {
        Self::with_config(graph, RuleServiceConfig::default())
    }

    #[must_use]
    pub fn with_config(graph: Arc<dyn NodeGraph>, config: RuleServiceConfig) -> Self {
        let resolver =
            RuleSetResolver::new().ignore_aspect_on_target(config.ignore_aspect_on_target);
        Self {
            graph,
            actions: ActionService::with_builtins(),
            permissions: Arc::new(AllowAll),
            auth: Arc::new(AuthenticationContext::new()),
            store: RuleStore::new(resolver),
            pending: PendingRules::new(),
            enabled: AtomicBool::new(config.rules_enabled),
            config,
        }
    }

    #[must_use]
    pub fn permissions(mut self, permissions: Arc<dyn PermissionChecker>) -> Self {
        self.permissions = permissions;
        self
    }

    #[must_use]
    pub fn authentication(mut self, auth: Arc<AuthenticationContext>) -> Self {
        self.auth = auth;
        self
    }

    #[must_use]
    pub fn action_service(mut self, actions: ActionService) -> Self {
        self.actions = actions;
        self
    }

    #[must_use]
    pub fn graph(&self) -> &Arc<dyn NodeGraph> {
        &self.graph
    }

    #[must_use]
    pub fn auth(&self) -> &AuthenticationContext {
        &self.auth
    }

    #[must_use]
    pub fn actions(&self) -> &ActionService {
        &self.actions
    }

    #[must_use]
    pub fn config(&self) -> &RuleServiceConfig {
        &self.config
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.store.cache().stats()
    }

    /// Drop every cached rule list. Only needed after changes made to the
    /// graph behind the store's back without bumping its revision.
    pub fn invalidate_cache(&self) {
        self.store.cache().invalidate_all();
    }

    fn check_change_permissions(&self, node: NodeRef) -> Result<(), RuleServiceError> {
        let user = self.auth.current_user();
        if !self.permissions.has_change_permissions(node, user.as_deref()) {
            return Err(RuleServiceError::AccessDenied {
                node,
                user: user.unwrap_or_default(),
            });
        }
        Ok(())
    }

    fn executor(&self) -> Executor<'_> {
        Executor {
            graph: self.graph.as_ref(),
            store: &self.store,
            actions: &self.actions,
            auth: &self.auth,
            pending: &self.pending,
            rules_enabled: self.is_enabled(),
            max_rounds: self.config.max_trigger_rounds,
        }
    }

    // -- rule store --

    /// Rules applying to `node`, inherited ones first in resolver order.
    ///
    /// # Errors
    ///
    /// Returns [`RuleServiceError::CorruptRule`] when a stored rule cannot be
    /// read back.
    pub fn get_rules(
        &self,
        node: NodeRef,
        include_inherited: bool,
    ) -> Result<Vec<Rule>, RuleServiceError> {
        self.store
            .get_rules(self.graph.as_ref(), node, include_inherited, None)
    }

    /// As [`get_rules()`](Self::get_rules), keeping only rules of one type.
    ///
    /// # Errors
    ///
    /// Returns [`RuleServiceError::CorruptRule`] when a stored rule cannot be
    /// read back.
    pub fn get_rules_of_type(
        &self,
        node: NodeRef,
        include_inherited: bool,
        rule_type: RuleType,
    ) -> Result<Vec<Rule>, RuleServiceError> {
        self.store
            .get_rules(self.graph.as_ref(), node, include_inherited, Some(rule_type))
    }

    /// # Errors
    ///
    /// Returns [`RuleServiceError::NotFound`] when the rule node does not exist.
    pub fn get_rule(&self, rule_node: NodeRef) -> Result<Rule, RuleServiceError> {
        self.store.get_rule(self.graph.as_ref(), rule_node)
    }

    /// The folder owning the rule set that holds `rule_node`.
    ///
    /// # Errors
    ///
    /// Returns [`RuleServiceError::NotFound`] when the rule node does not exist.
    pub fn get_owning_node(&self, rule_node: NodeRef) -> Result<Option<NodeRef>, RuleServiceError> {
        self.store.get_owning_node(self.graph.as_ref(), rule_node)
    }

    /// Create or update a rule on `folder`. A new rule gets its node
    /// reference assigned.
    ///
    /// # Errors
    ///
    /// Returns [`RuleServiceError::Validation`] for an incomplete rule,
    /// [`RuleServiceError::AccessDenied`] without change permissions on
    /// `folder`, and a [`RuleSetError`](crate::RuleSetError) when `folder` is
    /// linked or does not own the rule.
    pub fn save_rule(&self, folder: NodeRef, rule: &mut Rule) -> Result<(), RuleServiceError> {
        self.check_change_permissions(folder)?;
        self.store
            .save_rule(self.graph.as_ref(), &self.actions, folder, rule)
    }

    /// # Errors
    ///
    /// Returns [`RuleServiceError::AccessDenied`] without change permissions
    /// on `folder`, and a [`RuleSetError`](crate::RuleSetError) when `folder`
    /// does not own the rule.
    pub fn remove_rule(&self, folder: NodeRef, rule: &Rule) -> Result<(), RuleServiceError> {
        self.check_change_permissions(folder)?;
        self.store.remove_rule(self.graph.as_ref(), folder, rule)
    }

    /// # Errors
    ///
    /// Returns [`RuleServiceError::AccessDenied`] without change permissions
    /// on `folder`.
    pub fn remove_all_rules(&self, folder: NodeRef) -> Result<(), RuleServiceError> {
        self.check_change_permissions(folder)?;
        self.store.remove_all_rules(self.graph.as_ref(), folder)
    }

    /// Move a rule to `index` within the rule set `folder` owns.
    ///
    /// # Errors
    ///
    /// Returns [`RuleServiceError::AccessDenied`] without change permissions
    /// on `folder`, and [`RuleSetError::PositionOutOfRange`](crate::RuleSetError::PositionOutOfRange)
    /// for an invalid index.
    pub fn set_rule_position(
        &self,
        folder: NodeRef,
        rule: &Rule,
        index: usize,
    ) -> Result<(), RuleServiceError> {
        self.check_change_permissions(folder)?;
        self.store
            .set_rule_position(self.graph.as_ref(), folder, rule, index)
    }

    /// # Errors
    ///
    /// Returns [`RuleServiceError::Graph`] if `folder` does not exist.
    pub fn count_rules(&self, folder: NodeRef) -> Result<usize, RuleServiceError> {
        Ok(self.store.count_rules(self.graph.as_ref(), folder)?)
    }

    #[must_use]
    pub fn has_rules(&self, folder: NodeRef) -> bool {
        self.store.has_rules(self.graph.as_ref(), folder)
    }

    #[must_use]
    pub fn rule_types(&self) -> &'static [RuleType] {
        RuleType::all()
    }

    // -- enablement --

    pub fn enable_all(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    pub fn disable_all(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn enable_rules(&self, folder: NodeRef) {
        self.store.enable_rules(folder);
    }

    /// Stop every rule reachable through `folder` from firing, whether
    /// `folder` owns it or a trigger starts there.
    pub fn disable_rules(&self, folder: NodeRef) {
        self.store.disable_rules(folder);
    }

    #[must_use]
    pub fn rules_enabled(&self, folder: NodeRef) -> bool {
        self.is_enabled() && self.store.rules_enabled(folder)
    }

    pub fn enable_rule(&self, rule_node: NodeRef) {
        self.store.enable_rule(rule_node);
    }

    /// Stop one rule from firing without changing its stored `disabled` flag.
    pub fn disable_rule(&self, rule_node: NodeRef) {
        self.store.disable_rule(rule_node);
    }

    #[must_use]
    pub fn is_rule_enabled(&self, rule_node: NodeRef) -> bool {
        self.store.is_rule_enabled(rule_node)
    }

    pub fn enable_rule_type(&self, rule_type: RuleType) {
        self.store.enable_rule_type(rule_type);
    }

    /// Stop every rule of `rule_type` from firing, for example to keep
    /// update rules quiet while the caller rewrites content itself.
    pub fn disable_rule_type(&self, rule_type: RuleType) {
        self.store.disable_rule_type(rule_type);
    }

    #[must_use]
    pub fn is_rule_type_enabled(&self, rule_type: RuleType) -> bool {
        self.store.is_rule_type_enabled(rule_type)
    }

    // -- resolver and linking --

    /// # Errors
    ///
    /// Returns [`RuleServiceError::Graph`] if `node` does not exist.
    pub fn get_nodes_supplying_rule_sets(
        &self,
        node: NodeRef,
    ) -> Result<Vec<NodeRef>, RuleServiceError> {
        Ok(self
            .store
            .resolver()
            .nodes_supplying_rule_sets(self.graph.as_ref(), node)?)
    }

    /// # Errors
    ///
    /// Returns [`RuleServiceError::Graph`] if `folder` does not exist.
    pub fn get_rule_set_node(&self, folder: NodeRef) -> Result<Option<NodeRef>, RuleServiceError> {
        Ok(linking::rule_set_node(self.graph.as_ref(), folder)?)
    }

    /// # Errors
    ///
    /// Returns [`RuleServiceError::Graph`] if `folder` does not exist.
    pub fn is_linked_to_rule_node(&self, folder: NodeRef) -> Result<bool, RuleServiceError> {
        Ok(linking::is_linked_to_rule_node(self.graph.as_ref(), folder)?)
    }

    /// The folder owning the rule set `folder` links to.
    ///
    /// # Errors
    ///
    /// Returns [`RuleServiceError::Graph`] if `folder` does not exist.
    pub fn get_linked_to_rule_node(
        &self,
        folder: NodeRef,
    ) -> Result<Option<NodeRef>, RuleServiceError> {
        Ok(linking::linked_to_rule_node(self.graph.as_ref(), folder)?)
    }

    /// Folders linking to the rule set `folder` owns.
    ///
    /// # Errors
    ///
    /// Returns [`RuleServiceError::Graph`] if `folder` does not exist.
    pub fn get_linked_from_rule_nodes(
        &self,
        folder: NodeRef,
    ) -> Result<Vec<NodeRef>, RuleServiceError> {
        linking::linked_from_rule_nodes(self.graph.as_ref(), folder)
    }

    /// Make `to` share the rule set of `from`. Returns the shared rule-set
    /// node.
    ///
    /// # Errors
    ///
    /// Returns [`RuleServiceError::AccessDenied`] without change permissions
    /// on `to`, and [`RuleSetError::AlreadyOwnsRules`](crate::RuleSetError::AlreadyOwnsRules)
    /// when `to` owns rules.
    pub fn link(&self, from: NodeRef, to: NodeRef) -> Result<NodeRef, RuleServiceError> {
        self.check_change_permissions(to)?;
        let rule_set = linking::link(self.graph.as_ref(), from, to)?;
        self.store.cache().invalidate_all();
        Ok(rule_set)
    }

    /// Remove the link from `folder`. Returns whether it was linked.
    ///
    /// # Errors
    ///
    /// Returns [`RuleServiceError::AccessDenied`] without change permissions
    /// on `folder`.
    pub fn unlink(&self, folder: NodeRef) -> Result<bool, RuleServiceError> {
        self.check_change_permissions(folder)?;
        let unlinked = linking::unlink(self.graph.as_ref(), folder)?;
        self.store.cache().invalidate_all();
        Ok(unlinked)
    }

    /// # Errors
    ///
    /// Returns [`RuleServiceError::Graph`] if `rule_set` does not exist.
    pub fn is_rule_set_shared(&self, rule_set: NodeRef) -> Result<bool, RuleServiceError> {
        Ok(linking::is_rule_set_shared(self.graph.as_ref(), rule_set)?)
    }

    /// # Errors
    ///
    /// Returns [`RuleServiceError::Graph`] if either node does not exist.
    pub fn is_rule_set_associated_with_folder(
        &self,
        rule_set: NodeRef,
        folder: NodeRef,
    ) -> Result<bool, RuleServiceError> {
        Ok(linking::is_rule_set_associated_with_folder(
            self.graph.as_ref(),
            self.store.resolver(),
            rule_set,
            folder,
        )?)
    }

    // -- traversal --

    /// Folders inheriting `rule_set` that the current user can read.
    /// `max_results` defaults to the configured cap.
    ///
    /// # Errors
    ///
    /// Returns [`RuleSetError::NotARuleSetNode`](crate::RuleSetError::NotARuleSetNode)
    /// when `rule_set` is not a rule set.
    pub fn get_folders_inheriting_rule_set(
        &self,
        rule_set: NodeRef,
        max_results: Option<usize>,
    ) -> Result<Vec<NodeRef>, RuleServiceError> {
        let user = self.auth.current_user();
        traversal::folders_inheriting_rule_set(
            self.graph.as_ref(),
            self.permissions.as_ref(),
            user.as_deref(),
            rule_set,
            max_results.unwrap_or(self.config.default_max_results),
        )
    }

    /// Folders linking to `rule_set` that the current user can read.
    /// `max_results` defaults to the configured cap.
    ///
    /// # Errors
    ///
    /// Returns [`RuleSetError::NotARuleSetNode`](crate::RuleSetError::NotARuleSetNode)
    /// when `rule_set` is not a rule set.
    pub fn get_folders_linking_to_rule_set(
        &self,
        rule_set: NodeRef,
        max_results: Option<usize>,
    ) -> Result<Vec<NodeRef>, RuleServiceError> {
        let user = self.auth.current_user();
        traversal::folders_linking_to_rule_set(
            self.graph.as_ref(),
            self.permissions.as_ref(),
            user.as_deref(),
            rule_set,
            max_results.unwrap_or(self.config.default_max_results),
        )
    }

    // -- execution --

    /// Evaluate the rule's conditions against `actioned_upon` and run its
    /// action now. Returns whether the action ran.
    ///
    /// # Errors
    ///
    /// Returns [`RuleServiceError::Action`] when the action fails.
    pub fn execute_rule(&self, rule: &Rule, actioned_upon: NodeRef) -> Result<bool, RuleServiceError> {
        self.executor().execute_rule(rule, actioned_upon)
    }

    /// Queue `rule` to run against `actioned_upon` at the next
    /// [`execute_pending_rules()`](Self::execute_pending_rules).
    pub fn add_rule_pending_execution(
        &self,
        owning_folder: NodeRef,
        actioned_upon: NodeRef,
        rule: Rule,
    ) {
        self.pending.push(PendingRuleExecution {
            owning_folder,
            actioned_upon,
            rule,
        });
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Fire the rules triggered by the graph events recorded since the last
    /// call, including events produced by the rules themselves.
    ///
    /// Failing actions land in [`ExecutionReport::failed()`]. A trigger whose
    /// rules cannot be resolved, for instance because a stored rule is
    /// unreadable, lands in [`ExecutionReport::errors()`] and the remaining
    /// events still run.
    pub fn process_graph_events(&self) -> ExecutionReport {
        let mut pass = ExecutionPass::new();
        self.executor().pump(&mut pass);
        let report = pass.finish();
        log_report("event processing", &report);
        report
    }

    /// Run every queued rule execution once, whatever the current user.
    /// Entries whose node is gone are skipped; a failing entry does not stop
    /// the others.
    pub fn execute_pending_rules(&self) -> ExecutionReport {
        let mut pass = ExecutionPass::new();
        let executor = self.executor();
        executor.pump(&mut pass);
        executor.drain(&mut pass);
        let report = pass.finish();
        log_report("pending rule drain", &report);
        report
    }

    /// Drop queued executions without running them.
    pub fn clear_pending_rules(&self) {
        let dropped = self.pending.len();
        self.pending.clear();
        if dropped > 0 {
            info!(dropped, "pending rule executions discarded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::InMemoryGraph;
    use crate::permission::InMemoryPermissions;
    use crate::types::{Action, AssocType, NodeType};

    fn folder(graph: &InMemoryGraph, parent: NodeRef, name: &str) -> NodeRef {
        graph
            .create_node(parent, AssocType::Contains, name, NodeType::Folder)
            .unwrap()
            .child
    }

    fn tag(title: &str) -> Rule {
        Rule::new(title).action(Action::new("add-features").param("aspect-name", title))
    }

    #[test]
    fn rule_types_are_listed_with_labels() {
        let service = RuleService::new(Arc::new(InMemoryGraph::new()));
        let types = service.rule_types();
        assert_eq!(types, [RuleType::Inbound, RuleType::Outbound, RuleType::Update]);
        assert!(types.iter().all(|t| !t.display_label().is_empty()));
    }

    #[test]
    fn change_permission_guards_mutations() {
        let graph = Arc::new(InMemoryGraph::new());
        let permissions = Arc::new(InMemoryPermissions::new());
        let auth = Arc::new(AuthenticationContext::new());
        let service = RuleService::new(graph.clone())
            .permissions(permissions.clone())
            .authentication(auth.clone());
        let f = folder(&graph, graph.root(), "f");
        let mut rule = tag("r");
        service.save_rule(f, &mut rule).unwrap();

        permissions.deny_change("mallory", f);
        auth.set_current_user("mallory");
        let denied = |result: Result<(), RuleServiceError>| {
            matches!(result, Err(RuleServiceError::AccessDenied { node, .. }) if node == f)
        };
        assert!(denied(service.save_rule(f, &mut tag("other"))));
        assert!(denied(service.remove_rule(f, &rule)));
        assert!(denied(service.remove_all_rules(f)));
        assert!(denied(service.set_rule_position(f, &rule, 0)));
        assert!(matches!(
            service.unlink(f),
            Err(RuleServiceError::AccessDenied { .. })
        ));

        auth.set_current_user("trent");
        service.remove_rule(f, &rule).unwrap();
        assert_eq!(service.count_rules(f).unwrap(), 0);
    }

    #[test]
    fn global_switch_follows_config() {
        let config = RuleServiceConfig::from_yaml_str("rules_enabled: false\n").unwrap();
        let service = RuleService::with_config(Arc::new(InMemoryGraph::new()), config);
        let f = NodeRef::new(42);
        assert!(!service.is_enabled());
        assert!(!service.rules_enabled(f));
        service.enable_all();
        assert!(service.rules_enabled(f));
        service.disable_rules(f);
        assert!(!service.rules_enabled(f));
    }

    #[test]
    fn pending_queue_can_be_cleared() {
        let graph = Arc::new(InMemoryGraph::new());
        let service = RuleService::new(graph.clone());
        let f = folder(&graph, graph.root(), "f");
        let mut rule = tag("r");
        service.save_rule(f, &mut rule).unwrap();

        service.add_rule_pending_execution(f, f, rule.clone());
        service.add_rule_pending_execution(f, f, rule);
        assert_eq!(service.pending_count(), 2);
        service.clear_pending_rules();
        assert_eq!(service.pending_count(), 0);
        assert!(service.execute_pending_rules().executed().is_empty());
    }

    #[test]
    fn cache_serves_repeat_lookups() {
        let graph = Arc::new(InMemoryGraph::new());
        let service = RuleService::new(graph.clone());
        let f = folder(&graph, graph.root(), "f");
        service.save_rule(f, &mut tag("r")).unwrap();

        service.get_rules(f, true).unwrap();
        service.get_rules(f, true).unwrap();
        let stats = service.cache_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.entries, 1);

        service.invalidate_cache();
        assert_eq!(service.cache_stats().entries, 0);
    }

    #[test]
    fn execute_rule_runs_immediately() {
        let graph = Arc::new(InMemoryGraph::new());
        let service = RuleService::new(graph.clone());
        let f = folder(&graph, graph.root(), "f");
        let mut rule = tag("now");
        service.save_rule(f, &mut rule).unwrap();

        assert!(service.execute_rule(&rule, f).unwrap());
        assert!(graph.has_aspect(f, &crate::types::Aspect::new("now")));
        assert!(matches!(
            service.execute_rule(&Rule::new("no action"), f),
            Err(RuleServiceError::Validation(_))
        ));
    }
}
