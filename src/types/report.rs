use std::fmt;
use std::time::Duration;

use super::node::NodeRef;

/// One rule applied to one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuleExecution {
    pub rule: NodeRef,
    pub actioned_upon: NodeRef,
}

/// What a processing pass did, returned by
/// [`RuleService::process_graph_events()`](crate::RuleService::process_graph_events)
/// and [`RuleService::execute_pending_rules()`](crate::RuleService::execute_pending_rules).
#[derive(Debug, Clone, Default)]
#[must_use]
pub struct ExecutionReport {
    executed: Vec<RuleExecution>,
    queued: Vec<RuleExecution>,
    skipped: Vec<RuleExecution>,
    failed: Vec<RuleExecution>,
    errors: Vec<String>,
    duration: Duration,
}

impl ExecutionReport {
    pub(crate) fn record_executed(&mut self, execution: RuleExecution) {
        self.executed.push(execution);
    }

    pub(crate) fn record_queued(&mut self, execution: RuleExecution) {
        self.queued.push(execution);
    }

    pub(crate) fn record_skipped(&mut self, execution: RuleExecution) {
        self.skipped.push(execution);
    }

    pub(crate) fn record_failed(&mut self, execution: RuleExecution) {
        self.failed.push(execution);
    }

    pub(crate) fn record_error(&mut self, error: String) {
        self.errors.push(error);
    }

    pub(crate) fn set_duration(&mut self, duration: Duration) {
        self.duration = duration;
    }

    /// Rules whose action ran, in execution order.
    #[must_use]
    pub fn executed(&self) -> &[RuleExecution] {
        &self.executed
    }

    /// Rules deferred to the pending queue.
    #[must_use]
    pub fn queued(&self) -> &[RuleExecution] {
        &self.queued
    }

    /// Rules not run because their conditions failed, they were disabled, or
    /// the actioned-upon node is gone.
    #[must_use]
    pub fn skipped(&self) -> &[RuleExecution] {
        &self.skipped
    }

    /// Rules whose action returned an error.
    #[must_use]
    pub fn failed(&self) -> &[RuleExecution] {
        &self.failed
    }

    /// Errors that kept a whole trigger from running, such as a rule that
    /// could not be read back while resolving a folder's rules.
    #[must_use]
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Wall-clock duration of the pass.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.executed.is_empty()
            && self.queued.is_empty()
            && self.skipped.is_empty()
            && self.failed.is_empty()
            && self.errors.is_empty()
    }
}

impl fmt::Display for ExecutionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "executed: {}, queued: {}, skipped: {}, failed: {}, errors: {}, duration: {:?}",
            self.executed.len(),
            self.queued.len(),
            self.skipped.len(),
            self.failed.len(),
            self.errors.len(),
            self.duration
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exec(rule: u64, node: u64) -> RuleExecution {
        RuleExecution {
            rule: NodeRef::new(rule),
            actioned_upon: NodeRef::new(node),
        }
    }

    #[test]
    fn report_accessors() {
        let mut report = ExecutionReport::default();
        assert!(report.is_empty());
        report.record_executed(exec(1, 10));
        report.record_queued(exec(2, 10));
        report.record_skipped(exec(3, 11));
        report.set_duration(Duration::from_nanos(500));

        assert_eq!(report.executed(), &[exec(1, 10)]);
        assert_eq!(report.queued(), &[exec(2, 10)]);
        assert_eq!(report.skipped(), &[exec(3, 11)]);
        assert!(report.failed().is_empty());
        assert!(report.errors().is_empty());
        assert_eq!(report.duration(), Duration::from_nanos(500));
        assert!(!report.is_empty());
    }

    #[test]
    fn report_display() {
        let mut report = ExecutionReport::default();
        report.record_executed(exec(1, 10));
        report.record_failed(exec(2, 10));
        let s = report.to_string();
        assert!(s.contains("executed: 1"));
        assert!(s.contains("failed: 1"));
        assert!(s.contains("queued: 0"));
        assert!(s.contains("errors: 0"));
    }

    #[test]
    fn errors_make_report_non_empty() {
        let mut report = ExecutionReport::default();
        report.record_error("rule set unreadable".to_owned());
        assert!(!report.is_empty());
        assert_eq!(report.errors(), &["rule set unreadable".to_owned()]);
    }
}
