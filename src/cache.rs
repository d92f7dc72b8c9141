use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::debug;

use crate::types::{NodeRef, Rule};

#[derive(Debug, Default)]
struct Entries {
    revision: u64,
    lists: HashMap<(NodeRef, bool), Vec<Rule>>,
}

/// Resolved rule lists keyed by node and by whether inherited rules were
/// included.
///
/// Every entry is tagged with the graph revision it was computed at. A
/// lookup at a different revision drops the whole cache, so structural
/// changes never leave a stale list behind. Rule edits that do not touch the
/// graph structure call [`invalidate_all()`](Self::invalidate_all).
#[derive(Debug, Default)]
pub struct RuleCache {
    entries: RwLock<Entries>,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Lookup counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

impl RuleCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, node: NodeRef, inherited: bool, revision: u64) -> Option<Vec<Rule>> {
        {
            let entries = self.entries.read();
            if entries.revision == revision
                && let Some(rules) = entries.lists.get(&(node, inherited))
            {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(rules.clone());
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn insert(&self, node: NodeRef, inherited: bool, revision: u64, rules: Vec<Rule>) {
        let mut entries = self.entries.write();
        if entries.revision != revision {
            if !entries.lists.is_empty() {
                debug!(
                    from = entries.revision,
                    to = revision,
                    dropped = entries.lists.len(),
                    "graph changed, rule cache reset"
                );
            }
            entries.lists.clear();
            entries.revision = revision;
        }
        entries.lists.insert((node, inherited), rules);
    }

    pub fn invalidate_all(&self) {
        let mut entries = self.entries.write();
        if !entries.lists.is_empty() {
            debug!(dropped = entries.lists.len(), "rule cache invalidated");
        }
        entries.lists.clear();
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.read().lists.len(),
        }
    }
}
