use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use crate::types::NodeRef;

/// Permission evaluation, supplied by the host.
///
/// `user` is `None` for the system context, which implementations are
/// expected to allow everything.
pub trait PermissionChecker: Send + Sync {
    fn has_read_permission(&self, node: NodeRef, user: Option<&str>) -> bool;

    /// Whether `user` may change the rules attached to `node`.
    fn has_change_permissions(&self, node: NodeRef, user: Option<&str>) -> bool;
}

/// Grants everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl PermissionChecker for AllowAll {
    fn has_read_permission(&self, _node: NodeRef, _user: Option<&str>) -> bool {
        true
    }

    fn has_change_permissions(&self, _node: NodeRef, _user: Option<&str>) -> bool {
        true
    }
}

/// Deny-list permissions held in memory. Anything not denied is allowed.
#[derive(Debug, Default)]
pub struct InMemoryPermissions {
    read_denied: RwLock<HashMap<String, HashSet<NodeRef>>>,
    change_denied: RwLock<HashMap<String, HashSet<NodeRef>>>,
}

impl InMemoryPermissions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny_read(&self, user: &str, node: NodeRef) {
        self.read_denied
            .write()
            .entry(user.to_owned())
            .or_default()
            .insert(node);
    }

    pub fn deny_change(&self, user: &str, node: NodeRef) {
        self.change_denied
            .write()
            .entry(user.to_owned())
            .or_default()
            .insert(node);
    }

    pub fn allow_read(&self, user: &str, node: NodeRef) {
        if let Some(nodes) = self.read_denied.write().get_mut(user) {
            nodes.remove(&node);
        }
    }

    pub fn allow_change(&self, user: &str, node: NodeRef) {
        if let Some(nodes) = self.change_denied.write().get_mut(user) {
            nodes.remove(&node);
        }
    }
}

fn denied(
    table: &RwLock<HashMap<String, HashSet<NodeRef>>>,
    node: NodeRef,
    user: Option<&str>,
) -> bool {
    user.is_some_and(|u| table.read().get(u).is_some_and(|nodes| nodes.contains(&node)))
}

impl PermissionChecker for InMemoryPermissions {
    fn has_read_permission(&self, node: NodeRef, user: Option<&str>) -> bool {
        !denied(&self.read_denied, node, user)
    }

    fn has_change_permissions(&self, node: NodeRef, user: Option<&str>) -> bool {
        !denied(&self.change_denied, node, user)
    }
}
