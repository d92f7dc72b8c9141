//! The authenticated-user context.
//!
//! The rule engine only asks whether a user is set: rules triggered with no
//! user are deferred to the pending queue, and permission checks are
//! bypassed for the system context.

use parking_lot::Mutex;

/// The user the current unit of work runs as. `None` is the system context.
#[derive(Debug, Default)]
pub struct AuthenticationContext {
    user: Mutex<Option<String>>,
}

impl AuthenticationContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A context already authenticated as `user`.
    #[must_use]
    pub fn as_user(user: &str) -> Self {
        Self {
            user: Mutex::new(Some(user.to_owned())),
        }
    }

    #[must_use]
    pub fn current_user(&self) -> Option<String> {
        self.user.lock().clone()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.user.lock().is_some()
    }

    pub fn set_current_user(&self, user: &str) {
        *self.user.lock() = Some(user.to_owned());
    }

    pub fn clear(&self) {
        *self.user.lock() = None;
    }

    /// Run `f` in the system context, restoring the previous user afterwards,
    /// also when `f` panics.
    pub fn run_as_system<T>(&self, f: impl FnOnce() -> T) -> T {
        let _restore = RestoreUser {
            context: self,
            previous: self.user.lock().take(),
        };
        f()
    }
}

struct RestoreUser<'a> {
    context: &'a AuthenticationContext,
    previous: Option<String>,
}

impl Drop for RestoreUser<'_> {
    fn drop(&mut self) {
        *self.context.user.lock() = self.previous.take();
    }
}
