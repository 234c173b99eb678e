//! Write-once value with waiter registration.

use std::sync::OnceLock;

use tokio::sync::Notify;

/// A value that is resolved at most once and can be awaited by any number of
/// tasks.
///
/// The first `resolve` wins; later calls are no-ops. Every waiter, including
/// ones that arrive after resolution, observes a reference to the same stored
/// value.
pub(crate) struct Resolvable<T> {
    value: OnceLock<T>,
    notify: Notify,
}

impl<T> Resolvable<T> {
    pub(crate) fn new() -> Self {
        Self {
            value: OnceLock::new(),
            notify: Notify::new(),
        }
    }

    /// Store `value` if unset. Returns `true` if this call set it.
    pub(crate) fn resolve(&self, value: T) -> bool {
        let won = self.value.set(value).is_ok();
        if won {
            self.notify.notify_waiters();
        }
        won
    }

    pub(crate) fn get(&self) -> Option<&T> {
        self.value.get()
    }

    pub(crate) fn is_resolved(&self) -> bool {
        self.value.get().is_some()
    }

    /// Wait until resolved. Returns immediately if already resolved.
    pub(crate) async fn wait(&self) -> &T {
        loop {
            // Register before checking so a concurrent resolve cannot be missed.
            let notified = self.notify.notified();
            if let Some(value) = self.value.get() {
                return value;
            }
            notified.await;
        }
    }
}

impl<T> Default for Resolvable<T> {
    fn default() -> Self {
        Self::new()
    }
}
