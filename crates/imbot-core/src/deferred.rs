//! Single-assignment promise shared between tasks

use core::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::errors::{ImbotError, Result};

/// A value that is completed at most once and can be awaited by any number of
/// clones. Later completions are ignored.
pub struct Deferred<T> {
    slot: Arc<watch::Sender<Option<T>>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Deferred<T> {
    pub fn new() -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            slot: Arc::new(slot),
        }
    }

    /// Store `value` if nothing was stored yet. Returns `true` on the first call.
    pub fn complete(&self, value: T) -> bool {
        let mut value = Some(value);
        self.slot.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = value.take();
            true
        })
    }

    pub fn is_complete(&self) -> bool {
        self.slot.borrow().is_some()
    }
}

impl<T: Clone> Deferred<T> {
    pub fn completed(value: T) -> Self {
        let deferred = Self::new();
        deferred.complete(value);
        deferred
    }

    pub fn try_get(&self) -> Option<T> {
        self.slot.borrow().clone()
    }

    /// Suspend until the value is available
    pub async fn wait(&self) -> T {
        let mut rx = self.slot.subscribe();
        loop {
            if let Some(value) = rx.borrow_and_update().clone() {
                return value;
            }
            // The sender is owned by `self` and outlives this receiver
            let _ = rx.changed().await;
        }
    }

    pub async fn wait_timeout(&self, timeout: Duration) -> Result<T> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| ImbotError::timeout("deferred value", timeout))
    }
}

impl<T: fmt::Debug> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("value", &*self.slot.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_completion_wins() {
        let deferred = Deferred::new();
        assert!(!deferred.is_complete());
        assert!(deferred.complete(1));
        assert!(!deferred.complete(2));
        assert_eq!(deferred.wait().await, 1);
    }

    #[tokio::test]
    async fn test_waiters_see_late_completion() {
        let deferred: Deferred<&'static str> = Deferred::new();
        let waiter = {
            let deferred = deferred.clone();
            tokio::spawn(async move { deferred.wait().await })
        };
        tokio::task::yield_now().await;
        deferred.complete("done");
        assert_eq!(waiter.await.unwrap(), "done");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_timeout() {
        let deferred: Deferred<u8> = Deferred::new();
        let result = deferred.wait_timeout(Duration::from_millis(10)).await;
        assert!(matches!(result, Err(ImbotError::Timeout { .. })));
    }
}
