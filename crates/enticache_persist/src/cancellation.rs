//! Cancellation tokens keyed by correlation id.

use enticache_model::CorrelationId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info};

type Waiter = (u64, oneshot::Sender<Option<String>>);

/// Live cancellation tokens of in-flight requests.
///
/// A request registers a token when it is dispatched and drops it when it
/// finishes. Cancelling a correlation id signals every live token carrying
/// it; cancelling an id with no live token does nothing.
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    pending: Mutex<HashMap<CorrelationId, Vec<Waiter>>>,
    next_serial: AtomicU64,
}

impl CancellationRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a token for a request.
    pub fn register(self: &Arc<Self>, correlation_id: CorrelationId) -> CancelToken {
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        self.pending
            .lock()
            .entry(correlation_id.clone())
            .or_default()
            .push((serial, sender));
        debug!(%correlation_id, "registered cancellation token");
        CancelToken {
            correlation_id,
            serial,
            receiver: Some(receiver),
            registry: Arc::clone(self),
        }
    }

    /// Signals the tokens registered under `correlation_id`.
    ///
    /// Returns false if no request with that id is in flight.
    pub fn cancel(&self, correlation_id: &CorrelationId, reason: Option<String>) -> bool {
        let Some(waiters) = self.pending.lock().remove(correlation_id) else {
            debug!(%correlation_id, "cancel requested for unknown correlation id");
            return false;
        };
        info!(%correlation_id, reason = ?reason, requests = waiters.len(), "canceling persistence");
        for (_, sender) in waiters {
            let _ = sender.send(reason.clone());
        }
        true
    }

    /// Returns true if a request with this id is in flight.
    pub fn is_pending(&self, correlation_id: &CorrelationId) -> bool {
        self.pending.lock().contains_key(correlation_id)
    }

    /// Number of in-flight requests.
    pub fn len(&self) -> usize {
        self.pending.lock().values().map(Vec::len).sum()
    }

    /// Returns true if nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    fn release(&self, correlation_id: &CorrelationId, serial: u64) {
        let mut pending = self.pending.lock();
        if let Some(waiters) = pending.get_mut(correlation_id) {
            waiters.retain(|(s, _)| *s != serial);
            if waiters.is_empty() {
                pending.remove(correlation_id);
            }
        }
    }
}

/// The cancellation side of one in-flight request.
///
/// Dropping the token unregisters it.
#[derive(Debug)]
pub struct CancelToken {
    correlation_id: CorrelationId,
    serial: u64,
    receiver: Option<oneshot::Receiver<Option<String>>>,
    registry: Arc<CancellationRegistry>,
}

impl CancelToken {
    /// Correlation id of the request.
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Resolves with the cancel reason once the request is canceled.
    ///
    /// Never resolves if the request is not canceled.
    pub async fn canceled(&mut self) -> Option<String> {
        let Some(receiver) = self.receiver.as_mut() else {
            return std::future::pending().await;
        };
        match receiver.await {
            Ok(reason) => {
                self.receiver = None;
                reason
            }
            Err(_) => {
                self.receiver = None;
                std::future::pending().await
            }
        }
    }
}

impl Drop for CancelToken {
    fn drop(&mut self) {
        self.registry.release(&self.correlation_id, self.serial);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancel_signals_token() {
        let registry = Arc::new(CancellationRegistry::new());
        let mut token = registry.register(CorrelationId::from("CRID1"));
        assert!(registry.is_pending(&CorrelationId::from("CRID1")));

        assert!(registry.cancel(&CorrelationId::from("CRID1"), Some("user".into())));
        assert_eq!(token.canceled().await, Some("user".to_string()));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn uncanceled_token_stays_pending() {
        let registry = Arc::new(CancellationRegistry::new());
        let mut token = registry.register(CorrelationId::from("CRID1"));
        let waited = tokio::time::timeout(Duration::from_millis(20), token.canceled()).await;
        assert!(waited.is_err());
    }

    #[test]
    fn drop_unregisters_only_own_token() {
        let registry = Arc::new(CancellationRegistry::new());
        let first = registry.register(CorrelationId::from("CRID1"));
        let second = registry.register(CorrelationId::from("CRID1"));
        assert_eq!(registry.len(), 2);

        drop(first);
        assert_eq!(registry.len(), 1);
        assert!(registry.is_pending(second.correlation_id()));

        drop(second);
        assert!(registry.is_empty());
        assert!(!registry.cancel(&CorrelationId::from("CRID1"), None));
    }
}
