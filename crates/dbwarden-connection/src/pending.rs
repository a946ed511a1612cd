//! Outstanding-query registry
//!
//! Each in-flight query registers a one-shot abort channel under its own token.
//! When the live handle fails, the supervisor drains every entry and sends the
//! handle error down each channel, so overlapping queries are all rejected and
//! none is rejected twice.

use std::collections::HashMap;
use tokio::sync::oneshot;

use dbwarden_core::WardenError;

/// Correlation token for one in-flight query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct QueryToken(u64);

/// Abort channels keyed by query token
#[derive(Debug, Default)]
pub(crate) struct PendingQueries {
    next: u64,
    entries: HashMap<QueryToken, oneshot::Sender<WardenError>>,
}

impl PendingQueries {
    /// Register a new in-flight query, returning its token and abort receiver
    pub(crate) fn register(&mut self) -> (QueryToken, oneshot::Receiver<WardenError>) {
        let token = QueryToken(self.next);
        self.next = self.next.wrapping_add(1);
        let (tx, rx) = oneshot::channel();
        self.entries.insert(token, tx);
        (token, rx)
    }

    /// Forget a query once it has settled
    pub(crate) fn remove(&mut self, token: QueryToken) -> bool {
        self.entries.remove(&token).is_some()
    }

    /// Take every abort channel, leaving the registry empty
    pub(crate) fn drain(&mut self) -> Vec<oneshot::Sender<WardenError>> {
        self.entries.drain().map(|(_, tx)| tx).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Deliver `error` to every drained query. Queries whose futures were already
/// dropped simply miss the message.
pub(crate) fn reject_all(senders: Vec<oneshot::Sender<WardenError>>, error: &WardenError) -> usize {
    senders
        .into_iter()
        .filter(|tx| !tx.is_closed())
        .map(|tx| tx.send(error.clone()).is_ok())
        .filter(|delivered| *delivered)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_remove() {
        let mut pending = PendingQueries::default();
        let (first, _rx1) = pending.register();
        let (second, _rx2) = pending.register();
        assert_ne!(first, second);
        assert_eq!(pending.len(), 2);

        assert!(pending.remove(first));
        assert!(!pending.remove(first));
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_drain_rejects_each_query_once() {
        let mut pending = PendingQueries::default();
        let (_a, mut rx_a) = pending.register();
        let (_b, mut rx_b) = pending.register();

        let error = WardenError::RuntimeHandle("connection reset by peer".into());
        let delivered = reject_all(pending.drain(), &error);

        assert_eq!(delivered, 2);
        assert_eq!(pending.len(), 0);
        assert_eq!(rx_a.try_recv().unwrap(), error);
        assert_eq!(rx_b.try_recv().unwrap(), error);

        // A second failure finds nothing left to reject
        let later = WardenError::RuntimeHandle("server closed the connection".into());
        assert_eq!(reject_all(pending.drain(), &later), 0);
    }

    #[test]
    fn test_dropped_receiver_is_skipped() {
        let mut pending = PendingQueries::default();
        let (_a, rx_a) = pending.register();
        let (_b, _rx_b) = pending.register();
        drop(rx_a);

        let delivered = reject_all(pending.drain(), &WardenError::RuntimeHandle("gone".into()));
        assert_eq!(delivered, 1);
    }
}
