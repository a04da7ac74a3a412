//! Request correlation
//!
//! Every outbound call is registered here before it is sent and gets a
//! oneshot channel for its outcome. Responses may arrive in any order; they
//! are matched strictly by id.
//!
//! # Lifecycle of a call
//!
//! 1. **Register**: allocate the next id of the current epoch, record the
//!    method and deadline, and hand back a [`CallHandle`]
//! 2. **Send**: the manager encodes and sends the envelope
//! 3. **Settle**: exactly one of
//!    - a matching response or error response ([`RequestCorrelator::resolve`])
//!    - the deadline passing inside [`CallHandle::wait`] (`CallTimeout`)
//!    - the epoch ending ([`RequestCorrelator::end_epoch`], `ConnectionLost`)
//!    - the handle being cancelled or dropped (nothing is sent)
//!
//! # Epochs
//!
//! Ids restart at 1 with every connection epoch. A response is only matched
//! against the table of the epoch it arrived on, so a late answer from an old
//! connection can never complete a call issued on a new one.

use crate::lock;
use crate::metrics::ClientMetrics;
use crate::transport::Epoch;
use devlink_core::{CallId, Error, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

type Completion = oneshot::Sender<Result<Value>>;

// Stand-in deadline for timeouts too large to represent, as tokio's sleep does.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `start + timeout`, capped at a far-future instant instead of overflowing
pub(crate) fn deadline_after(start: Instant, timeout: Duration) -> Instant {
    start
        .checked_add(timeout)
        .unwrap_or_else(|| start + FAR_FUTURE)
}

struct PendingCall {
    method: String,
    sent_at: Instant,
    completion: Completion,
}

#[derive(Default)]
struct Table {
    epoch: Option<Epoch>,
    next_id: CallId,
    pending: HashMap<CallId, PendingCall>,
}

/// A call that was settled by a response
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Resolved {
    pub method: String,
    pub round_trip: Duration,
}

/// Pending-call table for one connection at a time
#[derive(Default)]
pub(crate) struct RequestCorrelator {
    table: Mutex<Table>,
}

impl RequestCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start accepting calls for a freshly opened connection
    pub(crate) fn begin_epoch(&self, epoch: Epoch) {
        let stale = {
            let mut table = lock(&self.table);
            table.epoch = Some(epoch);
            table.next_id = 1;
            std::mem::take(&mut table.pending)
        };
        fail_all(stale);
    }

    /// Stop accepting calls and fail everything outstanding with
    /// `ConnectionLost`. Returns how many calls were failed.
    pub(crate) fn end_epoch(&self) -> usize {
        let stale = {
            let mut table = lock(&self.table);
            table.epoch = None;
            std::mem::take(&mut table.pending)
        };
        let count = stale.len();
        fail_all(stale);
        count
    }

    /// Register a new call in the current epoch
    pub(crate) fn register(
        self: &Arc<Self>,
        method: &str,
        timeout: Duration,
    ) -> Result<CallHandle> {
        let sent_at = Instant::now();
        let (completion, outcome) = oneshot::channel();

        let mut table = lock(&self.table);
        let epoch = table
            .epoch
            .ok_or_else(|| Error::TransportUnavailable("not connected".into()))?;
        let id = table.next_id;
        table.next_id += 1;
        table.pending.insert(
            id,
            PendingCall {
                method: method.to_string(),
                sent_at,
                completion,
            },
        );
        drop(table);

        Ok(CallHandle {
            correlator: Arc::clone(self),
            epoch,
            id,
            method: method.to_string(),
            timeout,
            sent_at,
            deadline: deadline_after(sent_at, timeout),
            metrics: None,
            outcome: Some(outcome),
            settled: false,
        })
    }

    /// Settle the call `id` of `epoch` with a response outcome
    ///
    /// Returns `None` when no such call is pending (late, cancelled, or from
    /// another epoch).
    pub(crate) fn resolve(
        &self,
        epoch: Epoch,
        id: CallId,
        outcome: Result<Value>,
    ) -> Option<Resolved> {
        let call = {
            let mut table = lock(&self.table);
            if table.epoch != Some(epoch) {
                return None;
            }
            table.pending.remove(&id)?
        };

        let resolved = Resolved {
            method: call.method,
            round_trip: call.sent_at.elapsed(),
        };
        let _ = call.completion.send(outcome);
        Some(resolved)
    }

    /// Drop a pending call without settling it
    pub(crate) fn remove(&self, epoch: Epoch, id: CallId) -> bool {
        let mut table = lock(&self.table);
        table.epoch == Some(epoch) && table.pending.remove(&id).is_some()
    }

    /// Number of calls awaiting a response
    pub fn pending_count(&self) -> usize {
        lock(&self.table).pending.len()
    }

    pub(crate) fn current_epoch(&self) -> Option<Epoch> {
        lock(&self.table).epoch
    }
}

fn fail_all(pending: HashMap<CallId, PendingCall>) {
    for (_, call) in pending {
        let _ = call.completion.send(Err(Error::ConnectionLost));
    }
}

/// An in-flight call
///
/// Await the outcome with [`CallHandle::wait`]. Dropping the handle (or the
/// future returned by `wait`) before the call settles cancels it locally: the
/// pending entry is removed and a late response is ignored.
///
/// Handles come from [`crate::ConnectionManager::start_call`]; the table
/// behind them is internal:
///
/// ```compile_fail
/// let correlator = devlink_client::RequestCorrelator::new();
/// ```
#[must_use = "dropping a CallHandle cancels the call"]
pub struct CallHandle {
    correlator: Arc<RequestCorrelator>,
    epoch: Epoch,
    id: CallId,
    method: String,
    timeout: Duration,
    sent_at: Instant,
    deadline: Instant,
    metrics: Option<Arc<ClientMetrics>>,
    outcome: Option<oneshot::Receiver<Result<Value>>>,
    settled: bool,
}

impl CallHandle {
    pub fn id(&self) -> CallId {
        self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub(crate) fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Record the settled outcome in the call metrics
    pub(crate) fn metered(mut self, metrics: Option<Arc<ClientMetrics>>) -> Self {
        self.metrics = metrics;
        self
    }

    #[cfg(test)]
    pub(crate) fn is_metered(&self) -> bool {
        self.metrics.is_some()
    }

    /// Abandon the call. The server may still act on it.
    pub fn cancel(self) {
        tracing::debug!(id = self.id, method = %self.method, "call cancelled");
    }

    /// Wait for the response, the deadline, or the end of the connection
    pub async fn wait(mut self) -> Result<Value> {
        let Some(mut outcome) = self.outcome.take() else {
            return Err(Error::ConnectionLost);
        };

        let result = match tokio::time::timeout_at(self.deadline, &mut outcome).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ConnectionLost),
            Err(_) => {
                if self.correlator.remove(self.epoch, self.id) {
                    Err(Error::CallTimeout {
                        method: self.method.clone(),
                        timeout: self.timeout,
                    })
                } else {
                    // Settled concurrently with the deadline.
                    outcome.try_recv().unwrap_or(Err(Error::ConnectionLost))
                }
            }
        };

        self.settled = true;
        if let Some(metrics) = &self.metrics {
            metrics.record_call(&self.method, &result, self.sent_at.elapsed());
        }
        result
    }
}

impl Drop for CallHandle {
    fn drop(&mut self) {
        if !self.settled && self.correlator.remove(self.epoch, self.id) {
            tracing::trace!(id = self.id, method = %self.method, "pending call released");
        }
    }
}

impl std::fmt::Debug for CallHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallHandle")
            .field("epoch", &self.epoch)
            .field("id", &self.id)
            .field("method", &self.method)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devlink_core::JsonRpcErrorData;
    use serde_json::json;

    fn correlator() -> (Arc<RequestCorrelator>, Epoch) {
        let correlator = Arc::new(RequestCorrelator::new());
        let epoch = Epoch::default().next();
        correlator.begin_epoch(epoch);
        (correlator, epoch)
    }

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn test_register_requires_epoch() {
        let correlator = Arc::new(RequestCorrelator::new());
        let err = correlator.register("ping", TIMEOUT).unwrap_err();
        assert!(matches!(err, Error::TransportUnavailable(_)));
    }

    #[tokio::test]
    async fn test_ids_are_monotonic_and_reset_per_epoch() {
        let (correlator, epoch) = correlator();

        let first = correlator.register("a", TIMEOUT).unwrap();
        let second = correlator.register("b", TIMEOUT).unwrap();
        assert_eq!((first.id(), second.id()), (1, 2));
        assert_eq!(correlator.pending_count(), 2);

        correlator.end_epoch();
        correlator.begin_epoch(epoch.next());

        let third = correlator.register("c", TIMEOUT).unwrap();
        assert_eq!(third.id(), 1);
    }

    #[tokio::test]
    async fn test_resolve_out_of_order() {
        let (correlator, epoch) = correlator();

        let first = correlator.register("get_status", TIMEOUT).unwrap();
        let second = correlator.register("get_config", TIMEOUT).unwrap();

        let resolved = correlator.resolve(epoch, 2, Ok(json!("config"))).unwrap();
        assert_eq!(resolved.method, "get_config");
        correlator.resolve(epoch, 1, Ok(json!("status")));

        assert_eq!(first.wait().await.unwrap(), json!("status"));
        assert_eq!(second.wait().await.unwrap(), json!("config"));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_remote_error_outcome() {
        let (correlator, epoch) = correlator();
        let call = correlator.register("start_recording", TIMEOUT).unwrap();

        let error = JsonRpcErrorData::new(-32004, "already recording");
        correlator.resolve(epoch, call.id(), Err(Error::Remote(error.clone())));

        match call.wait().await {
            Err(Error::Remote(data)) => assert_eq!(data, error),
            other => panic!("expected remote error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_and_stale_ids_are_ignored() {
        let (correlator, epoch) = correlator();
        let _call = correlator.register("ping", TIMEOUT).unwrap();

        assert!(correlator.resolve(epoch, 99, Ok(json!(1))).is_none());
        assert!(correlator.resolve(epoch.next(), 1, Ok(json!(1))).is_none());
        assert_eq!(correlator.pending_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_removes_entry() {
        let (correlator, epoch) = correlator();
        let call = correlator
            .register("slow", Duration::from_millis(100))
            .unwrap();

        match call.wait().await {
            Err(Error::CallTimeout { method, timeout }) => {
                assert_eq!(method, "slow");
                assert_eq!(timeout, Duration::from_millis(100));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert_eq!(correlator.pending_count(), 0);
        assert!(correlator.resolve(epoch, 1, Ok(json!("late"))).is_none());
    }

    #[tokio::test]
    async fn test_unbounded_timeout_still_settles() {
        let (correlator, epoch) = correlator();
        let call = correlator.register("get_list", Duration::MAX).unwrap();

        correlator.resolve(epoch, call.id(), Ok(json!(["cam-1"])));
        assert_eq!(call.wait().await.unwrap(), json!(["cam-1"]));
    }

    #[tokio::test]
    async fn test_metered_handle_settles() {
        let (correlator, epoch) = correlator();
        let metrics = Arc::new(ClientMetrics::new("devlink-test"));

        let call = correlator
            .register("get_status", TIMEOUT)
            .unwrap()
            .metered(Some(metrics));
        assert!(call.is_metered());

        correlator.resolve(epoch, call.id(), Ok(json!({"recording": false})));
        assert_eq!(call.wait().await.unwrap(), json!({"recording": false}));
    }

    #[test]
    fn test_deadline_saturates() {
        let now = Instant::now();
        assert_eq!(
            deadline_after(now, Duration::from_secs(5)),
            now + Duration::from_secs(5)
        );
        assert!(deadline_after(now, Duration::MAX) >= now + FAR_FUTURE);
    }

    #[tokio::test]
    async fn test_end_epoch_fails_outstanding_calls() {
        let (correlator, _) = correlator();
        let first = correlator.register("a", TIMEOUT).unwrap();
        let second = correlator.register("b", TIMEOUT).unwrap();

        assert_eq!(correlator.end_epoch(), 2);
        assert!(matches!(first.wait().await, Err(Error::ConnectionLost)));
        assert!(matches!(second.wait().await, Err(Error::ConnectionLost)));
        assert!(correlator.current_epoch().is_none());
    }

    #[tokio::test]
    async fn test_drop_and_cancel_release_entries() {
        let (correlator, epoch) = correlator();

        let dropped = correlator.register("a", TIMEOUT).unwrap();
        drop(dropped);
        assert_eq!(correlator.pending_count(), 0);

        let cancelled = correlator.register("b", TIMEOUT).unwrap();
        let id = cancelled.id();
        cancelled.cancel();
        assert!(correlator.resolve(epoch, id, Ok(json!(1))).is_none());
    }

    #[tokio::test]
    async fn test_dropping_wait_future_cancels() {
        let (correlator, _) = correlator();
        let call = correlator.register("a", TIMEOUT).unwrap();

        let waiting = tokio::spawn(call.wait());
        tokio::task::yield_now().await;
        waiting.abort();
        let _ = waiting.await;

        assert_eq!(correlator.pending_count(), 0);
    }
}
