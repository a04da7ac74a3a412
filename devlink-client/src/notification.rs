//! Notification fan-out
//!
//! Notifications are server-pushed messages without an id. The dispatcher
//! keeps a method-keyed list of handlers and invokes them synchronously, in
//! registration order, on the connection manager's driver task. Handler order
//! therefore follows wire order across notifications too.
//!
//! # Handler rules
//!
//! - A panicking handler is caught and logged; the remaining handlers for the
//!   same notification still run.
//! - Handlers may subscribe or unsubscribe from inside a dispatch. The list
//!   is snapshotted first, so changes take effect from the next notification.
//! - Handlers run on the driver task and should hand long work off to a
//!   spawned task rather than block.
//!
//! Notifications nobody subscribed to go to a catch-all sink, which logs a
//! warning unless replaced with
//! [`crate::ConnectionManager::on_unhandled_notification`].
//!
//! # Examples
//!
//! ```rust,no_run
//! use devlink_client::ConnectionManager;
//!
//! # fn example(manager: &ConnectionManager) {
//! let subscription = manager.subscribe("recording_stopped", |params| {
//!     println!("recording stopped: {}", params);
//! });
//!
//! // ... later
//! subscription.unsubscribe();
//! # }
//! ```

use crate::lock;
use devlink_core::JsonRpcNotification;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

/// Identifier of one registered handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

pub(crate) type Handler = Arc<dyn Fn(&Value) + Send + Sync>;
pub(crate) type UnhandledSink = Arc<dyn Fn(&JsonRpcNotification) + Send + Sync>;

struct Registry {
    next_id: u64,
    handlers: HashMap<String, Vec<(SubscriptionId, Handler)>>,
    unhandled: UnhandledSink,
}

/// Method-keyed handler registry
#[derive(Clone)]
pub struct NotificationDispatcher {
    registry: Arc<Mutex<Registry>>,
}

impl NotificationDispatcher {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 1,
                handlers: HashMap::new(),
                unhandled: Arc::new(log_unhandled),
            })),
        }
    }

    /// Register `handler` for notifications named `method`
    pub fn subscribe<F>(&self, method: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let method = method.into();
        let mut registry = lock(&self.registry);
        let id = SubscriptionId(registry.next_id);
        registry.next_id += 1;
        registry
            .handlers
            .entry(method.clone())
            .or_default()
            .push((id, Arc::new(handler)));
        drop(registry);

        tracing::debug!(method = %method, subscription = id.0, "subscribed");
        Subscription {
            dispatcher: self.clone(),
            id,
            method,
            active: true,
        }
    }

    /// Remove one handler. Returns whether it was still registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = lock(&self.registry);
        let mut removed = false;
        registry.handlers.retain(|_, handlers| {
            let before = handlers.len();
            handlers.retain(|(handler_id, _)| *handler_id != id);
            removed |= handlers.len() != before;
            !handlers.is_empty()
        });
        removed
    }

    /// Replace the catch-all sink for notifications without subscribers
    pub fn set_unhandled<F>(&self, sink: F)
    where
        F: Fn(&JsonRpcNotification) + Send + Sync + 'static,
    {
        lock(&self.registry).unhandled = Arc::new(sink);
    }

    /// Deliver one notification. Returns the number of handlers invoked.
    pub fn dispatch(&self, notification: &JsonRpcNotification) -> usize {
        let (handlers, unhandled) = {
            let registry = lock(&self.registry);
            let handlers: Vec<(SubscriptionId, Handler)> = registry
                .handlers
                .get(&notification.method)
                .cloned()
                .unwrap_or_default();
            (handlers, Arc::clone(&registry.unhandled))
        };

        if handlers.is_empty() {
            if catch_unwind(AssertUnwindSafe(|| unhandled(notification))).is_err() {
                tracing::error!(method = %notification.method, "unhandled-notification sink panicked");
            }
            return 0;
        }

        let params = notification.params_or_null();
        for (id, handler) in &handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(params))).is_err() {
                tracing::error!(
                    method = %notification.method,
                    subscription = id.0,
                    "notification handler panicked"
                );
            }
        }
        handlers.len()
    }

    pub fn has_subscribers(&self, method: &str) -> bool {
        lock(&self.registry).handlers.contains_key(method)
    }

    pub fn subscriber_count(&self, method: &str) -> usize {
        lock(&self.registry)
            .handlers
            .get(method)
            .map_or(0, Vec::len)
    }

    /// Methods with at least one handler
    pub fn methods(&self) -> Vec<String> {
        lock(&self.registry).handlers.keys().cloned().collect()
    }
}

impl Default for NotificationDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn log_unhandled(notification: &JsonRpcNotification) {
    tracing::warn!(
        method = %notification.method,
        params = %notification.params_or_null(),
        "notification without subscribers"
    );
}

/// Handle to a registered handler
///
/// The handler stays registered while this guard lives. Dropping it
/// unsubscribes; call [`Subscription::detach`] to keep the handler for the
/// lifetime of the manager instead.
#[must_use = "dropping a Subscription unsubscribes the handler"]
pub struct Subscription {
    dispatcher: NotificationDispatcher,
    id: SubscriptionId,
    method: String,
    active: bool,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Remove the handler now
    pub fn unsubscribe(mut self) -> bool {
        self.active = false;
        self.dispatcher.unsubscribe(self.id)
    }

    /// Keep the handler registered after this guard is dropped
    pub fn detach(mut self) -> SubscriptionId {
        self.active = false;
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.active {
            self.dispatcher.unsubscribe(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("method", &self.method)
            .finish()
    }
}
