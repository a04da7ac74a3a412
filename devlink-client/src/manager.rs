//! The connection manager facade
//!
//! [`ConnectionManager`] composes the transport, correlator, dispatcher,
//! health monitor, reconnect policy and polling fallback behind one cheaply
//! cloneable handle. All clones share the same connection.
//!
//! # Driver
//!
//! A single driver task consumes transport events, reconnect and
//! connect-timeout timers, and health-failure signals, one at a time. It is
//! the only writer of [`ConnectionState`]; API calls that change the state
//! (`connect`, `disconnect`, `force_reconnect`, `set_auto_reconnect`) take the
//! same short lock and never wait on I/O.
//!
//! Every transport event carries the epoch of the channel that produced it
//! and every reconnect timer carries a generation; the driver drops events
//! whose tag is no longer current. Tearing a connection down bumps the epoch,
//! which also fails every outstanding call with `ConnectionLost`.
//!
//! # Background tasks
//!
//! While connected, a health task probes liveness on `health.interval` and a
//! polling task runs the resync callback when the fallback says so. Both, and
//! the driver, hold only weak references to the manager and stop once the
//! last handle is dropped or [`ConnectionManager::dispose`] is called.

use crate::config::{millis, ClientConfig};
use crate::connection_state::{ConnectionEvent, ConnectionSnapshot, ConnectionState};
use crate::health::{ConnectionQuality, HealthMonitor};
use crate::lock;
use crate::metrics::{error_kind, ClientMetrics};
use crate::notification::{NotificationDispatcher, Subscription};
use crate::polling::{PollingFallback, PollingMode};
use crate::reconnect::{ReconnectDecision, ReconnectPolicy, ReconnectionStrategy};
use crate::request::{deadline_after, CallHandle, RequestCorrelator};
use crate::transport::{DriverEvent, Epoch, Transport, TransportEvent, TransportEvents};
use devlink_core::{codec, CallId, Error, Frame, JsonRpcNotification, Result};
use futures::future::BoxFuture;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

const EVENT_CAPACITY: usize = 64;

/// Callback run by the polling fallback
pub(crate) type ResyncFn =
    Arc<dyn Fn(ConnectionManager) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Real-time connection to a device-control service
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    runtime: Handle,
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    correlator: Arc<RequestCorrelator>,
    dispatcher: NotificationDispatcher,
    health: Mutex<HealthMonitor>,
    polling: Mutex<PollingFallback>,
    machine: Mutex<Machine>,
    status_tx: watch::Sender<ConnectionState>,
    events_tx: broadcast::Sender<ConnectionEvent>,
    driver_tx: mpsc::UnboundedSender<DriverEvent>,
    resync: Option<ResyncFn>,
    metrics: Option<Arc<ClientMetrics>>,
}

struct Machine {
    state: ConnectionState,
    policy: ReconnectPolicy,
    address: Option<String>,
    epoch: Epoch,
    generation: u64,
    reconnect_timer: Option<JoinHandle<()>>,
    connect_timer: Option<JoinHandle<()>>,
    background: Vec<JoinHandle<()>>,
    driver: Option<JoinHandle<()>>,
    disposed: bool,
}

impl Machine {
    fn abort_timers(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
        if let Some(timer) = self.connect_timer.take() {
            timer.abort();
        }
    }

    fn abort_background(&mut self) {
        for task in self.background.drain(..) {
            task.abort();
        }
    }
}

#[derive(Debug, Clone)]
enum Failure {
    Closed { clean: bool },
    Transport(String),
    ConnectTimeout(Duration),
    Health { failures: u32 },
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Failure::Closed { clean: true } => f.write_str("closed by peer"),
            Failure::Closed { clean: false } => f.write_str("channel dropped"),
            Failure::Transport(cause) => write!(f, "transport error: {}", cause),
            Failure::ConnectTimeout(timeout) => write!(f, "no connection within {:?}", timeout),
            Failure::Health { failures } => {
                write!(f, "{} consecutive liveness checks failed", failures)
            }
        }
    }
}

impl ConnectionManager {
    pub(crate) fn start(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        strategy: Box<dyn ReconnectionStrategy>,
        resync: Option<ResyncFn>,
        metrics: Option<Arc<ClientMetrics>>,
    ) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| {
            Error::Config("a ConnectionManager must be created inside a Tokio runtime".into())
        })?;

        let now = Instant::now();
        let mut policy = ReconnectPolicy::new(strategy, config.reconnect.max_attempts);
        policy.set_auto_reconnect(config.auto_reconnect);

        let mut health = HealthMonitor::new(config.health.scoring());
        health.set_probing(config.health.enabled);
        health.reset(now);
        let polling = PollingFallback::new(
            config.polling.mode,
            config.polling.sustain(),
            config.polling.notification_gap(),
        );

        let (status_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let (driver_tx, driver_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(Inner {
            runtime: runtime.clone(),
            config,
            transport,
            correlator: Arc::new(RequestCorrelator::new()),
            dispatcher: NotificationDispatcher::new(),
            health: Mutex::new(health),
            polling: Mutex::new(polling),
            machine: Mutex::new(Machine {
                state: ConnectionState::Disconnected,
                policy,
                address: None,
                epoch: Epoch::default(),
                generation: 0,
                reconnect_timer: None,
                connect_timer: None,
                background: Vec::new(),
                driver: None,
                disposed: false,
            }),
            status_tx,
            events_tx,
            driver_tx,
            resync,
            metrics,
        });

        let driver = runtime.spawn(drive(Arc::downgrade(&inner), driver_rx));
        lock(&inner.machine).driver = Some(driver);

        if let Some(metrics) = &inner.metrics {
            metrics.update_connection_state(&ConnectionState::Disconnected);
        }

        Ok(Self { inner })
    }

    // ----- lifecycle -------------------------------------------------------

    /// Start connecting to `address`
    ///
    /// Returns immediately; observe progress through [`Self::status`],
    /// [`Self::watch_status`] or [`Self::wait_until_connected`]. Resets the
    /// reconnect counter. Connecting again to the current address while
    /// already connected or connecting is a no-op.
    pub fn connect(&self, address: impl Into<String>) -> Result<()> {
        let address = address.into();
        let mut machine = lock(&self.inner.machine);
        if machine.disposed {
            return Err(Error::Config("connection manager has been disposed".into()));
        }

        let same_target = machine.address.as_deref() == Some(address.as_str());
        if same_target
            && matches!(
                machine.state,
                ConnectionState::Connected | ConnectionState::Connecting
            )
        {
            tracing::debug!(state = %machine.state, "already connecting or connected");
            return Ok(());
        }

        tracing::info!(%address, "connecting");
        machine.address = Some(address);
        machine.policy.reset();
        self.teardown(&mut machine);
        self.begin_connecting(&mut machine);
        Ok(())
    }

    /// Close the connection and stay disconnected. Idempotent.
    pub fn disconnect(&self) {
        let mut machine = lock(&self.inner.machine);
        if matches!(machine.state, ConnectionState::Disconnected) {
            return;
        }
        self.teardown(&mut machine);
        self.set_state(&mut machine, ConnectionState::Disconnected);
        tracing::info!("disconnected");
    }

    /// Drop the current connection and reconnect now
    ///
    /// Cancels any backoff timer, resets the attempt counter, and enters
    /// `Connecting` immediately. Also the way out of the `Error` state.
    #[tracing::instrument(skip_all)]
    pub fn force_reconnect(&self) -> Result<()> {
        let mut machine = lock(&self.inner.machine);
        if machine.disposed {
            return Err(Error::Config("connection manager has been disposed".into()));
        }
        if machine.address.is_none() {
            return Err(Error::Config("no address to reconnect to; call connect first".into()));
        }

        tracing::info!(state = %machine.state, "manual reconnect");
        self.teardown(&mut machine);
        machine.policy.reset();
        self.begin_connecting(&mut machine);
        Ok(())
    }

    /// Turn automatic reconnection on or off
    ///
    /// Turning it off while waiting to reconnect cancels the wait and leaves
    /// the manager `Disconnected`.
    pub fn set_auto_reconnect(&self, enabled: bool) {
        let mut machine = lock(&self.inner.machine);
        machine.policy.set_auto_reconnect(enabled);
        tracing::info!(enabled, "auto-reconnect changed");

        if !enabled && matches!(machine.state, ConnectionState::Reconnecting { .. }) {
            machine.abort_timers();
            self.set_state(&mut machine, ConnectionState::Disconnected);
        }
    }

    /// Shut everything down for good
    ///
    /// Closes the channel, fails outstanding calls, and stops the driver and
    /// background tasks. Later `connect` calls fail. Idempotent.
    pub fn dispose(&self) {
        let mut machine = lock(&self.inner.machine);
        if machine.disposed {
            return;
        }
        machine.disposed = true;
        self.teardown(&mut machine);
        self.set_state(&mut machine, ConnectionState::Disconnected);
        if let Some(driver) = machine.driver.take() {
            driver.abort();
        }
        tracing::info!("connection manager disposed");
    }

    /// Resolve once connected
    ///
    /// Fails with `ReconnectExhausted` when the manager gave up, and with
    /// `TransportUnavailable` when it is not trying to connect at all.
    pub async fn wait_until_connected(&self) -> Result<()> {
        let mut status = self.inner.status_tx.subscribe();
        loop {
            let state = status.borrow_and_update().clone();
            match state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Connecting | ConnectionState::Reconnecting { .. } => {}
                ConnectionState::Disconnected => {
                    return Err(Error::TransportUnavailable("not connecting".into()))
                }
                ConnectionState::Error { cause } => {
                    let machine = lock(&self.inner.machine);
                    if machine.policy.is_exhausted() {
                        return Err(Error::ReconnectExhausted {
                            attempts: machine.policy.attempts(),
                        });
                    }
                    return Err(Error::TransportUnavailable(cause));
                }
            }
            if status.changed().await.is_err() {
                return Err(Error::ConnectionLost);
            }
        }
    }

    // ----- observation -----------------------------------------------------

    pub fn status(&self) -> ConnectionState {
        self.inner.status_tx.borrow().clone()
    }

    /// Status channel that always holds the latest state
    pub fn watch_status(&self) -> watch::Receiver<ConnectionState> {
        self.inner.status_tx.subscribe()
    }

    /// Stream of connection events from now on
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Status plus health, for UI indicators
    ///
    /// Health is only meaningful while connected; otherwise the score is 0.
    pub fn state(&self) -> ConnectionSnapshot {
        let (status, reconnect_attempts) = {
            let machine = lock(&self.inner.machine);
            (machine.state.clone(), machine.policy.attempts())
        };
        let health_score = if status.is_connected() {
            lock(&self.inner.health).score(Instant::now())
        } else {
            0
        };
        ConnectionSnapshot {
            status,
            health_score,
            quality: ConnectionQuality::from_score(health_score),
            reconnect_attempts,
        }
    }

    pub fn address(&self) -> Option<String> {
        lock(&self.inner.machine).address.clone()
    }

    /// Calls awaiting a response on the current connection
    pub fn pending_calls(&self) -> usize {
        self.inner.correlator.pending_count()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    // ----- calls -----------------------------------------------------------

    /// Call `method` and deserialize the result
    ///
    /// `params` that serialize to `null` (such as `()`) are omitted from the
    /// envelope. Uses the configured default timeout.
    pub async fn call<P, R>(&self, method: &str, params: P) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        self.call_with_timeout(method, params, self.inner.config.call_timeout())
            .await
    }

    pub async fn call_with_timeout<P, R>(&self, method: &str, params: P, timeout: Duration) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let value = self
            .call_value_with_timeout(method, to_params(params)?, timeout)
            .await?;
        serde_json::from_value(value).map_err(|e| {
            Error::Serialization(format!("unexpected result for `{}`: {}", method, e))
        })
    }

    /// Call with a raw JSON value; `Value::Null` params are omitted
    pub async fn call_value(&self, method: &str, params: Value) -> Result<Value> {
        let params = (!params.is_null()).then_some(params);
        self.call_value_with_timeout(method, params, self.inner.config.call_timeout())
            .await
    }

    #[tracing::instrument(name = "call", skip_all, fields(method = %method))]
    async fn call_value_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        let outcome = match self.send_call(method, params, timeout) {
            Ok(handle) => handle.metered(self.inner.metrics.clone()).wait().await,
            Err(e) => {
                let outcome = Err(e);
                if let Some(metrics) = &self.inner.metrics {
                    metrics.record_call(method, &outcome, Duration::ZERO);
                }
                outcome
            }
        };

        if let Err(e) = &outcome {
            tracing::debug!(error = %e, "call failed");
        }
        outcome
    }

    /// Send a call and return a handle to await or cancel it
    ///
    /// Dropping the handle before it settles cancels the call locally.
    /// Awaited handles are metered like any other call; cancelled ones are
    /// not.
    pub fn start_call<P: Serialize>(&self, method: &str, params: P) -> Result<CallHandle> {
        let handle = self.send_call(method, to_params(params)?, self.inner.config.call_timeout())?;
        Ok(handle.metered(self.inner.metrics.clone()))
    }

    fn send_call(&self, method: &str, params: Option<Value>, timeout: Duration) -> Result<CallHandle> {
        let status = self.status();
        if !status.is_connected() {
            return Err(Error::TransportUnavailable(format!("connection is {}", status)));
        }

        let handle = self.inner.correlator.register(method, timeout)?;
        let frame = codec::encode_call(handle.id(), method, params)?;
        // On failure the handle drops here and releases its entry.
        self.inner.transport.send(frame)?;

        tracing::trace!(id = handle.id(), epoch = %handle.epoch(), method, "call sent");
        Ok(handle)
    }

    /// Present a credential to the service
    ///
    /// Sends `{"token": credential}` to the configured authenticate method.
    /// The credential is not stored.
    pub async fn authenticate(&self, credential: &str) -> Result<Value> {
        let method = self.inner.config.authenticate_method.clone();
        self.call_value(&method, json!({ "token": credential })).await
    }

    // ----- notifications ---------------------------------------------------

    /// Run `handler` with the params of every `method` notification
    pub fn subscribe<F>(&self, method: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.dispatcher.subscribe(method, handler)
    }

    /// Replace the sink for notifications nobody subscribed to
    pub fn on_unhandled_notification<F>(&self, handler: F)
    where
        F: Fn(&JsonRpcNotification) + Send + Sync + 'static,
    {
        self.inner.dispatcher.set_unhandled(handler);
    }

    // ----- polling ---------------------------------------------------------

    pub fn set_polling_mode(&self, mode: PollingMode) {
        lock(&self.inner.polling).set_mode(mode, Instant::now());
        tracing::info!(?mode, "polling mode changed");
    }

    pub fn polling_mode(&self) -> PollingMode {
        lock(&self.inner.polling).mode()
    }

    // ----- state machine ---------------------------------------------------

    fn set_state(&self, machine: &mut Machine, next: ConnectionState) {
        if machine.state == next {
            return;
        }
        let previous = std::mem::replace(&mut machine.state, next.clone());
        tracing::info!(from = %previous, to = %next, "connection state changed");

        if let Some(metrics) = &self.inner.metrics {
            metrics.update_connection_state(&next);
        }
        self.inner.status_tx.send_replace(next.clone());
        self.emit(ConnectionEvent::StateChanged {
            from: previous,
            to: next,
        });
    }

    fn emit(&self, event: ConnectionEvent) {
        let _ = self.inner.events_tx.send(event);
    }

    fn begin_connecting(&self, machine: &mut Machine) {
        let Some(address) = machine.address.clone() else {
            return;
        };
        machine.epoch = machine.epoch.next();
        let epoch = machine.epoch;
        self.set_state(machine, ConnectionState::Connecting);

        tracing::debug!(%address, %epoch, "opening channel");
        {
            // Callers may sit outside the runtime; transports spawn their I/O.
            let _runtime = self.inner.runtime.enter();
            self.inner.transport.open(
                &address,
                TransportEvents::new(epoch, self.inner.driver_tx.clone()),
            );
        }

        let timeout = self.inner.config.connect_timeout();
        let driver_tx = self.inner.driver_tx.clone();
        machine.connect_timer = Some(self.inner.runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = driver_tx.send(DriverEvent::ConnectTimeout { epoch });
        }));
    }

    /// Close the channel and invalidate everything tied to it
    fn teardown(&self, machine: &mut Machine) {
        machine.abort_timers();
        machine.abort_background();
        self.inner.transport.close();
        machine.epoch = machine.epoch.next();

        let failed = self.inner.correlator.end_epoch();
        if failed > 0 {
            tracing::debug!(failed, "outstanding calls failed with connection lost");
        }
    }

    fn on_opened(&self, machine: &mut Machine, epoch: Epoch) {
        if let Some(timer) = machine.connect_timer.take() {
            timer.abort();
        }
        let was_reconnecting = machine.policy.attempts() > 0;
        machine.policy.reset();

        let now = Instant::now();
        self.inner.correlator.begin_epoch(epoch);
        lock(&self.inner.health).reset(now);
        lock(&self.inner.polling).reset(now);

        self.set_state(machine, ConnectionState::Connected);
        if was_reconnecting {
            if let Some(metrics) = &self.inner.metrics {
                metrics.record_reconnection_success();
            }
        }

        let weak = Arc::downgrade(&self.inner);
        if self.inner.config.health.enabled {
            machine
                .background
                .push(self.inner.runtime.spawn(health_loop(weak.clone(), epoch)));
        }
        if self.inner.resync.is_some() {
            machine
                .background
                .push(self.inner.runtime.spawn(polling_loop(weak, epoch)));
        }
    }

    fn on_failure(&self, machine: &mut Machine, failure: Failure) {
        let was_connected = machine.state.is_connected();
        self.teardown(machine);

        if was_connected {
            tracing::warn!(cause = %failure, "connection lost");
        } else {
            tracing::warn!(cause = %failure, "connection attempt failed");
        }

        match machine.policy.on_failure() {
            ReconnectDecision::Retry { attempt, delay } => {
                self.set_state(machine, ConnectionState::Reconnecting { attempt });
                tracing::info!(attempt, delay_ms = millis(delay), "reconnect scheduled");
                if let Some(metrics) = &self.inner.metrics {
                    metrics.record_reconnection_attempt();
                }

                let generation = machine.generation;
                let driver_tx = self.inner.driver_tx.clone();
                machine.reconnect_timer = Some(self.inner.runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = driver_tx.send(DriverEvent::ReconnectDue { generation });
                }));
            }
            ReconnectDecision::Exhausted { attempts } => {
                tracing::error!(attempts, cause = %failure, "giving up on reconnecting");
                self.set_state(
                    machine,
                    ConnectionState::Error {
                        cause: format!("gave up after {} reconnect attempts: {}", attempts, failure),
                    },
                );
                self.emit(ConnectionEvent::ReconnectExhausted { attempts });
            }
            ReconnectDecision::Disabled => {
                let next = match failure {
                    Failure::Closed { .. } | Failure::Transport(_) if was_connected => {
                        ConnectionState::Disconnected
                    }
                    _ => ConnectionState::Error {
                        cause: failure.to_string(),
                    },
                };
                self.set_state(machine, next);
            }
        }
    }

    // ----- driver ----------------------------------------------------------

    fn handle(&self, event: DriverEvent) {
        let mut machine = lock(&self.inner.machine);
        if machine.disposed {
            return;
        }

        match event {
            DriverEvent::Transport { epoch, event } => {
                if epoch != machine.epoch {
                    tracing::trace!(%epoch, current = %machine.epoch, "stale transport event");
                    return;
                }
                match event {
                    TransportEvent::Opened => {
                        if machine.state == ConnectionState::Connecting {
                            self.on_opened(&mut machine, epoch);
                        }
                    }
                    TransportEvent::Frame(text) => {
                        if machine.state.is_connected() {
                            // Handlers may call back into the manager.
                            drop(machine);
                            self.on_frame(epoch, &text);
                        }
                    }
                    TransportEvent::Closed { clean } => {
                        self.on_failure(&mut machine, Failure::Closed { clean });
                    }
                    TransportEvent::Error(cause) => {
                        self.on_failure(&mut machine, Failure::Transport(cause));
                    }
                }
            }
            DriverEvent::ReconnectDue { generation } => {
                if generation == machine.generation
                    && matches!(machine.state, ConnectionState::Reconnecting { .. })
                {
                    machine.reconnect_timer = None;
                    self.begin_connecting(&mut machine);
                }
            }
            DriverEvent::ConnectTimeout { epoch } => {
                if epoch == machine.epoch && machine.state == ConnectionState::Connecting {
                    let timeout = self.inner.config.connect_timeout();
                    self.on_failure(&mut machine, Failure::ConnectTimeout(timeout));
                }
            }
            DriverEvent::HealthFailed { epoch, failures } => {
                if epoch == machine.epoch && machine.state.is_connected() {
                    self.emit(ConnectionEvent::HealthCheckFailed {
                        consecutive_failures: failures,
                    });
                    self.on_failure(&mut machine, Failure::Health { failures });
                }
            }
        }
    }

    fn on_frame(&self, epoch: Epoch, text: &str) {
        match codec::decode(text) {
            Frame::Response { id, result } => self.settle(epoch, id, Ok(result)),
            Frame::ErrorResponse { id, error } => self.settle(epoch, id, Err(Error::Remote(error))),
            Frame::Notification(notification) => {
                tracing::debug!(method = %notification.method, "notification received");
                if let Some(metrics) = &self.inner.metrics {
                    metrics.record_notification(&notification.method);
                }
                lock(&self.inner.polling).note_notification(Instant::now());
                self.inner.dispatcher.dispatch(&notification);
            }
            Frame::Malformed { reason } => {
                tracing::warn!(%reason, "discarding malformed frame");
                if let Some(metrics) = &self.inner.metrics {
                    metrics.record_error("protocol");
                }
                self.emit(ConnectionEvent::ProtocolError { reason });
            }
        }
    }

    fn settle(&self, epoch: Epoch, id: CallId, outcome: Result<Value>) {
        match self.inner.correlator.resolve(epoch, id, outcome) {
            Some(resolved) => tracing::trace!(
                id,
                method = %resolved.method,
                round_trip_ms = millis(resolved.round_trip),
                "call settled"
            ),
            None => tracing::debug!(id, "response for unknown call dropped"),
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let machine = lock(&self.inner.machine);
        f.debug_struct("ConnectionManager")
            .field("state", &machine.state)
            .field("address", &machine.address)
            .field("epoch", &machine.epoch)
            .field("policy", &machine.policy)
            .finish()
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let machine = self
            .machine
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        machine.abort_timers();
        machine.abort_background();
        if let Some(driver) = machine.driver.take() {
            driver.abort();
        }
        self.transport.close();
        self.correlator.end_epoch();
    }
}

fn to_params<P: Serialize>(params: P) -> Result<Option<Value>> {
    let value = serde_json::to_value(params)?;
    Ok((!value.is_null()).then_some(value))
}

async fn drive(weak: Weak<Inner>, mut events: mpsc::UnboundedReceiver<DriverEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = weak.upgrade() else {
            break;
        };
        ConnectionManager { inner }.handle(event);
    }
    tracing::trace!("driver stopped");
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval_at(deadline_after(Instant::now(), period), period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

#[tracing::instrument(name = "health", skip_all, fields(epoch = %epoch))]
async fn health_loop(weak: Weak<Inner>, epoch: Epoch) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    let health = inner.config.health.clone();
    let call_timeout = inner.config.call_timeout();
    drop(inner);

    let mut ticker = ticker(health.interval());
    loop {
        ticker.tick().await;

        let (handle, started) = {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.correlator.current_epoch() != Some(epoch) {
                return;
            }
            let manager = ConnectionManager { inner };
            (
                manager.send_call(&health.liveness_method, None, call_timeout),
                Instant::now(),
            )
        };

        let outcome = match handle {
            Ok(handle) => handle.wait().await,
            Err(e) => Err(e),
        };

        let Some(inner) = weak.upgrade() else {
            return;
        };
        let now = Instant::now();
        match outcome {
            // An error response still proves the channel is alive.
            Ok(_) | Err(Error::Remote(_)) => {
                lock(&inner.health).record_success(now.saturating_duration_since(started), now);
            }
            Err(Error::ConnectionLost) => return,
            Err(e) => {
                let failures = lock(&inner.health).record_failure();
                tracing::warn!(error = %e, failures, "liveness check failed");
                if let Some(metrics) = &inner.metrics {
                    metrics.record_error(error_kind(&e));
                }
                if failures >= health.failure_threshold {
                    let _ = inner
                        .driver_tx
                        .send(DriverEvent::HealthFailed { epoch, failures });
                }
            }
        }

        let score = lock(&inner.health).score(now);
        tracing::debug!(score, quality = %ConnectionQuality::from_score(score), "health sampled");
        if let Some(metrics) = &inner.metrics {
            metrics.record_health_score(score);
        }
    }
}

#[tracing::instrument(name = "polling", skip_all, fields(epoch = %epoch))]
async fn polling_loop(weak: Weak<Inner>, epoch: Epoch) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    let mut ticker = ticker(inner.config.polling.interval());
    drop(inner);

    loop {
        ticker.tick().await;

        let Some(inner) = weak.upgrade() else {
            return;
        };
        if inner.correlator.current_epoch() != Some(epoch) {
            return;
        }

        let now = Instant::now();
        let quality = lock(&inner.health).quality(now);
        let (run, switched) = {
            let mut polling = lock(&inner.polling);
            let before = polling.is_active();
            let run = polling.evaluate(now, quality);
            let after = polling.is_active();
            (run, (before != after).then_some(after))
        };

        if let Some(active) = switched {
            tracing::info!(active, %quality, "polling fallback switched");
            let _ = inner
                .events_tx
                .send(ConnectionEvent::PollingChanged { active });
        }
        if !run {
            continue;
        }
        let Some(resync) = inner.resync.clone() else {
            return;
        };
        let metrics = inner.metrics.clone();

        let result = resync(ConnectionManager { inner }).await;
        match &result {
            Ok(()) => tracing::debug!("resync complete"),
            Err(e) => tracing::warn!(error = %e, "resync failed"),
        }
        if let Some(metrics) = metrics {
            metrics.record_resync(result.is_ok());
        }
    }
}
