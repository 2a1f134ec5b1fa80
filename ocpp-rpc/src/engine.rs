//! Call correlation engine
//!
//! Every open connection is owned by one actor task. The actor holds the
//! connection's only pending outbound call, its queue of inbound calls, and
//! is the single place that reads or writes that state. Callers, inbound
//! frames, handler completions and deadlines all reach it as [`Event`]s on
//! one mailbox, so they are processed strictly in arrival order.
//!
//! ```text
//!   Engine::send ──┐
//!   on_frame ──────┼──► mailbox ──► Connection actor ──► Transport::send_frame
//!   CallHandle ────┘                      │
//!   (cancel)                              └──► Dispatcher (spawned handler task)
//! ```

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::dispatch::Dispatcher;
use crate::error::{HandlerError, RpcError};
use crate::messages::{Call, CallError, CallResult, ErrorCode, Message};
use crate::registry::{Feature, Registry, Role};
use crate::transport::Transport;
use crate::types::Request;
use crate::validate::{self, summarize};

/// Everything an actor needs besides its own state
struct Context {
    config: EngineConfig,
    dispatcher: Dispatcher,
    transport: Arc<dyn Transport>,
}

struct Shared {
    ctx: Arc<Context>,
    connections: RwLock<HashMap<String, mpsc::Sender<Event>>>,
}

/// Protocol engine for one role
#[derive(Clone)]
pub struct Engine {
    shared: Arc<Shared>,
}

pub(crate) enum Event {
    Frame(Vec<u8>),
    Send {
        action: String,
        feature: Arc<Feature>,
        payload: Value,
        timeout: Duration,
        ack: oneshot::Sender<Result<String, RpcError>>,
        reply: oneshot::Sender<Result<Value, RpcError>>,
    },
    Cancel {
        message_id: String,
    },
    HandlerDone {
        message_id: String,
        action: String,
        result: Result<Value, HandlerError>,
    },
}

impl Engine {
    pub fn new(config: EngineConfig, dispatcher: Dispatcher, transport: Arc<dyn Transport>) -> Self {
        Self {
            shared: Arc::new(Shared {
                ctx: Arc::new(Context {
                    config,
                    dispatcher,
                    transport,
                }),
                connections: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn role(&self) -> Role {
        self.shared.ctx.dispatcher.role()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        self.shared.ctx.dispatcher.registry()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.shared.ctx.dispatcher
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.ctx.config
    }

    /// Start tracking `connection_id`.
    ///
    /// A connection that is already open is replaced; its pending call
    /// resolves with `Disconnected`.
    pub fn on_connected(&self, connection_id: &str) {
        let capacity = self.shared.ctx.config.mailbox_capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);

        let actor = Connection {
            id: connection_id.to_string(),
            ctx: self.shared.ctx.clone(),
            events: tx.downgrade(),
            pending: None,
            handler_busy: false,
            queued: VecDeque::new(),
        };

        let previous = self
            .shared
            .connections
            .write()
            .insert(connection_id.to_string(), tx);
        if previous.is_some() {
            warn!(connection_id, "Connection replaced by a new link");
        }

        tokio::spawn(actor.run(rx));
    }

    /// Stop tracking `connection_id`. Its pending call resolves with
    /// `Disconnected` and queued inbound calls are dropped.
    pub fn on_disconnected(&self, connection_id: &str) {
        if self.shared.connections.write().remove(connection_id).is_none() {
            debug!(connection_id, "Disconnect for unknown connection");
        }
    }

    pub fn is_connected(&self, connection_id: &str) -> bool {
        self.shared.connections.read().contains_key(connection_id)
    }

    /// Ids of all open connections, sorted
    pub fn connections(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.shared.connections.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Feed one complete inbound frame
    pub async fn on_frame_received(&self, connection_id: &str, frame: Vec<u8>) -> Result<(), RpcError> {
        let tx = self.mailbox(connection_id)?;
        tx.send(Event::Frame(frame))
            .await
            .map_err(|_| RpcError::Disconnected(connection_id.to_string()))
    }

    /// Send a call with the configured timeout.
    ///
    /// Returns once the frame is handed to the transport; the returned
    /// handle resolves with the peer's reply.
    pub async fn send(&self, connection_id: &str, action: &str, payload: Value) -> Result<CallHandle, RpcError> {
        let timeout = self.shared.ctx.config.call_timeout;
        self.send_with_timeout(connection_id, action, payload, timeout).await
    }

    pub async fn send_with_timeout(
        &self,
        connection_id: &str,
        action: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<CallHandle, RpcError> {
        let feature = self
            .registry()
            .resolve(action)
            .map_err(|_| RpcError::NotRegistered(action.to_string()))?
            .clone();

        let role = self.role();
        if !feature.direction().sender_allowed(role) {
            return Err(RpcError::RoleMismatch {
                action: action.to_string(),
                role,
            });
        }

        let tx = self.mailbox(connection_id)?;
        let (ack_tx, ack_rx) = oneshot::channel();
        let (reply_tx, reply_rx) = oneshot::channel();

        tx.send(Event::Send {
            action: action.to_string(),
            feature,
            payload,
            timeout,
            ack: ack_tx,
            reply: reply_tx,
        })
        .await
        .map_err(|_| RpcError::Disconnected(connection_id.to_string()))?;

        let events = tx.downgrade();
        drop(tx);

        let message_id = ack_rx
            .await
            .map_err(|_| RpcError::Disconnected(connection_id.to_string()))??;

        Ok(CallHandle {
            connection_id: connection_id.to_string(),
            message_id,
            action: action.to_string(),
            rx: reply_rx,
            events,
            settled: false,
        })
    }

    /// Send a call and wait for its reply
    pub async fn call(&self, connection_id: &str, action: &str, payload: Value) -> Result<Value, RpcError> {
        self.send(connection_id, action, payload).await?.await
    }

    /// Typed variant of [`Engine::call`]
    pub async fn send_request<R: Request>(&self, connection_id: &str, request: &R) -> Result<R::Response, RpcError> {
        let payload = serde_json::to_value(request)?;
        let response = self.call(connection_id, R::ACTION, payload).await?;
        Ok(serde_json::from_value(response)?)
    }

    fn mailbox(&self, connection_id: &str) -> Result<mpsc::Sender<Event>, RpcError> {
        self.shared
            .connections
            .read()
            .get(connection_id)
            .cloned()
            .ok_or_else(|| RpcError::UnknownConnection(connection_id.to_string()))
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("role", &self.role())
            .field("connections", &self.connections())
            .finish()
    }
}

/// Reply handle of an outbound call.
///
/// Resolves with the peer's CALLRESULT payload, or an error. Dropping it
/// before it resolves cancels the call and frees the connection.
#[must_use = "dropping a CallHandle cancels the call"]
pub struct CallHandle {
    connection_id: String,
    message_id: String,
    action: String,
    rx: oneshot::Receiver<Result<Value, RpcError>>,
    events: mpsc::WeakSender<Event>,
    settled: bool,
}

impl CallHandle {
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    /// Abandon the call. A reply arriving later is discarded.
    pub fn cancel(self) {
        drop(self);
    }
}

impl Future for CallHandle {
    type Output = Result<Value, RpcError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(result)) => {
                this.settled = true;
                Poll::Ready(result)
            }
            Poll::Ready(Err(_)) => {
                this.settled = true;
                Poll::Ready(Err(RpcError::Disconnected(this.connection_id.clone())))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for CallHandle {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Some(tx) = self.events.upgrade() {
            // A full mailbox is fine: the actor also notices the dropped
            // receiver before it accepts the next call.
            let _ = tx.try_send(Event::Cancel {
                message_id: self.message_id.clone(),
            });
        }
    }
}

impl std::fmt::Debug for CallHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallHandle")
            .field("connection_id", &self.connection_id)
            .field("message_id", &self.message_id)
            .field("action", &self.action)
            .finish()
    }
}

/// The connection's one outstanding outbound call
struct PendingCall {
    message_id: String,
    action: String,
    feature: Arc<Feature>,
    reply: oneshot::Sender<Result<Value, RpcError>>,
    deadline: Instant,
}

/// Per-connection actor state
struct Connection {
    id: String,
    ctx: Arc<Context>,
    events: mpsc::WeakSender<Event>,
    pending: Option<PendingCall>,
    handler_busy: bool,
    queued: VecDeque<Call>,
}

impl Connection {
    async fn run(mut self, mut rx: mpsc::Receiver<Event>) {
        info!(connection_id = %self.id, role = %self.ctx.dispatcher.role(), "Connection opened");

        loop {
            let deadline = self.pending.as_ref().map(|p| p.deadline);
            tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => self.on_event(event).await,
                    None => break,
                },
                _ = wait_until(deadline) => self.expire(),
            }
        }

        self.shutdown();
    }

    async fn on_event(&mut self, event: Event) {
        match event {
            Event::Frame(bytes) => self.on_frame(bytes).await,
            Event::Send {
                action,
                feature,
                payload,
                timeout,
                ack,
                reply,
            } => {
                let result = self.start_send(action, feature, payload, timeout, reply).await;
                let accepted = result.is_ok();
                if ack.send(result).is_err() && accepted {
                    // Caller went away before learning the id
                    self.pending = None;
                }
            }
            Event::Cancel { message_id } => {
                if self.pending.as_ref().map_or(false, |p| p.message_id == message_id) {
                    if let Some(call) = self.pending.take() {
                        debug!(
                            connection_id = %self.id,
                            message_id = %call.message_id,
                            action = %call.action,
                            "Call cancelled"
                        );
                        let _ = call.reply.send(Err(RpcError::Cancelled));
                    }
                }
            }
            Event::HandlerDone {
                message_id,
                action,
                result,
            } => {
                self.finish_inbound(message_id, action, result).await;
                self.handler_busy = false;
                self.drain_queue().await;
            }
        }
    }

    async fn start_send(
        &mut self,
        action: String,
        feature: Arc<Feature>,
        payload: Value,
        timeout: Duration,
        reply: oneshot::Sender<Result<Value, RpcError>>,
    ) -> Result<String, RpcError> {
        if self.pending.as_ref().map_or(false, |p| p.reply.is_closed()) {
            self.pending = None;
        }
        if self.pending.is_some() {
            return Err(RpcError::AlreadyPending(self.id.clone()));
        }

        let violations = validate::validate(&payload, feature.request());
        if !violations.is_empty() {
            return Err(RpcError::ValidationFailed(violations));
        }

        let deadline = deadline_after(timeout);
        let message_id = Uuid::new_v4().to_string();
        let frame = Call::new(message_id.clone(), action.clone(), payload).to_bytes()?;

        debug!(connection_id = %self.id, message_id = %message_id, action = %action, "Sending call");
        self.ctx.transport.send_frame(&self.id, frame).await?;

        self.pending = Some(PendingCall {
            message_id: message_id.clone(),
            action,
            feature,
            reply,
            deadline,
        });
        Ok(message_id)
    }

    async fn on_frame(&mut self, bytes: Vec<u8>) {
        let message = match Message::parse(&bytes) {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    connection_id = %self.id,
                    message_id = ?e.message_id,
                    "Dropping frame: {}",
                    e
                );
                if let Some(reply) = e.reply() {
                    self.write(Message::CallError(reply)).await;
                }
                return;
            }
        };

        debug!(
            connection_id = %self.id,
            message_id = %message.message_id(),
            "Received frame"
        );

        match message {
            Message::Call(call) => self.on_call(call).await,
            Message::CallResult(result) => {
                self.on_reply(result.message_id, Ok(result.payload));
            }
            Message::CallError(error) => {
                self.on_reply(
                    error.message_id,
                    Err(RpcError::Remote {
                        code: error.error_code,
                        description: error.error_description,
                        details: error.error_details,
                    }),
                );
            }
        }
    }

    fn on_reply(&mut self, message_id: String, outcome: Result<Value, RpcError>) {
        if !self.pending.as_ref().map_or(false, |p| p.message_id == message_id) {
            warn!(
                connection_id = %self.id,
                message_id = %message_id,
                "Reply for unknown or expired call, discarding"
            );
            return;
        }
        let Some(call) = self.pending.take() else {
            return;
        };

        let outcome = outcome.and_then(|payload| {
            let violations = validate::validate(&payload, call.feature.response());
            if violations.is_empty() {
                Ok(payload)
            } else {
                warn!(
                    connection_id = %self.id,
                    message_id = %message_id,
                    action = %call.action,
                    "Invalid response: {}",
                    summarize(&violations)
                );
                Err(RpcError::ValidationFailed(violations))
            }
        });

        debug!(
            connection_id = %self.id,
            message_id = %message_id,
            action = %call.action,
            ok = outcome.is_ok(),
            "Call completed"
        );
        let _ = call.reply.send(outcome);
    }

    async fn on_call(&mut self, call: Call) {
        if self.handler_busy && self.queued.len() >= self.ctx.config.max_queued_calls {
            warn!(
                connection_id = %self.id,
                message_id = %call.message_id,
                action = %call.action,
                "Inbound queue full, rejecting call"
            );
            let reply = CallError::new(
                call.message_id,
                ErrorCode::RpcFrameworkError,
                "too many calls in flight",
            );
            self.write(Message::CallError(reply)).await;
            return;
        }

        self.queued.push_back(call);
        self.drain_queue().await;
    }

    /// Start queued calls until one needs a handler
    async fn drain_queue(&mut self) {
        while !self.handler_busy {
            let Some(call) = self.queued.pop_front() else {
                break;
            };
            if let Some(reply) = self.check_inbound(&call) {
                self.write(Message::CallError(reply)).await;
                continue;
            }
            self.spawn_handler(call);
        }
    }

    /// Refusal for an inbound call, if it must not reach a handler
    fn check_inbound(&self, call: &Call) -> Option<CallError> {
        let registry = self.ctx.dispatcher.registry();
        let feature = match registry.resolve(&call.action) {
            Ok(feature) => feature,
            Err(e) => {
                warn!(connection_id = %self.id, message_id = %call.message_id, "{}", e);
                return Some(CallError::new(
                    call.message_id.clone(),
                    ErrorCode::NotImplemented,
                    format!("unknown action {}", call.action),
                ));
            }
        };

        let sender = self.ctx.dispatcher.role().peer();
        if !feature.direction().sender_allowed(sender) {
            warn!(
                connection_id = %self.id,
                message_id = %call.message_id,
                action = %call.action,
                "Call from wrong role"
            );
            return Some(CallError::new(
                call.message_id.clone(),
                ErrorCode::NotSupported,
                format!("{} may not send {}", sender, call.action),
            ));
        }

        let violations = validate::validate(&call.payload, feature.request());
        if !violations.is_empty() {
            warn!(
                connection_id = %self.id,
                message_id = %call.message_id,
                action = %call.action,
                "Invalid request: {}",
                summarize(&violations)
            );
            return Some(CallError::from_violations(call.message_id.clone(), &violations));
        }

        None
    }

    fn spawn_handler(&mut self, call: Call) {
        self.handler_busy = true;

        let ctx = self.ctx.clone();
        let events = self.events.clone();
        let connection_id = self.id.clone();

        tokio::spawn(async move {
            let Call {
                message_id,
                action,
                payload,
            } = call;

            // Inner task so a panicking handler still produces a reply
            let task = {
                let action = action.clone();
                tokio::spawn(async move {
                    ctx.dispatcher.handle(&connection_id, &action, payload).await
                })
            };
            let result = match task.await {
                Ok(result) => result,
                Err(e) => Err(HandlerError::internal(format!("handler failed: {}", e))),
            };

            if let Some(tx) = events.upgrade() {
                let _ = tx
                    .send(Event::HandlerDone {
                        message_id,
                        action,
                        result,
                    })
                    .await;
            }
        });
    }

    async fn finish_inbound(&mut self, message_id: String, action: String, result: Result<Value, HandlerError>) {
        let reply = match result {
            Ok(response) => {
                let violations = match self.ctx.dispatcher.registry().resolve(&action) {
                    Ok(feature) if self.ctx.config.validate_responses => {
                        validate::validate(&response, feature.response())
                    }
                    _ => Vec::new(),
                };
                if violations.is_empty() {
                    Message::CallResult(CallResult::new(message_id, response))
                } else {
                    warn!(
                        connection_id = %self.id,
                        message_id = %message_id,
                        action = %action,
                        "Handler returned invalid response: {}",
                        summarize(&violations)
                    );
                    Message::CallError(CallError::new(
                        message_id,
                        ErrorCode::InternalError,
                        format!("invalid response: {}", summarize(&violations)),
                    ))
                }
            }
            Err(e) => {
                warn!(
                    connection_id = %self.id,
                    message_id = %message_id,
                    action = %action,
                    "Handler error: {}",
                    e
                );
                Message::CallError(CallError::from_handler(message_id, e))
            }
        };

        self.write(reply).await;
    }

    fn expire(&mut self) {
        if let Some(call) = self.pending.take() {
            warn!(
                connection_id = %self.id,
                message_id = %call.message_id,
                action = %call.action,
                "Call timed out"
            );
            let _ = call.reply.send(Err(RpcError::Timeout));
        }
    }

    async fn write(&self, message: Message) {
        let frame = match message.to_bytes() {
            Ok(frame) => frame,
            Err(e) => {
                error!(connection_id = %self.id, "Failed to serialize frame: {}", e);
                return;
            }
        };

        debug!(connection_id = %self.id, message_id = %message.message_id(), "Sending reply");
        if let Err(e) = self.ctx.transport.send_frame(&self.id, frame).await {
            error!(connection_id = %self.id, message_id = %message.message_id(), "Transport error: {}", e);
        }
    }

    fn shutdown(&mut self) {
        if let Some(call) = self.pending.take() {
            let _ = call.reply.send(Err(RpcError::Disconnected(self.id.clone())));
        }
        if !self.queued.is_empty() {
            debug!(connection_id = %self.id, dropped = self.queued.len(), "Dropping queued calls");
            self.queued.clear();
        }
        info!(connection_id = %self.id, "Connection closed");
    }
}

/// Deadlines past the end of the clock are capped at ~30 years out
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout.min(FAR_FUTURE)).unwrap_or(now)
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Direction, Profile};
    use crate::transport::{MemoryTransport, Outbound};
    use crate::validate::{Field, Shape};
    use serde_json::json;

    fn registry() -> Arc<Registry> {
        let profile = Profile::new("Test")
            .feature(Feature::new(
                "Foo",
                Direction::ToStation,
                Shape::new("FooRequest").field(Field::integer("n").required().non_negative()),
                Shape::new("FooResponse").field(Field::boolean("ok").required()),
            ))
            .feature(Feature::new(
                "Up",
                Direction::ToCsms,
                Shape::new("UpRequest"),
                Shape::new("UpResponse"),
            ));
        Arc::new(Registry::with_profiles([profile]).unwrap())
    }

    fn csms() -> (Engine, mpsc::UnboundedReceiver<Outbound>) {
        let (transport, rx) = MemoryTransport::new();
        let dispatcher = Dispatcher::new(Role::Csms, registry());
        let config = EngineConfig::default().with_call_timeout(Duration::from_millis(100));
        let engine = Engine::new(config, dispatcher, transport);
        engine.on_connected("cs-1");
        (engine, rx)
    }

    fn sent_call(out: &Outbound) -> Call {
        match Message::parse(&out.frame).unwrap() {
            Message::Call(call) => call,
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reply_resolves_handle() {
        let (engine, mut rx) = csms();
        let handle = engine.send("cs-1", "Foo", json!({"n": 5})).await.unwrap();

        let call = sent_call(&rx.recv().await.unwrap());
        assert_eq!(call.message_id, handle.message_id());
        assert_eq!(call.action, "Foo");

        let reply = CallResult::new(call.message_id, json!({"ok": true}));
        engine.on_frame_received("cs-1", reply.to_bytes().unwrap()).await.unwrap();

        assert_eq!(handle.await.unwrap(), json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_send_rejections_before_actor() {
        let (engine, mut rx) = csms();

        assert!(matches!(
            engine.send("cs-1", "Nope", json!({})).await,
            Err(RpcError::NotRegistered(_))
        ));
        assert!(matches!(
            engine.send("cs-1", "Up", json!({})).await,
            Err(RpcError::RoleMismatch { .. })
        ));
        assert!(matches!(
            engine.send("cs-9", "Foo", json!({"n": 1})).await,
            Err(RpcError::UnknownConnection(_))
        ));

        let err = engine.send("cs-1", "Foo", json!({"n": -1})).await.unwrap_err();
        assert!(matches!(err, RpcError::ValidationFailed(_)));
        assert_eq!(err.error_code(), ErrorCode::PropertyConstraintViolation);

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_second_send_is_already_pending() {
        let (engine, mut rx) = csms();
        let _first = engine.send("cs-1", "Foo", json!({"n": 1})).await.unwrap();
        rx.recv().await.unwrap();

        let err = engine.send("cs-1", "Foo", json!({"n": 2})).await.unwrap_err();
        assert!(matches!(err, RpcError::AlreadyPending(ref id) if id == "cs-1"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_remote_error_and_invalid_response() {
        let (engine, mut rx) = csms();

        let handle = engine.send("cs-1", "Foo", json!({"n": 1})).await.unwrap();
        let call = sent_call(&rx.recv().await.unwrap());
        let error = CallError::new(call.message_id, ErrorCode::SecurityError, "denied");
        engine.on_frame_received("cs-1", error.to_bytes().unwrap()).await.unwrap();
        assert!(matches!(
            handle.await,
            Err(RpcError::Remote { code: ErrorCode::SecurityError, .. })
        ));

        let handle = engine.send("cs-1", "Foo", json!({"n": 1})).await.unwrap();
        let call = sent_call(&rx.recv().await.unwrap());
        let reply = CallResult::new(call.message_id, json!({"ok": "yes"}));
        engine.on_frame_received("cs-1", reply.to_bytes().unwrap()).await.unwrap();
        assert!(matches!(handle.await, Err(RpcError::ValidationFailed(_))));
    }

    #[tokio::test]
    async fn test_disconnect_resolves_pending() {
        let (engine, _rx) = csms();
        let handle = engine.send("cs-1", "Foo", json!({"n": 1})).await.unwrap();

        engine.on_disconnected("cs-1");
        assert!(!engine.is_connected("cs-1"));
        assert!(matches!(handle.await, Err(RpcError::Disconnected(_))));
    }

    #[tokio::test]
    async fn test_transport_failure_leaves_connection_idle() {
        let (transport, _rx) = MemoryTransport::new();
        let engine = Engine::new(
            EngineConfig::default(),
            Dispatcher::new(Role::Csms, registry()),
            transport.clone(),
        );
        engine.on_connected("cs-1");
        transport.close("cs-1");

        let err = engine.send("cs-1", "Foo", json!({"n": 1})).await.unwrap_err();
        assert!(matches!(err, RpcError::Transport(_)));

        transport.reopen("cs-1");
        assert!(engine.send("cs-1", "Foo", json!({"n": 1})).await.is_ok());
    }

    #[tokio::test]
    async fn test_unbounded_timeout_keeps_connection_usable() {
        let (engine, mut rx) = csms();
        let handle = engine
            .send_with_timeout("cs-1", "Foo", json!({"n": 1}), Duration::MAX)
            .await
            .unwrap();
        let call = sent_call(&rx.recv().await.unwrap());
        let reply = CallResult::new(call.message_id, json!({"ok": true}));
        engine.on_frame_received("cs-1", reply.to_bytes().unwrap()).await.unwrap();
        assert_eq!(handle.await.unwrap(), json!({"ok": true}));

        assert!(engine.is_connected("cs-1"));
        let handle = engine
            .send_with_timeout("cs-1", "Foo", json!({"n": 2}), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(sent_call(&rx.recv().await.unwrap()).message_id, handle.message_id());
    }

    #[test]
    fn test_deadline_is_capped() {
        let before = Instant::now();
        assert!(deadline_after(Duration::MAX) >= before + FAR_FUTURE);
        assert!(deadline_after(Duration::from_millis(5)) < before + Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_dropped_handle_frees_slot() {
        let (engine, mut rx) = csms();
        let handle = engine.send("cs-1", "Foo", json!({"n": 1})).await.unwrap();
        rx.recv().await.unwrap();
        drop(handle);

        let handle = engine.send("cs-1", "Foo", json!({"n": 2})).await.unwrap();
        assert_eq!(sent_call(&rx.recv().await.unwrap()).message_id, handle.message_id());
    }
}
