//! Correlation session facade.
//!
//! A [`Session`] wraps one [`Engine`] and turns raw envelope traffic into
//! request/reply and named-event semantics. It owns the pending-wait table
//! for its connection and runs a dispatch task that routes every inbound
//! envelope to exactly one lane.
//!
//! # Dispatch
//!
//! Per inbound envelope, in transport order:
//!
//! | Lane | Condition | Delivery |
//! |------|-----------|----------|
//! | reply | token matches a pending wait | resolves that wait, exactly once |
//! | event | payload `"event"` tag has a subscriber | that tag's queue |
//! | message | everything else | the take-once [`messages`](Session::messages) queue |
//!
//! A tagged envelope never falls through to the message lane; a token only
//! resolves a wait once. When the connection closes, every pending wait
//! fails with [`Error::ConnectionClosed`] and all queues end.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::engine::Engine;
use crate::envelope::{Envelope, WaitId};
use crate::error::{Error, Result};

// ============================================================================
// Submodules
// ============================================================================

/// Incoming message context.
pub mod incoming;

/// One session per accepted connection.
pub mod server;

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for awaiting a reply (30s).
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Payload key carrying the named-event tag.
///
/// A session convention, not a wire reserved key: engines transmit the tag
/// like any other payload field.
pub const EVENT_KEY: &str = "event";

// ============================================================================
// Types
// ============================================================================

/// Map of correlation tokens to reply channels.
type PendingMap = FxHashMap<WaitId, oneshot::Sender<IncomingMessage>>;

/// Map of event tags to subscriber queues.
type SubscriberMap = FxHashMap<String, mpsc::UnboundedSender<IncomingMessage>>;

/// Validates that a payload is a JSON object and wraps it.
pub(crate) fn payload_envelope(data: Value) -> Result<Envelope> {
    Envelope::from_value(data).ok_or_else(|| Error::protocol("payload must be a JSON object"))
}

// ============================================================================
// Session
// ============================================================================

/// Request/reply facade over one connection.
///
/// Cheap to clone; all clones share the same pending table and dispatch
/// task. Works with any [`Engine`], WebSocket or in-memory alike.
///
/// Dropping every clone does not hang up: the dispatch task keeps the
/// connection alive until [`close`](Session::close) is called or the peer
/// disconnects.
///
/// # Example
///
/// ```ignore
/// use serde_json::json;
/// use waitsock::client;
///
/// let session = client::connect("ws://127.0.0.1:9000").await?;
/// let reply = session.send(json!({ "op": "status" })).await?;
/// println!("state: {}", reply.get_string("state"));
/// ```
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

/// State shared by all clones of one session.
struct SessionInner {
    /// The connection this session drives.
    engine: Arc<dyn Engine>,
    /// Pending waits, keyed by correlation token.
    pending: Mutex<PendingMap>,
    /// Live event subscribers, keyed by tag.
    subscribers: Mutex<SubscriberMap>,
    /// Fallback message lane, handed out once.
    messages_rx: Mutex<Option<mpsc::UnboundedReceiver<IncomingMessage>>>,
}

impl Session {
    /// Creates a session over an engine and spawns its dispatch task.
    ///
    /// Takes the engine's inbound queue; exactly one session can exist per
    /// engine.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the engine's inbound queue was already
    /// taken.
    pub fn new<E: Engine>(engine: E) -> Result<Self> {
        let engine: Arc<dyn Engine> = Arc::new(engine);
        let inbound = engine
            .incoming()
            .ok_or_else(|| Error::protocol("engine inbound queue already taken"))?;
        let (messages_tx, messages_rx) = mpsc::unbounded_channel();

        let session = Self {
            inner: Arc::new(SessionInner {
                engine,
                pending: Mutex::new(PendingMap::default()),
                subscribers: Mutex::new(SubscriberMap::default()),
                messages_rx: Mutex::new(Some(messages_rx)),
            }),
        };

        tokio::spawn(Self::run_dispatch_loop(
            inbound,
            messages_tx,
            session.clone(),
        ));

        Ok(session)
    }

    // ========================================================================
    // Request/Reply
    // ========================================================================

    /// Sends a payload and waits for its reply with the default timeout (30s).
    ///
    /// The payload is stamped with a fresh correlation token unless it
    /// already carries a `waitId`; the reply is the first inbound envelope
    /// bearing that token.
    ///
    /// # Errors
    ///
    /// - [`Error::Protocol`] if the payload is not a JSON object
    /// - [`Error::ConnectionClosed`] if the connection closes first
    /// - [`Error::ReplyTimeout`] if no reply arrives within the timeout
    pub async fn send(&self, data: Value) -> Result<IncomingMessage> {
        self.send_with_timeout(data, DEFAULT_REPLY_TIMEOUT).await
    }

    /// Sends a payload and waits for its reply with a custom timeout.
    ///
    /// # Errors
    ///
    /// Same as [`Session::send`].
    pub async fn send_with_timeout(
        &self,
        data: Value,
        reply_timeout: Duration,
    ) -> Result<IncomingMessage> {
        let envelope = payload_envelope(data)?;
        self.request(envelope, reply_timeout).await
    }

    /// Registers a pending wait for the envelope's token, transmits, and
    /// awaits the reply.
    pub(crate) async fn request(
        &self,
        mut envelope: Envelope,
        reply_timeout: Duration,
    ) -> Result<IncomingMessage> {
        let wait_id = envelope.ensure_wait_id().clone();
        let (reply_tx, reply_rx) = oneshot::channel();

        // Register before transmitting; the reply can race the write ack
        self.inner.pending.lock().insert(wait_id.clone(), reply_tx);

        if let Err(e) = self.inner.engine.send(envelope).await {
            self.inner.pending.lock().remove(&wait_id);
            return Err(e);
        }

        match timeout(reply_timeout, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                // Timed out: retire the wait so a late reply cannot resolve it
                self.inner.pending.lock().remove(&wait_id);
                Err(Error::reply_timeout(
                    wait_id,
                    reply_timeout.as_millis() as u64,
                ))
            }
        }
    }

    // ========================================================================
    // Named Events
    // ========================================================================

    /// Sends a fire-and-forget named event.
    ///
    /// Stamps the tag into the payload under [`EVENT_KEY`] and transmits
    /// without registering a wait. Returns the token the envelope went out
    /// with.
    ///
    /// # Errors
    ///
    /// - [`Error::Protocol`] if the tag is empty or the payload is not a
    ///   JSON object
    /// - [`Error::ConnectionClosed`] if the connection is closed
    pub async fn send_emit(&self, event: &str, data: Value) -> Result<WaitId> {
        if event.is_empty() {
            return Err(Error::protocol("event name must not be empty"));
        }

        let Value::Object(mut payload) = data else {
            return Err(Error::protocol("payload must be a JSON object"));
        };
        payload.insert(EVENT_KEY.to_string(), Value::String(event.to_string()));

        self.inner.engine.send(Envelope::new(payload)).await
    }

    /// Subscribes to a named event.
    ///
    /// Inbound envelopes tagged with this event arrive on the returned
    /// queue. Re-subscribing replaces the previous subscriber, whose queue
    /// ends. The queue also ends when the connection closes.
    #[must_use]
    pub fn subscribe(&self, event: &str) -> mpsc::UnboundedReceiver<IncomingMessage> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let replaced = self
            .inner
            .subscribers
            .lock()
            .insert(event.to_string(), event_tx);
        if replaced.is_some() {
            debug!(event = %event, "Replaced event subscriber");
        }

        event_rx
    }

    /// Drops the subscriber for a named event, if any.
    ///
    /// Its queue ends; later envelopes with this tag are discarded.
    pub fn unsubscribe(&self, event: &str) {
        self.inner.subscribers.lock().remove(event);
    }

    // ========================================================================
    // Message Lane
    // ========================================================================

    /// Takes the fallback message lane.
    ///
    /// Returns `Some` exactly once. The queue carries every inbound envelope
    /// that resolved no wait and matched no subscriber, so unsolicited
    /// requests from the peer arrive here. Messages buffer from session
    /// creation until the lane is taken.
    #[must_use]
    pub fn messages(&self) -> Option<mpsc::UnboundedReceiver<IncomingMessage>> {
        self.inner.messages_rx.lock().take()
    }

    // ========================================================================
    // Connection
    // ========================================================================

    /// Returns the engine this session drives.
    #[inline]
    #[must_use]
    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.inner.engine
    }

    /// Returns `true` while the connection can still carry frames.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.engine.is_open()
    }

    /// Returns the number of pending waits.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Closes the connection.
    ///
    /// Pending waits fail with
    /// [`Error::ConnectionClosed`]; event and message queues end once
    /// dispatch drains.
    ///
    /// # Errors
    ///
    /// Propagates transport close errors; idempotent otherwise.
    pub async fn close(&self) -> Result<()> {
        self.inner.engine.close().await
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Dispatch loop: routes inbound envelopes until the connection ends.
    async fn run_dispatch_loop(
        mut inbound: mpsc::UnboundedReceiver<Envelope>,
        messages_tx: mpsc::UnboundedSender<IncomingMessage>,
        session: Session,
    ) {
        while let Some(envelope) = inbound.recv().await {
            session.dispatch(envelope, &messages_tx);
        }

        session.fail_pending_waits();
        session.inner.subscribers.lock().clear();

        debug!("Dispatch loop terminated");
    }

    /// Routes one inbound envelope to exactly one lane.
    fn dispatch(&self, envelope: Envelope, messages_tx: &mpsc::UnboundedSender<IncomingMessage>) {
        let message = IncomingMessage::new(envelope).accept(self);

        // Reply lane: a token resolves its wait exactly once
        let correlated = match message.wait_id() {
            Some(wait_id) => self.inner.pending.lock().remove(wait_id),
            None => None,
        };
        if let Some(reply_tx) = correlated {
            trace!(wait_id = ?message.wait_id(), "Reply correlated");
            let _ = reply_tx.send(message);
            return;
        }

        // Event lane: tagged envelopes never fall through to the message lane
        if let Some(tag) = message.event().map(str::to_string) {
            let mut subscribers = self.inner.subscribers.lock();
            if let Some(subscriber) = subscribers.get(&tag) {
                if subscriber.send(message).is_err() {
                    subscribers.remove(&tag);
                    debug!(event = %tag, "Removed stale event subscriber");
                }
            } else {
                debug!(event = %tag, "No subscriber for event, dropping");
            }
            return;
        }

        // Message lane
        let _ = messages_tx.send(message);
    }

    /// Fails every pending wait with a closed-connection error.
    fn fail_pending_waits(&self) {
        let count = {
            let mut pending = self.inner.pending.lock();
            let count = pending.len();
            pending.clear();
            count
        };

        if count > 0 {
            debug!(count, "Failed pending waits on close");
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Re-exports
// ============================================================================

pub use incoming::IncomingMessage;
pub use server::SessionServer;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::engine::MemoryEngine;

    /// Connected session pair over the in-memory transport.
    fn session_pair() -> (Session, Session) {
        let (client_engine, server_engine) = MemoryEngine::pair();
        let client = Session::new(client_engine).expect("client session");
        let server = Session::new(server_engine).expect("server session");
        (client, server)
    }

    #[tokio::test]
    async fn test_send_resolves_with_reply() {
        let (client, server) = session_pair();
        let mut server_messages = server.messages().expect("lane available");

        let server_task = tokio::spawn(async move {
            let request = server_messages.recv().await.expect("request arrived");
            assert!(request.get_bool("test"));
            request
                .send_no_reply(json!({ "test": true, "answered": true }))
                .await
                .expect("reply sent");
        });

        let reply = client.send(json!({ "test": true })).await.expect("reply");
        assert!(reply.get_bool("test"));
        assert!(reply.get_bool("answered"));
        assert_eq!(client.pending_count(), 0);

        server_task.await.expect("server task");
    }

    #[tokio::test]
    async fn test_reply_carries_request_token() {
        let (client, server) = session_pair();
        let mut server_messages = server.messages().expect("lane available");

        let server_task = tokio::spawn(async move {
            let request = server_messages.recv().await.expect("request arrived");
            let token = request.wait_id().expect("stamped").as_str().to_string();
            request
                .send_no_reply(json!({ "echo": token }))
                .await
                .expect("reply sent");
        });

        let reply = client.send(json!({ "q": 1 })).await.expect("reply");
        let token = reply.wait_id().expect("token retained").as_str();
        assert_eq!(reply.get_string("echo"), token);

        server_task.await.expect("server task");
    }

    #[tokio::test]
    async fn test_concurrent_sends_correlate_independently() {
        let (client, server) = session_pair();
        let mut server_messages = server.messages().expect("lane available");

        let server_task = tokio::spawn(async move {
            for _ in 0..2 {
                let request = server_messages.recv().await.expect("request arrived");
                let n = request.get_u64("n");
                request
                    .send_no_reply(json!({ "echo": n }))
                    .await
                    .expect("reply sent");
            }
        });

        let first = client.clone();
        let second = client.clone();
        let (a, b) = tokio::join!(
            tokio::spawn(async move { first.send(json!({ "n": 1 })).await }),
            tokio::spawn(async move { second.send(json!({ "n": 2 })).await }),
        );

        assert_eq!(a.expect("task").expect("reply").get_u64("echo"), 1);
        assert_eq!(b.expect("task").expect("reply").get_u64("echo"), 2);

        server_task.await.expect("server task");
    }

    #[tokio::test]
    async fn test_context_send_awaits_counter_reply() {
        let (client, server) = session_pair();
        let mut server_messages = server.messages().expect("lane available");

        let server_task = tokio::spawn(async move {
            let request = server_messages.recv().await.expect("request arrived");
            assert_eq!(request.get_u64("step"), 1);

            // Session-level reply: waits for the peer to answer on the same token
            let counter = request
                .send(json!({ "step": 2 }))
                .await
                .expect("counter-reply");
            assert_eq!(counter.get_u64("step"), 3);
            assert_eq!(counter.wait_id(), request.wait_id());
        });

        let reply = client.send(json!({ "step": 1 })).await.expect("reply");
        assert_eq!(reply.get_u64("step"), 2);
        reply
            .send_no_reply(json!({ "step": 3 }))
            .await
            .expect("final reply");

        server_task.await.expect("server task");
    }

    #[tokio::test]
    async fn test_no_reply_send_never_resolves_local_wait() {
        let (client, server) = session_pair();
        let mut server_messages = server.messages().expect("lane available");

        let waiter = client.clone();
        let inflight = tokio::spawn(async move {
            waiter.send(json!({ "q": 1, "waitId": "shared-tok" })).await
        });

        // The request is in flight and its wait is registered
        let request = server_messages.recv().await.expect("request arrived");
        assert_eq!(request.wait_id(), Some(&WaitId::from("shared-tok")));
        assert_eq!(client.pending_count(), 1);

        // An engine-level send reusing the same token bypasses that wait
        let outbound =
            IncomingMessage::new(Envelope::default().with_wait_id(WaitId::from("shared-tok")))
                .accept(&client);
        outbound
            .send_no_reply(json!({ "aside": true }))
            .await
            .expect("no-reply send");
        assert_eq!(client.pending_count(), 1);

        // The colliding frame lands on the peer's message lane instead
        let aside = server_messages.recv().await.expect("aside delivered");
        assert!(aside.get_bool("aside"));

        // Only the real reply resolves the wait
        request
            .send_no_reply(json!({ "answered": true }))
            .await
            .expect("reply sent");
        let reply = inflight.await.expect("task").expect("reply");
        assert!(reply.get_bool("answered"));
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_send_timeout_retires_wait() {
        let (client, _server) = session_pair();

        let err = client
            .send_with_timeout(json!({ "q": 1 }), Duration::from_millis(50))
            .await
            .expect_err("nobody replies");

        assert!(matches!(err, Error::ReplyTimeout { .. }));
        assert!(err.is_timeout());
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_late_reply_surfaces_as_message() {
        let (client, server) = session_pair();
        let mut client_messages = client.messages().expect("lane available");
        let mut server_messages = server.messages().expect("lane available");

        let err = client
            .send_with_timeout(json!({ "q": 1 }), Duration::from_millis(50))
            .await
            .expect_err("no reply in time");
        assert!(matches!(err, Error::ReplyTimeout { .. }));

        // Reply after the wait was retired: it lands on the message lane
        let request = server_messages.recv().await.expect("request arrived");
        request
            .send_no_reply(json!({ "late": true }))
            .await
            .expect("reply sent");

        let late = client_messages.recv().await.expect("late reply delivered");
        assert!(late.get_bool("late"));
        assert_eq!(late.wait_id(), request.wait_id());
    }

    #[tokio::test]
    async fn test_emit_routes_to_subscriber() {
        let (client, server) = session_pair();

        let mut from_server = client.subscribe("sc");
        let mut from_client = server.subscribe("cs");

        let token = server
            .send_emit("sc", json!({ "n": 1 }))
            .await
            .expect("emit");
        client.send_emit("cs", json!({ "n": 2 })).await.expect("emit");

        let event = from_server.recv().await.expect("event delivered");
        assert_eq!(event.event(), Some("sc"));
        assert_eq!(event.get_u64("n"), 1);
        assert_eq!(event.wait_id(), Some(&token));

        let event = from_client.recv().await.expect("event delivered");
        assert_eq!(event.event(), Some("cs"));
        assert_eq!(event.get_u64("n"), 2);
    }

    #[tokio::test]
    async fn test_unmatched_tag_never_reaches_messages() {
        let (client, server) = session_pair();
        let mut client_messages = client.messages().expect("lane available");
        let mut server_messages = server.messages().expect("lane available");

        server
            .send_emit("orphan", json!({ "n": 1 }))
            .await
            .expect("emit");

        // A tracked roundtrip behind the emit proves the emit was dispatched
        let server_task = tokio::spawn(async move {
            let request = server_messages.recv().await.expect("request arrived");
            request
                .send_no_reply(json!({ "ok": true }))
                .await
                .expect("reply sent");
        });
        client.send(json!({ "q": 1 })).await.expect("reply");
        server_task.await.expect("server task");

        assert!(matches!(
            client_messages.try_recv(),
            Err(mpsc::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_resubscribe_replaces_previous() {
        let (client, server) = session_pair();

        let mut first = client.subscribe("tick");
        let mut second = client.subscribe("tick");

        // The replaced subscriber's queue ends immediately
        assert!(first.recv().await.is_none());

        server.send_emit("tick", json!({})).await.expect("emit");
        let event = second.recv().await.expect("event delivered");
        assert_eq!(event.event(), Some("tick"));
    }

    #[tokio::test]
    async fn test_unsubscribe_ends_queue() {
        let (client, _server) = session_pair();

        let mut events = client.subscribe("tick");
        client.unsubscribe("tick");

        assert!(events.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_close_fails_inflight_waits() {
        let (client, server) = session_pair();
        let mut server_messages = server.messages().expect("lane available");

        let sender = client.clone();
        let inflight = tokio::spawn(async move { sender.send(json!({ "q": 1 })).await });

        // Request observed remotely, so the local wait is registered
        server_messages.recv().await.expect("request arrived");
        client.close().await.expect("close");

        let err = inflight
            .await
            .expect("task")
            .expect_err("wait must fail on close");
        assert!(matches!(err, Error::ConnectionClosed));
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (client, _server) = session_pair();

        client.close().await.expect("close");
        assert!(!client.is_open());

        let err = client
            .send(json!({ "q": 1 }))
            .await
            .expect_err("send after close");
        assert!(matches!(err, Error::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_close_ends_subscriber_queues() {
        let (client, server) = session_pair();
        let mut events = client.subscribe("tick");

        server.close().await.expect("close");
        assert!(events.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_one_session_per_engine() {
        let (engine, _peer) = MemoryEngine::pair();
        let _stolen = engine.incoming().expect("first take");

        let err = Session::new(engine).expect_err("queue already taken");
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[tokio::test]
    async fn test_messages_taken_once() {
        let (client, _server) = session_pair();
        assert!(client.messages().is_some());
        assert!(client.messages().is_none());
    }

    #[tokio::test]
    async fn test_send_rejects_non_object_payload() {
        let (client, _server) = session_pair();

        let err = client.send(json!(42)).await.expect_err("non-object payload");
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[tokio::test]
    async fn test_emit_rejects_empty_name() {
        let (client, _server) = session_pair();

        let err = client
            .send_emit("", json!({}))
            .await
            .expect_err("empty event name");
        assert!(matches!(err, Error::Protocol { .. }));
    }
}
