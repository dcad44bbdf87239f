//! Incoming message context.
//!
//! Every envelope a session delivers arrives wrapped in an
//! [`IncomingMessage`]: the decoded payload plus the handle needed to reply
//! on the same correlation token. One context per envelope, never reused.
//!
//! # Replying
//!
//! Two reply paths, both defaulting the outgoing token to this message's
//! token so the peer's pending wait resolves:
//!
//! - [`send_no_reply`](IncomingMessage::send_no_reply) transmits and
//!   returns. The usual way to answer a request.
//! - [`send`](IncomingMessage::send) transmits and waits for the peer to
//!   answer *back* on the same token, continuing the exchange.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::envelope::{Envelope, WaitId};
use crate::error::{Error, Result};
use crate::session::{DEFAULT_REPLY_TIMEOUT, EVENT_KEY, Session, payload_envelope};

// ============================================================================
// IncomingMessage
// ============================================================================

/// One received envelope, bound to the session it arrived on.
///
/// Contexts delivered by a session are already accepted; reply methods work
/// directly. A context built by hand via [`IncomingMessage::new`] must be
/// bound with [`accept`](IncomingMessage::accept) first, otherwise replies
/// fail with [`Error::NotAccepted`].
pub struct IncomingMessage {
    /// The decoded inbound envelope.
    envelope: Envelope,
    /// Owning session; `None` until accepted.
    session: Option<Session>,
}

impl IncomingMessage {
    /// Wraps an envelope in an unbound context.
    #[must_use]
    pub fn new(envelope: Envelope) -> Self {
        Self {
            envelope,
            session: None,
        }
    }

    /// Binds the context to a session, enabling replies.
    #[must_use]
    pub fn accept(mut self, session: &Session) -> Self {
        self.session = Some(session.clone());
        self
    }

    /// Returns `true` once the context is bound to a session.
    #[inline]
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        self.session.is_some()
    }

    // ========================================================================
    // Replies
    // ========================================================================

    /// Replies and waits for the peer's counter-reply with the default
    /// timeout (30s).
    ///
    /// The reply goes out under this message's token (a `waitId` in the
    /// payload wins over it) and a local wait is registered on that token,
    /// so the returned message is the peer's next answer in the exchange.
    ///
    /// # Errors
    ///
    /// - [`Error::NotAccepted`] if the context is unbound
    /// - [`Error::Protocol`] if the payload is not a JSON object
    /// - [`Error::ReplyTimeout`] if no counter-reply arrives in time
    /// - [`Error::ConnectionClosed`] if the connection closes first
    pub async fn send(&self, data: Value) -> Result<IncomingMessage> {
        self.send_with_timeout(data, DEFAULT_REPLY_TIMEOUT).await
    }

    /// Replies and waits for the peer's counter-reply with a custom timeout.
    ///
    /// # Errors
    ///
    /// Same as [`IncomingMessage::send`].
    pub async fn send_with_timeout(
        &self,
        data: Value,
        reply_timeout: Duration,
    ) -> Result<IncomingMessage> {
        let session = self.bound_session()?;
        let envelope = self.reply_envelope(data)?;
        session.request(envelope, reply_timeout).await
    }

    /// Replies without waiting for anything back.
    ///
    /// Same token defaulting as [`send`](IncomingMessage::send), but the
    /// local pending table is never touched: only the peer's wait on this
    /// token resolves. Returns the token the reply went out with.
    ///
    /// # Errors
    ///
    /// - [`Error::NotAccepted`] if the context is unbound
    /// - [`Error::Protocol`] if the payload is not a JSON object
    /// - [`Error::ConnectionClosed`] if the connection is closed
    pub async fn send_no_reply(&self, data: Value) -> Result<WaitId> {
        let session = self.bound_session()?;
        let envelope = self.reply_envelope(data)?;
        session.engine().send(envelope).await
    }

    /// Returns the bound session or fails.
    fn bound_session(&self) -> Result<&Session> {
        self.session.as_ref().ok_or(Error::NotAccepted)
    }

    /// Builds an outgoing reply envelope, defaulting to this message's token.
    fn reply_envelope(&self, data: Value) -> Result<Envelope> {
        let mut envelope = payload_envelope(data)?;

        if envelope.wait_id().is_none()
            && let Some(wait_id) = self.envelope.wait_id()
        {
            envelope.set_wait_id(wait_id.clone());
        }

        Ok(envelope)
    }

    // ========================================================================
    // Payload Access
    // ========================================================================

    /// Returns the correlation token this message arrived with.
    #[inline]
    #[must_use]
    pub fn wait_id(&self) -> Option<&WaitId> {
        self.envelope.wait_id()
    }

    /// Returns the named-event tag, if the payload carries one.
    #[must_use]
    pub fn event(&self) -> Option<&str> {
        self.envelope
            .get(EVENT_KEY)
            .and_then(Value::as_str)
            .filter(|tag| !tag.is_empty())
    }

    /// Returns the payload map.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &Map<String, Value> {
        self.envelope.payload()
    }

    /// Gets a payload value by key.
    #[inline]
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.envelope.get(key)
    }

    /// Gets a string value from the payload.
    ///
    /// Returns empty string if key not found or not a string.
    #[inline]
    #[must_use]
    pub fn get_string(&self, key: &str) -> String {
        self.envelope.get_string(key)
    }

    /// Gets a u64 value from the payload.
    ///
    /// Returns 0 if key not found or not a number.
    #[inline]
    #[must_use]
    pub fn get_u64(&self, key: &str) -> u64 {
        self.envelope.get_u64(key)
    }

    /// Gets a boolean value from the payload.
    ///
    /// Returns false if key not found or not a boolean.
    #[inline]
    #[must_use]
    pub fn get_bool(&self, key: &str) -> bool {
        self.envelope.get_bool(key)
    }

    /// Returns the underlying envelope.
    #[inline]
    #[must_use]
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// Consumes the context, returning the envelope.
    #[inline]
    #[must_use]
    pub fn into_envelope(self) -> Envelope {
        self.envelope
    }

    /// Converts the message back into a plain JSON object.
    #[must_use]
    pub fn to_value(&self) -> Value {
        self.envelope.to_value()
    }
}

impl fmt::Debug for IncomingMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncomingMessage")
            .field("envelope", &self.envelope)
            .field("accepted", &self.is_accepted())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
