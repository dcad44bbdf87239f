//! Error types for waitsock.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use waitsock::{Result, Session};
//!
//! async fn example(session: &Session) -> Result<()> {
//!     let reply = session.send(serde_json::json!({ "ping": true })).await?;
//!     println!("pong: {:?}", reply.payload());
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Construction | [`Error::InvalidAddress`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectTimeout`], [`Error::ConnectionClosed`] |
//! | Correlation | [`Error::ReplyTimeout`], [`Error::NotAccepted`] |
//! | Protocol | [`Error::Protocol`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`] |
//!
//! Inbound decode failures have no variant on purpose: a malformed frame is
//! discarded inside the engine and the connection stays open.

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::envelope::WaitId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Construction Errors
    // ========================================================================
    /// Transport address is missing or unparsable.
    ///
    /// Returned before any connection attempt is made.
    #[error("Invalid address: {message}")]
    InvalidAddress {
        /// Description of what was wrong with the address.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Establishing or upgrading a connection failed.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// The transport did not reach the open state in time.
    ///
    /// Returned by [`connect_with`](crate::connect_with) when a handshake
    /// timeout is configured.
    #[error("Connect timeout after {timeout_ms}ms")]
    ConnectTimeout {
        /// Milliseconds waited before giving up.
        timeout_ms: u64,
    },

    /// The transport is closed.
    ///
    /// Returned by sends on a closed engine and by pending reply waits
    /// when the connection goes away underneath them.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Correlation Errors
    // ========================================================================
    /// No reply arrived for a correlated send within the wait window.
    ///
    /// The pending entry is removed before this is returned; a late reply
    /// with the same token is treated as unsolicited.
    #[error("Reply for {wait_id} timed out after {timeout_ms}ms")]
    ReplyTimeout {
        /// Correlation token of the request that went unanswered.
        wait_id: WaitId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// A reply method was called on a message that was never accepted.
    ///
    /// [`IncomingMessage::accept`](crate::IncomingMessage::accept) binds a
    /// message to the session that received it and must run first.
    #[error("Message not bound to a session; call accept() before replying")]
    NotAccepted,

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// A payload violated the wire shape this crate expects.
    ///
    /// Outbound payloads must be JSON objects.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates an invalid address error.
    #[inline]
    pub fn invalid_address(message: impl Into<String>) -> Self {
        Self::InvalidAddress {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connect timeout error.
    #[inline]
    pub fn connect_timeout(timeout_ms: u64) -> Self {
        Self::ConnectTimeout { timeout_ms }
    }

    /// Creates a reply timeout error.
    #[inline]
    pub fn reply_timeout(wait_id: WaitId, timeout_ms: u64) -> Self {
        Self::ReplyTimeout {
            wait_id,
            timeout_ms,
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ConnectTimeout { .. } | Self::ReplyTimeout { .. }
        )
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectTimeout { .. }
                | Self::ConnectionClosed
                | Self::WebSocket(_)
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
