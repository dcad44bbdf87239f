//! In-process channel engine.
//!
//! This module provides a transport that never touches the network: two
//! engines joined by channels, for tests and benchmarks that exercise the
//! correlation layer without sockets.
//!
//! Frames still cross the "wire" as encoded text and are decoded on the far
//! side, so the full envelope path runs exactly as it does over WebSocket.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::engine::{Engine, ServerEngine};
use crate::envelope::{Envelope, WaitId};
use crate::error::{Error, Result};

// ============================================================================
// MemoryEngine
// ============================================================================

/// One endpoint of an in-process connection.
///
/// Created in pairs by [`MemoryEngine::pair`] or through a
/// [`MemoryConnector`]. Closing either endpoint tears down both directions.
#[derive(Debug)]
pub struct MemoryEngine {
    /// Outbound wire frames toward the peer. Taken on close.
    frame_tx: Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>,
    /// Inbound envelope stream, handed out once.
    incoming_rx: Mutex<Option<mpsc::UnboundedReceiver<Envelope>>>,
    /// Cleared when either endpoint closes.
    open: Arc<AtomicBool>,
}

impl MemoryEngine {
    /// Creates two connected engines.
    ///
    /// Envelopes sent on one come out of the other's inbound stream.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (left_tx, left_rx) = mpsc::unbounded_channel();
        let (right_tx, right_rx) = mpsc::unbounded_channel();

        (
            Self::endpoint(left_tx, right_rx),
            Self::endpoint(right_tx, left_rx),
        )
    }

    /// Creates one endpoint and spawns its decode loop.
    fn endpoint(
        frame_tx: mpsc::UnboundedSender<String>,
        frame_rx: mpsc::UnboundedReceiver<String>,
    ) -> Self {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let frame_tx = Arc::new(Mutex::new(Some(frame_tx)));
        let open = Arc::new(AtomicBool::new(true));

        tokio::spawn(Self::run_decode_loop(
            frame_rx,
            incoming_tx,
            Arc::clone(&frame_tx),
            Arc::clone(&open),
        ));

        Self {
            frame_tx,
            incoming_rx: Mutex::new(Some(incoming_rx)),
            open,
        }
    }

    /// Decode loop for one endpoint.
    ///
    /// Ends when the peer drops its sender; tears down the outbound half
    /// before the inbound stream ends, so callers that observe the stream
    /// ending also observe sends failing.
    async fn run_decode_loop(
        mut frame_rx: mpsc::UnboundedReceiver<String>,
        incoming_tx: mpsc::UnboundedSender<Envelope>,
        frame_tx: Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>,
        open: Arc<AtomicBool>,
    ) {
        while let Some(frame) = frame_rx.recv().await {
            match Envelope::decode(&frame) {
                Some(envelope) => {
                    let _ = incoming_tx.send(envelope);
                }
                None => {
                    warn!(frame = %frame, "Discarding undecodable frame");
                }
            }
        }

        open.store(false, Ordering::Release);
        frame_tx.lock().take();

        debug!("Memory engine loop terminated");
    }
}

// ============================================================================
// Engine Implementation
// ============================================================================

#[async_trait]
impl Engine for MemoryEngine {
    async fn send(&self, mut envelope: Envelope) -> Result<WaitId> {
        let wait_id = envelope.ensure_wait_id().clone();
        let frame = envelope.encode()?;

        let frame_tx = self.frame_tx.lock().clone();
        let Some(frame_tx) = frame_tx else {
            return Err(Error::ConnectionClosed);
        };

        frame_tx
            .send(frame)
            .map_err(|_| Error::ConnectionClosed)?;

        Ok(wait_id)
    }

    fn incoming(&self) -> Option<mpsc::UnboundedReceiver<Envelope>> {
        self.incoming_rx.lock().take()
    }

    async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::Release);
        self.frame_tx.lock().take();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

// ============================================================================
// MemoryServerEngine
// ============================================================================

/// In-process listener.
///
/// Yields one [`MemoryEngine`] per [`MemoryConnector::connect`] call, in
/// connection order.
pub struct MemoryServerEngine {
    /// Queue of server-side endpoints.
    accepted_rx: AsyncMutex<mpsc::UnboundedReceiver<MemoryEngine>>,
}

impl MemoryServerEngine {
    /// Creates a listener and the connector clients use to reach it.
    #[must_use]
    pub fn new() -> (Self, MemoryConnector) {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();

        (
            Self {
                accepted_rx: AsyncMutex::new(accepted_rx),
            },
            MemoryConnector { accepted_tx },
        )
    }
}

#[async_trait]
impl ServerEngine for MemoryServerEngine {
    type Socket = MemoryEngine;

    async fn accept(&self) -> Result<MemoryEngine> {
        let mut accepted_rx = self.accepted_rx.lock().await;
        accepted_rx
            .recv()
            .await
            .ok_or_else(|| Error::connection("listener closed"))
    }

    async fn close(&self) -> Result<()> {
        self.accepted_rx.lock().await.close();
        Ok(())
    }
}

// ============================================================================
// MemoryConnector
// ============================================================================

/// Client-side handle for reaching a [`MemoryServerEngine`].
#[derive(Clone)]
pub struct MemoryConnector {
    /// Delivers the server-side endpoint of each new pair.
    accepted_tx: mpsc::UnboundedSender<MemoryEngine>,
}

impl MemoryConnector {
    /// Opens a new connection to the listener.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`](crate::Error::Connection) if the
    /// listener has closed.
    pub fn connect(&self) -> Result<MemoryEngine> {
        let (local, remote) = MemoryEngine::pair();

        self.accepted_tx
            .send(remote)
            .map_err(|_| Error::connection("listener closed"))?;

        Ok(local)
    }
}

// ============================================================================
// Tests
// ============================================================================
