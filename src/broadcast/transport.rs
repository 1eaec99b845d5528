//! # Broadcast transports.
//!
//! A transport moves opaque byte frames between contexts by channel name. It
//! never interprets them; stamping and filtering live in
//! [`BroadcastRelay`](super::BroadcastRelay).
//!
//! [`LocalHub`] is the in-process transport: one bounded
//! `tokio::sync::broadcast` ring per channel name, created on first use.
//! Frames are serialized bytes, so contexts sharing a hub still share no
//! objects through it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::error::RuntimeError;

/// One serialized message as it travels through a transport.
pub type Frame = Arc<[u8]>;

/// Moves frames between relay instances.
pub trait BroadcastTransport: Send + Sync + 'static {
    /// Hands a frame to every current subscriber of `channel`.
    ///
    /// Having no subscribers is not an error.
    fn send(&self, channel: &str, frame: Frame) -> Result<(), RuntimeError>;

    /// Opens a receiver observing frames sent to `channel` from now on.
    fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<Frame>, RuntimeError>;
}

/// In-process transport backed by one broadcast ring per channel.
#[derive(Debug)]
pub struct LocalHub {
    capacity: usize,
    channels: RwLock<HashMap<String, broadcast::Sender<Frame>>>,
    closed: AtomicBool,
}

impl LocalHub {
    /// Creates a hub whose rings hold `capacity` frames (min 1).
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity: capacity.max(1),
            channels: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Drops every ring; open receivers observe `Closed` and later sends fail.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.channels.write().clear();
    }

    /// Number of channels that have been used.
    pub fn channel_count(&self) -> usize {
        self.channels.read().len()
    }

    fn sender(&self, channel: &str) -> Result<broadcast::Sender<Frame>, RuntimeError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RuntimeError::transport("broadcast hub is closed"));
        }
        if let Some(tx) = self.channels.read().get(channel) {
            return Ok(tx.clone());
        }
        let mut map = self.channels.write();
        let tx = map
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        Ok(tx.clone())
    }
}

impl BroadcastTransport for LocalHub {
    fn send(&self, channel: &str, frame: Frame) -> Result<(), RuntimeError> {
        // SendError only means "no receivers right now".
        let _ = self.sender(channel)?.send(frame);
        Ok(())
    }

    fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<Frame>, RuntimeError> {
        Ok(self.sender(channel)?.subscribe())
    }
}
