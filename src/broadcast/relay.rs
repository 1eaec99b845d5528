//! # BroadcastRelay: named channels across contexts, minus your own echo.
//!
//! ```text
//! publish(channel, data)
//!   └─► Envelope { data, sender: relay.id } ─► serde_json ─► transport.send
//!
//! subscribe(channel, cb)  (one task per subscription)
//!   loop {
//!     frame ◄─ transport receiver
//!       ├─ malformed         ─► warn, drop
//!       ├─ sender == relay.id ─► skip
//!       ├─ lagged(n)         ─► warn, continue
//!       └─ otherwise         ─► cb(data)
//!   }
//! ```
//!
//! Publishing never fails from the caller's point of view: transport errors are
//! logged and the message is lost. There is no retry.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::panic_message;

use super::envelope::Envelope;
use super::transport::{BroadcastTransport, Frame};

/// Per-context broadcast endpoint with a random instance identity.
pub struct BroadcastRelay {
    id: String,
    transport: Arc<dyn BroadcastTransport>,
    token: CancellationToken,
}

impl std::fmt::Debug for BroadcastRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastRelay")
            .field("id", &self.id)
            .field("closed", &self.token.is_cancelled())
            .finish()
    }
}

impl BroadcastRelay {
    /// Creates a relay on `transport` with a fresh 128-bit hex identity.
    pub fn new(transport: Arc<dyn BroadcastTransport>) -> Arc<Self> {
        Arc::new(Self {
            id: format!("{:032x}", rand::random::<u128>()),
            transport,
            token: CancellationToken::new(),
        })
    }

    /// This relay's instance identity.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Sends `data` to every other relay subscribed to `channel`.
    pub fn publish(&self, channel: &str, data: Value) {
        if self.token.is_cancelled() {
            debug!(relay = %self.id, channel, "publish on closed relay dropped");
            return;
        }
        let envelope = Envelope {
            data,
            sender: self.id.clone(),
        };
        let frame: Frame = match serde_json::to_vec(&envelope) {
            Ok(bytes) => bytes.into(),
            Err(e) => {
                warn!(relay = %self.id, channel, error = %e, "broadcast payload not serializable; dropped");
                return;
            }
        };
        if let Err(e) = self.transport.send(channel, frame) {
            warn!(relay = %self.id, channel, error = %e, "broadcast transport failed; message dropped");
        }
    }

    /// Delivers every foreign message on `channel` to `callback`.
    ///
    /// Must be called inside a tokio runtime. If the transport refuses the
    /// subscription, the failure is logged and an inactive handle is returned.
    pub fn subscribe<F>(&self, channel: &str, callback: F) -> Subscription
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        let token = self.token.child_token();
        let handle = Subscription {
            channel: channel.to_string(),
            token: token.clone(),
        };

        let mut rx = match self.transport.subscribe(channel) {
            Ok(rx) => rx,
            Err(e) => {
                warn!(relay = %self.id, channel, error = %e, "broadcast subscribe failed");
                token.cancel();
                return handle;
            }
        };

        let me = self.id.clone();
        let channel = handle.channel.clone();
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    _ = token.cancelled() => break,
                    r = rx.recv() => r,
                };
                match frame {
                    Ok(frame) => {
                        let envelope = match serde_json::from_slice::<Envelope>(&frame) {
                            Ok(env) => env,
                            Err(e) => {
                                warn!(relay = %me, %channel, error = %e, "malformed broadcast frame dropped");
                                continue;
                            }
                        };
                        if envelope.sender == me {
                            continue;
                        }
                        if let Err(payload) =
                            std::panic::catch_unwind(AssertUnwindSafe(|| callback(envelope.data)))
                        {
                            warn!(relay = %me, %channel, info = %panic_message(&*payload), "broadcast callback panicked");
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(relay = %me, %channel, skipped, "broadcast subscriber lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        handle
    }

    /// Cancels every subscription of this relay; later publishes are dropped.
    ///
    /// Does not wait for deliveries already in progress.
    pub fn close(&self) {
        self.token.cancel();
    }

    /// True once [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Handle returned by [`BroadcastRelay::subscribe`].
#[derive(Debug, Clone)]
pub struct Subscription {
    channel: String,
    token: CancellationToken,
}

impl Subscription {
    /// Stops delivery. Calling it again is a no-op.
    pub fn unsubscribe(&self) {
        self.token.cancel();
    }

    /// True until unsubscribed (or the relay closed).
    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Channel this subscription listens on.
    pub fn channel(&self) -> &str {
        &self.channel
    }
}
